//! In-memory deduplication log.
//!
//! Records are grouped per UTC day like the Redis layout so lookup and
//! pruning behave the same way in tests as in production.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use std::time::Duration;

use crate::models::{DeduplicationRecord, RepositoryError};

use super::{ensure_within_retention, partition_end, partitions_in_window, DedupLog};

#[derive(Debug)]
pub struct InMemoryDedupLog {
    partitions: RwLock<BTreeMap<NaiveDate, HashMap<String, DeduplicationRecord>>>,
    retention: Duration,
}

impl InMemoryDedupLog {
    /// `retention` bounds how far back lookups search; use the dedup TTL.
    pub fn new(retention: Duration) -> Self {
        Self {
            partitions: RwLock::new(BTreeMap::new()),
            retention,
        }
    }

    pub fn partition_count(&self) -> usize {
        self.partitions.read().len()
    }

    pub fn record_count(&self) -> usize {
        self.partitions.read().values().map(HashMap::len).sum()
    }
}

#[async_trait]
impl DedupLog for InMemoryDedupLog {
    async fn append(&self, record: &DeduplicationRecord) -> Result<(), RepositoryError> {
        ensure_within_retention(record, self.retention)?;
        self.partitions
            .write()
            .entry(record.partition())
            .or_default()
            .insert(record.message_id.clone(), record.clone());
        Ok(())
    }

    async fn lookup(
        &self,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DeduplicationRecord>, RepositoryError> {
        let partitions = self.partitions.read();
        let found = partitions_in_window(now, self.retention)
            .into_iter()
            .filter_map(|day| partitions.get(&day)?.get(message_id))
            .find(|record| !record.is_expired(now))
            .cloned();
        Ok(found)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let mut partitions = self.partitions.write();
        let stale: Vec<NaiveDate> = partitions
            .keys()
            .copied()
            .filter(|day| partition_end(*day) <= cutoff)
            .collect();

        let mut removed = 0;
        for day in stale {
            if let Some(records) = partitions.remove(&day) {
                removed += records.len();
            }
        }
        Ok(removed)
    }

    fn retention(&self) -> Duration {
        self.retention
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const TTL: Duration = Duration::from_secs(3600);

    fn record(id: &str, processed_at: DateTime<Utc>) -> DeduplicationRecord {
        DeduplicationRecord::new(id, "render", processed_at, TTL)
    }

    #[tokio::test]
    async fn test_append_and_lookup() {
        let log = InMemoryDedupLog::new(TTL);
        let processed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        log.append(&record("abc", processed)).await.unwrap();

        let found = log
            .lookup("abc", processed + chrono::Duration::minutes(5))
            .await
            .unwrap();
        assert_eq!(found.map(|r| r.message_id), Some("abc".to_string()));
        assert!(log
            .lookup("other", processed)
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_lookup_crosses_midnight() {
        let log = InMemoryDedupLog::new(TTL);
        let processed = Utc.with_ymd_and_hms(2024, 5, 1, 23, 50, 0).unwrap();
        log.append(&record("abc", processed)).await.unwrap();

        let after_midnight = Utc.with_ymd_and_hms(2024, 5, 2, 0, 10, 0).unwrap();
        assert!(log.lookup("abc", after_midnight).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_expired_record_is_not_returned() {
        let log = InMemoryDedupLog::new(TTL);
        let processed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        log.append(&record("abc", processed)).await.unwrap();

        let later = processed + chrono::Duration::hours(2);
        assert!(log.lookup("abc", later).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_append_rejects_record_outliving_retention() {
        let log = InMemoryDedupLog::new(TTL);
        let now = Utc.with_ymd_and_hms(2024, 5, 3, 12, 0, 0).unwrap();
        let processed = now - chrono::Duration::days(2);
        let long_lived =
            DeduplicationRecord::new("abc", "render", processed, Duration::from_secs(3 * 86_400));
        assert!(!long_lived.is_expired(now));

        assert!(matches!(
            log.append(&long_lived).await,
            Err(RepositoryError::InvalidData(_))
        ));
        assert_eq!(log.record_count(), 0);
    }

    #[tokio::test]
    async fn test_record_found_until_expiry_at_full_retention() {
        let retention = Duration::from_secs(3 * 86_400);
        let log = InMemoryDedupLog::new(retention);
        let processed = Utc.with_ymd_and_hms(2024, 5, 1, 12, 0, 0).unwrap();
        log.append(&DeduplicationRecord::new("abc", "render", processed, retention))
            .await
            .unwrap();

        let just_before = processed + chrono::Duration::days(3) - chrono::Duration::seconds(1);
        assert!(log.lookup("abc", just_before).await.unwrap().is_some());
        let at_expiry = processed + chrono::Duration::days(3);
        assert!(log.lookup("abc", at_expiry).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_prune_drops_whole_days_only() {
        let log = InMemoryDedupLog::new(TTL);
        let day_one = Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap();
        let day_two = Utc.with_ymd_and_hms(2024, 5, 2, 10, 0, 0).unwrap();
        log.append(&record("a", day_one)).await.unwrap();
        log.append(&record("b", day_one)).await.unwrap();
        log.append(&record("c", day_two)).await.unwrap();

        // Cutoff inside day two: only day one has fully ended.
        let cutoff = Utc.with_ymd_and_hms(2024, 5, 2, 12, 0, 0).unwrap();
        assert_eq!(log.prune_older_than(cutoff).await.unwrap(), 2);
        assert_eq!(log.partition_count(), 1);
        assert_eq!(log.record_count(), 1);
    }
}
