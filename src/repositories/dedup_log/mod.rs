//! Durable deduplication log.
//!
//! Append-only records of successfully processed message ids, partitioned by
//! UTC day so lookups only touch the partitions inside the retention window
//! and pruning drops whole partitions.
//!
//! - [`InMemoryDedupLog`]: process-local storage for tests/development
//! - [`RedisDedupLog`]: Redis-backed storage shared across worker instances

use async_trait::async_trait;
use chrono::{DateTime, Days, NaiveDate, Utc};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

mod dedup_log_in_memory;
mod dedup_log_redis;

pub use dedup_log_in_memory::InMemoryDedupLog;
pub use dedup_log_redis::RedisDedupLog;

use crate::models::{DeduplicationRecord, RepositoryError};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DedupLog: Send + Sync {
    /// Appends a record to the partition of its `processed_at` day.
    ///
    /// Concurrent appends for the same id are allowed; the last one wins.
    async fn append(&self, record: &DeduplicationRecord) -> Result<(), RepositoryError>;

    /// Finds an unexpired record for `message_id` within the retention window ending at `now`.
    async fn lookup(
        &self,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DeduplicationRecord>, RepositoryError>;

    /// Removes every partition whose day ended at or before `cutoff`.
    ///
    /// Returns the number of records removed.
    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError>;

    /// Longest record lifetime the log can serve; lookups search this far back.
    fn retention(&self) -> Duration;
}

/// Rejects records that would outlive the lookup window.
pub(crate) fn ensure_within_retention(
    record: &DeduplicationRecord,
    retention: Duration,
) -> Result<(), RepositoryError> {
    let limit = chrono::Duration::from_std(retention)
        .ok()
        .and_then(|retention| record.processed_at.checked_add_signed(retention))
        .unwrap_or(DateTime::<Utc>::MAX_UTC);
    if record.ttl_expires_at > limit {
        return Err(RepositoryError::InvalidData(format!(
            "dedup record {} expires at {}, beyond the {}s retention of the log",
            record.message_id,
            record.ttl_expires_at,
            retention.as_secs()
        )));
    }
    Ok(())
}

/// Day partitions that may hold records still alive at `now`, newest first.
pub(crate) fn partitions_in_window(now: DateTime<Utc>, retention: Duration) -> Vec<NaiveDate> {
    let retention = chrono::Duration::from_std(retention).unwrap_or(chrono::Duration::days(3650));
    let newest = now.date_naive();
    let oldest = now
        .checked_sub_signed(retention)
        .map(|start| start.date_naive())
        .unwrap_or(NaiveDate::MIN);

    let mut days = Vec::new();
    let mut day = newest;
    while day >= oldest {
        days.push(day);
        match day.checked_sub_days(Days::new(1)) {
            Some(previous) => day = previous,
            None => break,
        }
    }
    days
}

/// First instant after the partition's day.
pub(crate) fn partition_end(day: NaiveDate) -> DateTime<Utc> {
    day.checked_add_days(Days::new(1))
        .and_then(|next| next.and_hms_opt(0, 0, 0))
        .map(|midnight| midnight.and_utc())
        .unwrap_or(DateTime::<Utc>::MAX_UTC)
}
