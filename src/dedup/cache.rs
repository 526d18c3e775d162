//! Bounded in-process TTL cache of deduplication records.

use chrono::{DateTime, Utc};
use dashmap::DashMap;

use crate::models::DeduplicationRecord;

#[derive(Debug)]
pub struct RecordCache {
    entries: DashMap<String, DeduplicationRecord>,
    capacity: usize,
}

impl RecordCache {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: DashMap::new(),
            capacity: capacity.max(1),
        }
    }

    /// Unexpired record for `message_id`. Expired entries are dropped on sight.
    pub fn get(&self, message_id: &str, now: DateTime<Utc>) -> Option<DeduplicationRecord> {
        let record = self.entries.get(message_id).map(|r| r.clone())?;
        if record.is_expired(now) {
            self.entries.remove(message_id);
            return None;
        }
        Some(record)
    }

    pub fn insert(&self, record: DeduplicationRecord, now: DateTime<Utc>) {
        if !self.entries.contains_key(&record.message_id) && self.entries.len() >= self.capacity {
            self.make_room(now);
        }
        self.entries.insert(record.message_id.clone(), record);
    }

    /// Removes expired entries and returns how many were dropped.
    pub fn sweep_expired(&self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, record| !record.is_expired(now));
        before.saturating_sub(self.entries.len())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Sweeps expired entries, then evicts the oldest until one slot is free.
    fn make_room(&self, now: DateTime<Utc>) {
        self.sweep_expired(now);
        if self.entries.len() < self.capacity {
            return;
        }

        let mut by_age: Vec<(DateTime<Utc>, String)> = self
            .entries
            .iter()
            .map(|entry| (entry.processed_at, entry.key().clone()))
            .collect();
        by_age.sort_unstable();

        // Concurrent removals may shrink the map after the check above.
        let excess = (by_age.len() + 1).saturating_sub(self.capacity);
        for (_, message_id) in by_age.into_iter().take(excess) {
            self.entries.remove(&message_id);
        }
    }
}
