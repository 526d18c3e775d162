use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::constants::DEAD_LETTER_MAX_ENTRIES;
use crate::models::{DeadLetterRecord, RepositoryError};

use super::DeadLetterLog;

#[derive(Debug, Default)]
pub struct InMemoryDeadLetterLog {
    entries: DashMap<String, VecDeque<DeadLetterRecord>>, // operation_type -> newest first
}

impl InMemoryDeadLetterLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn count(&self, operation_type: &str) -> usize {
        self.entries
            .get(operation_type)
            .map(|entries| entries.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DeadLetterLog for InMemoryDeadLetterLog {
    async fn record(&self, record: &DeadLetterRecord) -> Result<(), RepositoryError> {
        let mut entries = self
            .entries
            .entry(record.operation_type.clone())
            .or_default();
        entries.push_front(record.clone());
        entries.truncate(DEAD_LETTER_MAX_ENTRIES as usize);
        Ok(())
    }

    async fn list(
        &self,
        operation_type: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterRecord>, RepositoryError> {
        Ok(self
            .entries
            .get(operation_type)
            .map(|entries| entries.iter().take(limit).cloned().collect())
            .unwrap_or_default())
    }
}
