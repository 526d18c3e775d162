//! Dead-letter log for poison messages.
//!
//! A poison message is removed from the queue once recorded here, so this log
//! is the only remaining copy of its body.

use async_trait::async_trait;

#[cfg(test)]
use mockall::automock;

mod dead_letter_in_memory;
mod dead_letter_redis;

pub use dead_letter_in_memory::InMemoryDeadLetterLog;
pub use dead_letter_redis::RedisDeadLetterLog;

use crate::models::{DeadLetterRecord, RepositoryError};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DeadLetterLog: Send + Sync {
    async fn record(&self, record: &DeadLetterRecord) -> Result<(), RepositoryError>;

    /// Newest entries first.
    async fn list(
        &self,
        operation_type: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterRecord>, RepositoryError>;
}
