//! Redis-backed dead-letter log: a capped list per operation type at
//! `{prefix}:dead_letter:{operation_type}`, newest first.

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::debug;

use crate::constants::DEAD_LETTER_MAX_ENTRIES;
use crate::models::{DeadLetterRecord, RepositoryError};
use crate::repositories::redis_base::RedisRepository;

use super::DeadLetterLog;

const DEAD_LETTER_PREFIX: &str = "dead_letter";

#[derive(Clone)]
pub struct RedisDeadLetterLog {
    connection_manager: Arc<ConnectionManager>,
    key_prefix: String,
}

impl std::fmt::Debug for RedisDeadLetterLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDeadLetterLog")
            .field("key_prefix", &self.key_prefix)
            .finish()
    }
}

impl RedisRepository for RedisDeadLetterLog {}

impl RedisDeadLetterLog {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        key_prefix: String,
    ) -> Result<Self, RepositoryError> {
        if key_prefix.is_empty() {
            return Err(RepositoryError::InvalidData(
                "Redis key prefix cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            connection_manager,
            key_prefix,
        })
    }

    fn dead_letter_key(&self, operation_type: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, DEAD_LETTER_PREFIX, operation_type)
    }
}

#[async_trait]
impl DeadLetterLog for RedisDeadLetterLog {
    async fn record(&self, record: &DeadLetterRecord) -> Result<(), RepositoryError> {
        let key = self.dead_letter_key(&record.operation_type);
        let json = self.serialize_entity(record, |r| &r.message_id, "dead letter")?;

        let mut conn = self.connection_manager.as_ref().clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(&key, json);
        pipe.ltrim(&key, 0, DEAD_LETTER_MAX_ENTRIES - 1);
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "dead_letter_record"))?;

        debug!(message_id = %record.message_id, key = %key, "recorded dead letter");
        Ok(())
    }

    async fn list(
        &self,
        operation_type: &str,
        limit: usize,
    ) -> Result<Vec<DeadLetterRecord>, RepositoryError> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let key = self.dead_letter_key(operation_type);
        let stop = isize::try_from(limit).unwrap_or(isize::MAX) - 1;

        let mut conn = self.connection_manager.as_ref().clone();
        let values: Vec<String> = conn
            .lrange(&key, 0, stop)
            .await
            .map_err(|e| self.map_redis_error(e, "dead_letter_list"))?;

        values
            .iter()
            .map(|json| self.deserialize_entity(json, operation_type, "dead letter"))
            .collect()
    }
}
