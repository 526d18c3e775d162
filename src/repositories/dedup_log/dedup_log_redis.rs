//! Redis-backed deduplication log.
//!
//! Layout:
//! - `{prefix}:dedup:{YYYY-MM-DD}`: hash of message id to JSON record for one UTC day,
//!   expiring at the end of the day plus the retention window
//! - `{prefix}:dedup:partitions`: sorted set of partition days scored by day start

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

use crate::models::{DeduplicationRecord, RepositoryError};
use crate::repositories::redis_base::RedisRepository;

use super::{ensure_within_retention, partition_end, partitions_in_window, DedupLog};

const DEDUP_PREFIX: &str = "dedup";
const PARTITION_INDEX: &str = "partitions";
const SECONDS_PER_DAY: i64 = 86_400;

#[derive(Clone)]
pub struct RedisDedupLog {
    connection_manager: Arc<ConnectionManager>,
    key_prefix: String,
    retention: Duration,
}

impl std::fmt::Debug for RedisDedupLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDedupLog")
            .field("key_prefix", &self.key_prefix)
            .field("retention", &self.retention)
            .finish()
    }
}

impl RedisRepository for RedisDedupLog {}

impl RedisDedupLog {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        key_prefix: String,
        retention: Duration,
    ) -> Result<Self, RepositoryError> {
        if key_prefix.is_empty() {
            return Err(RepositoryError::InvalidData(
                "Redis key prefix cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            connection_manager,
            key_prefix,
            retention,
        })
    }

    fn partition_key(&self, day: NaiveDate) -> String {
        format!("{}:{}:{}", self.key_prefix, DEDUP_PREFIX, day.format("%Y-%m-%d"))
    }

    fn partition_index_key(&self) -> String {
        format!("{}:{}:{}", self.key_prefix, DEDUP_PREFIX, PARTITION_INDEX)
    }

    fn partition_expiry(&self, day: NaiveDate) -> i64 {
        let retention = i64::try_from(self.retention.as_secs()).unwrap_or(i64::MAX);
        partition_end(day).timestamp().saturating_add(retention)
    }
}

fn day_start(day: NaiveDate) -> i64 {
    day.and_hms_opt(0, 0, 0)
        .map(|midnight| midnight.and_utc().timestamp())
        .unwrap_or_default()
}

#[async_trait]
impl DedupLog for RedisDedupLog {
    async fn append(&self, record: &DeduplicationRecord) -> Result<(), RepositoryError> {
        ensure_within_retention(record, self.retention)?;
        let day = record.partition();
        let key = self.partition_key(day);
        let json = self.serialize_entity(record, |r| &r.message_id, "dedup record")?;

        let mut conn = self.connection_manager.as_ref().clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.hset(&key, &record.message_id, json);
        pipe.expire_at(&key, self.partition_expiry(day));
        pipe.zadd(
            self.partition_index_key(),
            day.format("%Y-%m-%d").to_string(),
            day_start(day),
        );

        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "dedup_append"))?;

        debug!(message_id = %record.message_id, partition = %day, "appended dedup record");
        Ok(())
    }

    async fn lookup(
        &self,
        message_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Option<DeduplicationRecord>, RepositoryError> {
        let days = partitions_in_window(now, self.retention);
        let mut conn = self.connection_manager.as_ref().clone();

        let mut pipe = redis::pipe();
        for day in &days {
            pipe.hget(self.partition_key(*day), message_id);
        }
        let values: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "dedup_lookup"))?;

        for json in values.into_iter().flatten() {
            let record: DeduplicationRecord =
                self.deserialize_entity(&json, message_id, "dedup record")?;
            if !record.is_expired(now) {
                return Ok(Some(record));
            }
        }
        Ok(None)
    }

    async fn prune_older_than(&self, cutoff: DateTime<Utc>) -> Result<usize, RepositoryError> {
        let index_key = self.partition_index_key();
        let mut conn = self.connection_manager.as_ref().clone();

        let max_start = cutoff.timestamp().saturating_sub(SECONDS_PER_DAY);
        let stale: Vec<String> = conn
            .zrangebyscore(&index_key, "-inf", max_start)
            .await
            .map_err(|e| self.map_redis_error(e, "dedup_prune_scan"))?;

        if stale.is_empty() {
            return Ok(0);
        }

        let keys: Vec<String> = stale
            .iter()
            .map(|day| format!("{}:{}:{}", self.key_prefix, DEDUP_PREFIX, day))
            .collect();

        let mut count_pipe = redis::pipe();
        for key in &keys {
            count_pipe.hlen(key);
        }
        let counts: Vec<usize> = count_pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "dedup_prune_count"))?;

        let mut pipe = redis::pipe();
        pipe.atomic();
        for key in &keys {
            pipe.del(key);
        }
        pipe.zrem(&index_key, &stale);
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "dedup_prune_delete"))?;

        let removed = counts.into_iter().sum();
        debug!(partitions = keys.len(), records = removed, "pruned dedup partitions");
        Ok(removed)
    }

    fn retention(&self) -> Duration {
        self.retention
    }
}
