//! Redis-backed duration samples: one capped list per operation type at
//! `{prefix}:duration_samples:{operation_type}`, newest first.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use redis::aio::ConnectionManager;
use redis::AsyncCommands;
use std::sync::Arc;
use tracing::warn;

use crate::models::{ProcessingDurationSample, RepositoryError};
use crate::repositories::redis_base::RedisRepository;

use super::{DurationSampleStore, SampleWindow};

const SAMPLES_PREFIX: &str = "duration_samples";

#[derive(Clone)]
pub struct RedisDurationSampleStore {
    connection_manager: Arc<ConnectionManager>,
    key_prefix: String,
    window: SampleWindow,
}

impl std::fmt::Debug for RedisDurationSampleStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedisDurationSampleStore")
            .field("key_prefix", &self.key_prefix)
            .field("window", &self.window)
            .finish()
    }
}

impl RedisRepository for RedisDurationSampleStore {}

impl RedisDurationSampleStore {
    pub fn new(
        connection_manager: Arc<ConnectionManager>,
        key_prefix: String,
        window: SampleWindow,
    ) -> Result<Self, RepositoryError> {
        if key_prefix.is_empty() {
            return Err(RepositoryError::InvalidData(
                "Redis key prefix cannot be empty".to_string(),
            ));
        }

        Ok(Self {
            connection_manager,
            key_prefix,
            window,
        })
    }

    fn samples_key(&self, operation_type: &str) -> String {
        format!("{}:{}:{}", self.key_prefix, SAMPLES_PREFIX, operation_type)
    }

    fn last_index(&self) -> isize {
        isize::try_from(self.window.max_samples.max(1)).unwrap_or(isize::MAX) - 1
    }
}

#[async_trait]
impl DurationSampleStore for RedisDurationSampleStore {
    async fn record(&self, sample: &ProcessingDurationSample) -> Result<(), RepositoryError> {
        let key = self.samples_key(&sample.operation_type);
        let json = self.serialize_entity(sample, |s| &s.operation_type, "duration sample")?;

        let mut conn = self.connection_manager.as_ref().clone();
        let mut pipe = redis::pipe();
        pipe.atomic();
        pipe.lpush(&key, json);
        pipe.ltrim(&key, 0, self.last_index());
        pipe.query_async::<()>(&mut conn)
            .await
            .map_err(|e| self.map_redis_error(e, "duration_sample_record"))?;
        Ok(())
    }

    async fn recent(
        &self,
        operation_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProcessingDurationSample>, RepositoryError> {
        let key = self.samples_key(operation_type);
        let mut conn = self.connection_manager.as_ref().clone();
        let values: Vec<String> = conn
            .lrange(&key, 0, self.last_index())
            .await
            .map_err(|e| self.map_redis_error(e, "duration_sample_recent"))?;

        // A corrupt entry should not block lease sizing; skip it.
        let samples = values
            .iter()
            .filter_map(|json| {
                match self.deserialize_entity::<ProcessingDurationSample>(
                    json,
                    operation_type,
                    "duration sample",
                ) {
                    Ok(sample) => Some(sample),
                    Err(e) => {
                        warn!(operation_type = %operation_type, error = %e, "skipping unreadable duration sample");
                        None
                    }
                }
            })
            .filter(|sample| self.window.is_fresh(sample, now))
            .collect();
        Ok(samples)
    }
}
