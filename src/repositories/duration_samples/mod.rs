//! Processing-duration sample storage.
//!
//! Keeps a bounded, most-recent-first window of samples per operation type.
//! Samples older than the configured maximum age are ignored on read.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

mod duration_samples_in_memory;
mod duration_samples_redis;

pub use duration_samples_in_memory::InMemoryDurationSampleStore;
pub use duration_samples_redis::RedisDurationSampleStore;

use crate::constants::{DEFAULT_SAMPLE_MAX_AGE_HOURS, DEFAULT_SAMPLE_WINDOW_SIZE};
use crate::models::{ProcessingDurationSample, RepositoryError};

#[cfg_attr(test, automock)]
#[async_trait]
pub trait DurationSampleStore: Send + Sync {
    async fn record(&self, sample: &ProcessingDurationSample) -> Result<(), RepositoryError>;

    /// Most recent samples for `operation_type` that are not older than the window's max age.
    async fn recent(
        &self,
        operation_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProcessingDurationSample>, RepositoryError>;
}

/// Bounds of the per-operation sample window.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleWindow {
    pub max_samples: usize,
    pub max_age: Duration,
}

impl Default for SampleWindow {
    fn default() -> Self {
        Self {
            max_samples: DEFAULT_SAMPLE_WINDOW_SIZE,
            max_age: Duration::from_secs(DEFAULT_SAMPLE_MAX_AGE_HOURS * 3600),
        }
    }
}

impl SampleWindow {
    pub(crate) fn is_fresh(&self, sample: &ProcessingDurationSample, now: DateTime<Utc>) -> bool {
        match chrono::Duration::from_std(self.max_age) {
            Ok(max_age) => sample.recorded_at >= now - max_age,
            Err(_) => true,
        }
    }
}
