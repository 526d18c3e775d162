use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::VecDeque;

use crate::models::{ProcessingDurationSample, RepositoryError};

use super::{DurationSampleStore, SampleWindow};

#[derive(Debug, Default)]
pub struct InMemoryDurationSampleStore {
    samples: DashMap<String, VecDeque<ProcessingDurationSample>>, // operation_type -> newest first
    window: SampleWindow,
}

impl InMemoryDurationSampleStore {
    pub fn new(window: SampleWindow) -> Self {
        Self {
            samples: DashMap::new(),
            window,
        }
    }

    pub fn len(&self, operation_type: &str) -> usize {
        self.samples
            .get(operation_type)
            .map(|entries| entries.len())
            .unwrap_or_default()
    }
}

#[async_trait]
impl DurationSampleStore for InMemoryDurationSampleStore {
    async fn record(&self, sample: &ProcessingDurationSample) -> Result<(), RepositoryError> {
        let mut entries = self
            .samples
            .entry(sample.operation_type.clone())
            .or_default();
        entries.push_front(sample.clone());
        entries.truncate(self.window.max_samples.max(1));
        Ok(())
    }

    async fn recent(
        &self,
        operation_type: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<ProcessingDurationSample>, RepositoryError> {
        Ok(self
            .samples
            .get(operation_type)
            .map(|entries| {
                entries
                    .iter()
                    .filter(|s| self.window.is_fresh(s, now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ProcessingOutcome;
    use std::time::Duration;

    fn sample(op: &str, ms: u64, recorded_at: DateTime<Utc>) -> ProcessingDurationSample {
        ProcessingDurationSample::new(
            op,
            Duration::from_millis(ms),
            ProcessingOutcome::Succeeded,
            recorded_at,
        )
    }

    #[tokio::test]
    async fn test_window_keeps_newest() {
        let store = InMemoryDurationSampleStore::new(SampleWindow {
            max_samples: 3,
            max_age: Duration::from_secs(3600),
        });
        let now = Utc::now();
        for ms in [10, 20, 30, 40] {
            store.record(&sample("render", ms, now)).await.unwrap();
        }

        let recent = store.recent("render", now).await.unwrap();
        let durations: Vec<u64> = recent.iter().map(|s| s.duration_ms).collect();
        assert_eq!(durations, vec![40, 30, 20]);
        assert!(store.recent("build", now).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_stale_samples_are_skipped() {
        let store = InMemoryDurationSampleStore::new(SampleWindow {
            max_samples: 10,
            max_age: Duration::from_secs(3600),
        });
        let now = Utc::now();
        store
            .record(&sample("render", 10, now - chrono::Duration::hours(2)))
            .await
            .unwrap();
        store.record(&sample("render", 20, now)).await.unwrap();

        let recent = store.recent("render", now).await.unwrap();
        assert_eq!(recent.len(), 1);
        assert_eq!(recent[0].duration_ms, 20);
        assert_eq!(store.len("render"), 2);
    }
}
