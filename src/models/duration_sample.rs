use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

/// How a processing attempt ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingOutcome {
    Succeeded,
    RetryableFailure,
    FatalFailure,
}

impl ProcessingOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::RetryableFailure => "retryable_failure",
            Self::FatalFailure => "fatal_failure",
        }
    }
}

impl fmt::Display for ProcessingOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Duration of one completed or failed processing attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessingDurationSample {
    pub operation_type: String,
    pub duration_ms: u64,
    pub recorded_at: DateTime<Utc>,
    #[serde(default = "default_outcome")]
    pub outcome: ProcessingOutcome,
}

fn default_outcome() -> ProcessingOutcome {
    ProcessingOutcome::Succeeded
}

impl ProcessingDurationSample {
    pub fn new(
        operation_type: impl Into<String>,
        duration: Duration,
        outcome: ProcessingOutcome,
        recorded_at: DateTime<Utc>,
    ) -> Self {
        Self {
            operation_type: operation_type.into(),
            duration_ms: u64::try_from(duration.as_millis()).unwrap_or(u64::MAX),
            recorded_at,
            outcome,
        }
    }
}
