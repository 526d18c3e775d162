//! Scheduler state: the pure part of the polling loop.
//!
//! [`PollingState`] is owned by the loop and only changed through the
//! transition methods below, so the backoff rules can be tested without any
//! queue or clock. [`WorkerStatus`] is the snapshot published to the host.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::time::Duration;

use crate::constants::CLAIM_ERRORS_BEFORE_DEGRADED;
use crate::utils::{claim_error_backoff, exponential_backoff};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SchedulerState {
    Claiming,
    Processing,
    IdleBackoff,
    Terminating,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Health {
    Healthy,
    /// Claims keep failing; the worker still retries.
    Degraded,
}

/// Per-instance polling state. Never persisted.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PollingState {
    pub consecutive_empty_polls: u32,
    pub current_backoff: Duration,
    pub last_activity_at: DateTime<Utc>,
    pub consecutive_claim_errors: u32,
    pub health: Health,
}

impl PollingState {
    pub fn new(now: DateTime<Utc>) -> Self {
        Self {
            consecutive_empty_polls: 0,
            current_backoff: Duration::ZERO,
            last_activity_at: now,
            consecutive_claim_errors: 0,
            health: Health::Healthy,
        }
    }

    /// A non-empty batch was claimed.
    pub fn on_batch(&mut self, now: DateTime<Utc>) {
        self.consecutive_empty_polls = 0;
        self.current_backoff = Duration::ZERO;
        self.last_activity_at = now;
        self.clear_claim_errors();
    }

    /// An empty batch was claimed. Returns how long to sleep before the next claim.
    pub fn on_empty_poll(&mut self, base: Duration, max: Duration) -> Duration {
        self.consecutive_empty_polls = self.consecutive_empty_polls.saturating_add(1);
        self.current_backoff = idle_backoff(base, max, self.consecutive_empty_polls);
        self.clear_claim_errors();
        self.current_backoff
    }

    /// A claim failed. Returns how long to wait before retrying.
    pub fn on_claim_error(&mut self, retryable: bool) -> Duration {
        self.consecutive_claim_errors = self.consecutive_claim_errors.saturating_add(1);
        if !retryable || self.consecutive_claim_errors >= CLAIM_ERRORS_BEFORE_DEGRADED {
            self.health = Health::Degraded;
        }
        claim_error_backoff(self.consecutive_claim_errors)
    }

    /// Batch processing finished.
    pub fn on_batch_complete(&mut self, now: DateTime<Utc>) {
        self.last_activity_at = now;
    }

    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    fn clear_claim_errors(&mut self) {
        self.consecutive_claim_errors = 0;
        self.health = Health::Healthy;
    }
}

/// Sleep after the `empty_polls`-th empty claim in a row: `base * 2^(n-1)`, capped at `max`.
pub fn idle_backoff(base: Duration, max: Duration, empty_polls: u32) -> Duration {
    if empty_polls == 0 {
        return Duration::ZERO;
    }
    exponential_backoff(base, max, empty_polls)
}

/// Snapshot of the scheduler for the host process and its autoscaler.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WorkerStatus {
    pub operation_type: String,
    pub state: SchedulerState,
    pub health: Health,
    pub consecutive_empty_polls: u32,
    pub current_backoff: Duration,
    pub last_activity_at: DateTime<Utc>,
    pub in_flight: usize,
}

impl WorkerStatus {
    pub fn new(
        operation_type: impl Into<String>,
        state: SchedulerState,
        polling: &PollingState,
        in_flight: usize,
    ) -> Self {
        Self {
            operation_type: operation_type.into(),
            state,
            health: polling.health,
            consecutive_empty_polls: polling.consecutive_empty_polls,
            current_backoff: polling.current_backoff,
            last_activity_at: polling.last_activity_at,
            in_flight,
        }
    }

    pub fn idle_duration(&self, now: DateTime<Utc>) -> Duration {
        (now - self.last_activity_at)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// True when nothing is in flight and the worker has been idle for at least `threshold`.
    pub fn safe_to_terminate(&self, threshold: Duration) -> bool {
        self.safe_to_terminate_at(threshold, Utc::now())
    }

    pub fn safe_to_terminate_at(&self, threshold: Duration, now: DateTime<Utc>) -> bool {
        let idle_state = matches!(
            self.state,
            SchedulerState::IdleBackoff | SchedulerState::Terminating
        );
        idle_state && self.in_flight == 0 && self.idle_duration(now) >= threshold
    }
}
