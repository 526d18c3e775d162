//! Deletion of processed messages.
//!
//! A delete is retried a bounded number of times with jittered pauses. A
//! `NotFound` answer counts as success because someone already removed the
//! message. After a successful delete the queue can optionally be asked
//! whether the message is really gone; a mismatch is only a warning since the
//! dedup record already prevents reprocessing.

use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::constants::{
    DEFAULT_DELETE_MAX_ATTEMPTS, DELETE_RETRY_MAX_DELAY_MS, DELETE_RETRY_MIN_DELAY_MS,
};
use crate::metrics::{DELETE_ATTEMPTS, DELETIONS_TOTAL};
use crate::models::LeasedMessage;
use crate::queues::{DeleteResult, MessagePresence, QueueService};

const UNKNOWN_MESSAGE_ID: &str = "unknown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionPolicy {
    pub max_attempts: u32,
    pub min_delay: Duration,
    pub max_delay: Duration,
    /// Peek after a successful delete.
    pub verify: bool,
}

impl Default for DeletionPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_DELETE_MAX_ATTEMPTS,
            min_delay: Duration::from_millis(DELETE_RETRY_MIN_DELAY_MS),
            max_delay: Duration::from_millis(DELETE_RETRY_MAX_DELAY_MS),
            verify: true,
        }
    }
}

impl DeletionPolicy {
    fn retry_delay(&self) -> Duration {
        let min = self.min_delay.as_millis() as u64;
        let max = (self.max_delay.as_millis() as u64).max(min);
        Duration::from_millis(rand::rng().random_range(min..=max))
    }
}

/// Post-delete existence check result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verification {
    Confirmed,
    /// The delete call succeeded but the queue still reports the message.
    StillPresent,
    /// The queue cannot answer lookups, or the lookup failed.
    Unverifiable,
    Skipped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeletionOutcome {
    Deleted {
        /// The queue answered `NotFound`.
        already_gone: bool,
        verification: Verification,
    },
    Failed {
        reason: String,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeletionReport {
    pub message_id: String,
    pub outcome: DeletionOutcome,
    /// Delete calls made, including the successful one.
    pub attempts: u32,
    pub elapsed: Duration,
}

impl DeletionReport {
    pub fn is_deleted(&self) -> bool {
        matches!(self.outcome, DeletionOutcome::Deleted { .. })
    }

    fn result_label(&self) -> &'static str {
        match self.outcome {
            DeletionOutcome::Deleted {
                already_gone: true, ..
            } => "already_gone",
            DeletionOutcome::Deleted { .. } => "deleted",
            DeletionOutcome::Failed { .. } => "failed",
        }
    }
}

pub struct DeletionManager {
    queue: Arc<dyn QueueService>,
    policy: DeletionPolicy,
}

impl std::fmt::Debug for DeletionManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeletionManager")
            .field("backend", &self.queue.backend_name())
            .field("policy", &self.policy)
            .finish()
    }
}

impl DeletionManager {
    pub fn new(queue: Arc<dyn QueueService>, policy: DeletionPolicy) -> Self {
        Self { queue, policy }
    }

    pub fn policy(&self) -> &DeletionPolicy {
        &self.policy
    }

    pub async fn delete_with_confirmation(&self, message: &LeasedMessage) -> DeletionReport {
        self.delete_by_receipt(
            Some(message.id()),
            &message.message.receipt_handle,
            &message.operation_type,
        )
        .await
    }

    /// Deletes by receipt handle alone, for messages whose envelope never
    /// validated. Without a message id the post-delete check is unverifiable.
    pub async fn delete_by_receipt(
        &self,
        message_id: Option<&str>,
        receipt_handle: &str,
        operation_type: &str,
    ) -> DeletionReport {
        let started = Instant::now();
        let max_attempts = self.policy.max_attempts.max(1);
        let display_id = message_id.unwrap_or(UNKNOWN_MESSAGE_ID);

        let mut attempts = 0;
        let outcome = loop {
            attempts += 1;
            match self.queue.delete(receipt_handle).await {
                Ok(result) => {
                    let already_gone = result == DeleteResult::NotFound;
                    let verification = self.verify(message_id, operation_type).await;
                    break DeletionOutcome::Deleted {
                        already_gone,
                        verification,
                    };
                }
                Err(e) if !e.is_retryable() => {
                    break DeletionOutcome::Failed {
                        reason: e.to_string(),
                    };
                }
                Err(e) if attempts >= max_attempts => {
                    break DeletionOutcome::Failed {
                        reason: format!("gave up after {attempts} attempts: {e}"),
                    };
                }
                Err(e) => {
                    let delay = self.policy.retry_delay();
                    debug!(
                        message_id = %display_id,
                        attempt = attempts,
                        delay_ms = delay.as_millis() as u64,
                        error = %e,
                        "delete failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        };

        let report = DeletionReport {
            message_id: display_id.to_string(),
            outcome,
            attempts,
            elapsed: started.elapsed(),
        };
        self.record(operation_type, &report);
        report
    }

    async fn verify(&self, message_id: Option<&str>, operation_type: &str) -> Verification {
        if !self.policy.verify {
            return Verification::Skipped;
        }
        let Some(message_id) = message_id else {
            return Verification::Unverifiable;
        };

        match self.queue.peek(message_id).await {
            Ok(MessagePresence::NotFound) => Verification::Confirmed,
            Ok(MessagePresence::Exists) => {
                warn!(
                    message_id = %message_id,
                    operation_type = %operation_type,
                    "message still present after successful delete"
                );
                Verification::StillPresent
            }
            Ok(MessagePresence::Unknown) => Verification::Unverifiable,
            Err(e) => {
                debug!(message_id = %message_id, error = %e, "post-delete check failed");
                Verification::Unverifiable
            }
        }
    }

    fn record(&self, operation_type: &str, report: &DeletionReport) {
        DELETIONS_TOTAL
            .with_label_values(&[operation_type, report.result_label()])
            .inc();
        DELETE_ATTEMPTS
            .with_label_values(&[operation_type])
            .observe(report.attempts as f64);

        if let DeletionOutcome::Failed { reason } = &report.outcome {
            error!(
                message_id = %report.message_id,
                operation_type = %operation_type,
                attempts = report.attempts,
                reason = %reason,
                "failed to delete processed message"
            );
        }
    }
}
