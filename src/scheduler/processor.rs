//! Handling of a single claimed message.
//!
//! Order per message: dedup check, poison check, lease margin check, handler,
//! then on success dedup commit and deletion. Every handler run is recorded as
//! a duration sample so the next claim sizes its lease from fresh data.

use chrono::Utc;
use futures::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use crate::constants::{DEFAULT_LEASE_SAFETY_MARGIN_SECS, DEFAULT_POISON_MESSAGE_THRESHOLD};
use crate::dedup::{DedupCheck, DeduplicationStore, Reservation};
use crate::deletion::{DeletionManager, DeletionReport};
use crate::lease::UtilizationMonitor;
use crate::metrics::{
    DEDUP_UNKNOWN_TOTAL, LEASE_UTILIZATION_RATIO, MESSAGES_TOTAL, PROCESSING_DURATION,
};
use crate::models::{
    DeadLetterRecord, LeasedMessage, MalformedMessage, ProcessingDurationSample,
    ProcessingOutcome,
};
use crate::repositories::{DeadLetterLog, DurationSampleStore};

use super::{HandlerError, MessageHandler};

/// Terminal outcome of one claimed message, also the `outcome` metric label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageOutcome {
    Succeeded,
    /// Already processed; deleted without calling the handler.
    Duplicate,
    RetryableFailure,
    FatalFailure,
    /// Dequeue count above the threshold; dead-lettered.
    Poison,
    /// Too little lease left to start the handler.
    LeaseTooShort,
    /// Another task in this process holds the message id.
    InFlight,
    /// Envelope failed validation; left for redelivery until it turns poison.
    Malformed,
}

impl MessageOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Succeeded => "succeeded",
            Self::Duplicate => "duplicate",
            Self::RetryableFailure => "retryable_failure",
            Self::FatalFailure => "fatal_failure",
            Self::Poison => "poison",
            Self::LeaseTooShort => "lease_too_short",
            Self::InFlight => "in_flight",
            Self::Malformed => "malformed",
        }
    }
}

impl From<ProcessingOutcome> for MessageOutcome {
    fn from(outcome: ProcessingOutcome) -> Self {
        match outcome {
            ProcessingOutcome::Succeeded => Self::Succeeded,
            ProcessingOutcome::RetryableFailure => Self::RetryableFailure,
            ProcessingOutcome::FatalFailure => Self::FatalFailure,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessorConfig {
    /// Messages delivered more often than this are dead-lettered.
    pub poison_threshold: u32,
    /// Minimum remaining lease required to start the handler.
    pub lease_safety_margin: Duration,
}

impl Default for ProcessorConfig {
    fn default() -> Self {
        Self {
            poison_threshold: DEFAULT_POISON_MESSAGE_THRESHOLD,
            lease_safety_margin: Duration::from_secs(DEFAULT_LEASE_SAFETY_MARGIN_SECS),
        }
    }
}

pub struct MessageProcessor {
    config: ProcessorConfig,
    handler: Arc<dyn MessageHandler>,
    dedup: Arc<DeduplicationStore>,
    deletion: Arc<DeletionManager>,
    samples: Arc<dyn DurationSampleStore>,
    dead_letters: Arc<dyn DeadLetterLog>,
    utilization: UtilizationMonitor,
}

impl std::fmt::Debug for MessageProcessor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageProcessor")
            .field("config", &self.config)
            .field("dedup", &self.dedup)
            .field("deletion", &self.deletion)
            .finish()
    }
}

impl MessageProcessor {
    pub fn new(
        config: ProcessorConfig,
        handler: Arc<dyn MessageHandler>,
        dedup: Arc<DeduplicationStore>,
        deletion: Arc<DeletionManager>,
        samples: Arc<dyn DurationSampleStore>,
        dead_letters: Arc<dyn DeadLetterLog>,
    ) -> Self {
        Self {
            config,
            handler,
            dedup,
            deletion,
            samples,
            dead_letters,
            utilization: UtilizationMonitor::default(),
        }
    }

    pub fn dedup(&self) -> &DeduplicationStore {
        &self.dedup
    }

    pub async fn process(&self, message: LeasedMessage) -> MessageOutcome {
        let outcome = self.run_steps(&message).await;
        MESSAGES_TOTAL
            .with_label_values(&[message.operation_type.as_str(), outcome.as_str()])
            .inc();
        outcome
    }

    /// Malformed envelopes cannot reach the handler. Once redelivered past the
    /// poison threshold they are dead-lettered and deleted by receipt handle.
    pub async fn process_malformed(
        &self,
        malformed: &MalformedMessage,
        operation_type: &str,
    ) -> MessageOutcome {
        let outcome = self.handle_malformed(malformed, operation_type).await;
        MESSAGES_TOTAL
            .with_label_values(&[operation_type, outcome.as_str()])
            .inc();
        outcome
    }

    async fn handle_malformed(
        &self,
        malformed: &MalformedMessage,
        operation_type: &str,
    ) -> MessageOutcome {
        let dequeue_count = malformed.dequeue_count.unwrap_or_default();
        let receipt_handle = match malformed.receipt_handle.as_deref() {
            Some(handle) if dequeue_count > self.config.poison_threshold => handle,
            _ => {
                warn!(
                    operation_type = %operation_type,
                    message_id = ?malformed.message_id,
                    dequeue_count = ?malformed.dequeue_count,
                    error = %malformed.error,
                    "Malformed message envelope, leaving it in the queue"
                );
                return MessageOutcome::Malformed;
            }
        };

        let record = DeadLetterRecord::from_malformed(malformed, operation_type, Utc::now());
        if let Err(e) = self.dead_letters.record(&record).await {
            error!(
                message_id = ?malformed.message_id,
                operation_type = %operation_type,
                error = %e,
                "failed to dead-letter malformed message, leaving it in the queue"
            );
            return MessageOutcome::Malformed;
        }

        let report = self
            .deletion
            .delete_by_receipt(
                malformed.message_id.as_deref(),
                receipt_handle,
                operation_type,
            )
            .await;
        info!(
            message_id = ?malformed.message_id,
            operation_type = %operation_type,
            dequeue_count = dequeue_count,
            error = %malformed.error,
            deleted = report.is_deleted(),
            attempts = report.attempts,
            "malformed poison message dead-lettered"
        );
        MessageOutcome::Poison
    }

    async fn run_steps(&self, message: &LeasedMessage) -> MessageOutcome {
        let reservation = match self.dedup.check_and_reserve(message.id()).await {
            DedupCheck::Duplicate(record) => {
                debug!(
                    message_id = %message.id(),
                    operation_type = %message.operation_type,
                    dequeue_count = message.dequeue_count(),
                    processed_at = %record.processed_at,
                    "duplicate delivery, deleting without handling"
                );
                let report = self.deletion.delete_with_confirmation(message).await;
                debug!(
                    message_id = %message.id(),
                    deleted = report.is_deleted(),
                    attempts = report.attempts,
                    "duplicate delivery removed"
                );
                return MessageOutcome::Duplicate;
            }
            DedupCheck::InFlight => {
                debug!(message_id = %message.id(), "message already being handled in this process");
                return MessageOutcome::InFlight;
            }
            DedupCheck::Unknown {
                reason,
                reservation,
            } => {
                DEDUP_UNKNOWN_TOTAL
                    .with_label_values(&[message.operation_type.as_str()])
                    .inc();
                debug!(message_id = %message.id(), reason = %reason, "handling with unverified dedup state");
                reservation
            }
            DedupCheck::Fresh(reservation) => reservation,
        };

        if message.dequeue_count() > self.config.poison_threshold {
            self.dead_letter(message).await;
            return MessageOutcome::Poison;
        }

        let now = Utc::now();
        if !message.has_lease_margin(self.config.lease_safety_margin, now) {
            warn!(
                message_id = %message.id(),
                operation_type = %message.operation_type,
                remaining_ms = message.remaining_lease(now).as_millis() as u64,
                "remaining lease below safety margin, leaving message for redelivery"
            );
            return MessageOutcome::LeaseTooShort;
        }

        let outcome = self.invoke_handler(message).await;
        if outcome == ProcessingOutcome::Succeeded {
            self.complete(message, reservation).await;
        }
        outcome.into()
    }

    /// Runs the handler and records its duration. A panic counts as a retryable failure.
    async fn invoke_handler(&self, message: &LeasedMessage) -> ProcessingOutcome {
        let operation_type = message.operation_type.as_str();
        let started = Instant::now();
        let result = AssertUnwindSafe(async { self.handler.handle(message).await })
            .catch_unwind()
            .await;
        let duration = started.elapsed();

        let outcome = match result {
            Ok(Ok(())) => ProcessingOutcome::Succeeded,
            Ok(Err(HandlerError::Retryable(reason))) => {
                warn!(
                    message_id = %message.id(),
                    operation_type = %operation_type,
                    dequeue_count = message.dequeue_count(),
                    reason = %reason,
                    "handler failed, message will be redelivered"
                );
                ProcessingOutcome::RetryableFailure
            }
            Ok(Err(HandlerError::Fatal(reason))) => {
                error!(
                    message_id = %message.id(),
                    operation_type = %operation_type,
                    dequeue_count = message.dequeue_count(),
                    reason = %reason,
                    "handler failed fatally, message left for poison handling"
                );
                ProcessingOutcome::FatalFailure
            }
            Err(panic_info) => {
                let msg = panic_info
                    .downcast_ref::<String>()
                    .map(|s| s.as_str())
                    .or_else(|| panic_info.downcast_ref::<&str>().copied())
                    .unwrap_or("unknown panic");
                error!(
                    message_id = %message.id(),
                    operation_type = %operation_type,
                    panic = %msg,
                    "Message handler panicked"
                );
                ProcessingOutcome::RetryableFailure
            }
        };

        PROCESSING_DURATION
            .with_label_values(&[operation_type, outcome.as_str()])
            .observe(duration.as_secs_f64());

        let sample = ProcessingDurationSample::new(operation_type, duration, outcome, Utc::now());
        if let Err(e) = self.samples.record(&sample).await {
            warn!(operation_type = %operation_type, error = %e, "failed to record duration sample");
        }

        let verdict = self
            .utilization
            .observe(operation_type, duration, message.lease_timeout);
        LEASE_UTILIZATION_RATIO
            .with_label_values(&[operation_type])
            .set(verdict.ratio);
        if verdict.saturated {
            warn!(
                operation_type = %operation_type,
                ratio = verdict.ratio,
                streak = verdict.streak,
                lease_secs = message.lease_timeout.as_secs(),
                "lease utilization repeatedly above alert ratio, lease will be recomputed on next claim"
            );
        }

        outcome
    }

    /// Commits the dedup record, then deletes. The reservation is released last.
    async fn complete(&self, message: &LeasedMessage, reservation: Reservation) -> DeletionReport {
        if let Err(e) = self
            .dedup
            .commit(message.id(), &message.operation_type, self.dedup.ttl())
            .await
        {
            error!(
                message_id = %message.id(),
                operation_type = %message.operation_type,
                error = %e,
                "failed to persist dedup record, deleting anyway"
            );
        }

        let report = self.deletion.delete_with_confirmation(message).await;
        debug!(
            message_id = %message.id(),
            deleted = report.is_deleted(),
            attempts = report.attempts,
            "message completed"
        );
        drop(reservation);
        report
    }

    async fn dead_letter(&self, message: &LeasedMessage) {
        let reason = format!(
            "dequeue count {} exceeds poison threshold {}",
            message.dequeue_count(),
            self.config.poison_threshold
        );
        let record = DeadLetterRecord::from_message(message, reason, Utc::now());

        if let Err(e) = self.dead_letters.record(&record).await {
            error!(
                message_id = %message.id(),
                operation_type = %message.operation_type,
                error = %e,
                "failed to dead-letter poison message, leaving it in the queue"
            );
            return;
        }

        info!(
            message_id = %message.id(),
            operation_type = %message.operation_type,
            dequeue_count = message.dequeue_count(),
            "poison message dead-lettered"
        );
        let report = self.deletion.delete_with_confirmation(message).await;
        info!(
            message_id = %message.id(),
            deleted = report.is_deleted(),
            attempts = report.attempts,
            "poison message removed from queue"
        );
    }
}
