//! The polling loop.
//!
//! Claims a batch, hands each message to the [`MessageProcessor`] on a bounded
//! set of tasks, waits for the batch, and claims again right away. Empty claims
//! back off exponentially up to a cap; the loop never stops polling on its own.
//! On shutdown, in-flight messages get a bounded drain period; messages not yet
//! started are left to their lease expiry.

use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{watch, Semaphore};
use tokio::task::{JoinHandle, JoinSet};
use tracing::{debug, error, info, warn};

use crate::constants::{
    DEFAULT_IDLE_BASE_BACKOFF_SECS, DEFAULT_IDLE_MAX_BACKOFF_SECS, SHUTDOWN_DRAIN_TIMEOUT_SECS,
    WORKER_DEFAULT_CONCURRENCY, WORKER_DEFAULT_MAX_MESSAGES,
};
use crate::metrics::{
    CLAIM_ERRORS_TOTAL, CONSECUTIVE_EMPTY_POLLS, DEDUP_TTL_VIOLATIONS_TOTAL, IDLE_BACKOFF_SECONDS,
};
use crate::models::ClaimedMessage;
use crate::queues::LeaseManagedConsumer;

use super::{MessageOutcome, MessageProcessor, PollingState, SchedulerState, WorkerStatus};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchedulerConfig {
    pub operation_type: String,
    pub max_messages: usize,
    pub concurrency: usize,
    pub idle_base_backoff: Duration,
    pub idle_max_backoff: Duration,
    pub drain_timeout: Duration,
}

impl SchedulerConfig {
    pub fn new(operation_type: impl Into<String>) -> Self {
        Self {
            operation_type: operation_type.into(),
            max_messages: WORKER_DEFAULT_MAX_MESSAGES,
            concurrency: WORKER_DEFAULT_CONCURRENCY,
            idle_base_backoff: Duration::from_secs(DEFAULT_IDLE_BASE_BACKOFF_SECS),
            idle_max_backoff: Duration::from_secs(DEFAULT_IDLE_MAX_BACKOFF_SECS),
            drain_timeout: Duration::from_secs(SHUTDOWN_DRAIN_TIMEOUT_SECS),
        }
    }
}

pub struct PollingScheduler {
    config: SchedulerConfig,
    consumer: LeaseManagedConsumer,
    processor: Arc<MessageProcessor>,
    status_tx: watch::Sender<WorkerStatus>,
}

impl std::fmt::Debug for PollingScheduler {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PollingScheduler")
            .field("config", &self.config)
            .field("consumer", &self.consumer)
            .finish()
    }
}

impl PollingScheduler {
    pub fn new(
        config: SchedulerConfig,
        consumer: LeaseManagedConsumer,
        processor: MessageProcessor,
    ) -> Self {
        let initial = WorkerStatus::new(
            config.operation_type.clone(),
            SchedulerState::Claiming,
            &PollingState::new(Utc::now()),
            0,
        );
        let (status_tx, _) = watch::channel(initial);
        Self {
            config,
            consumer,
            processor: Arc::new(processor),
            status_tx,
        }
    }

    /// Status updates for the host process (health checks, autoscaler).
    pub fn status(&self) -> watch::Receiver<WorkerStatus> {
        self.status_tx.subscribe()
    }

    pub fn spawn(self, shutdown_rx: watch::Receiver<bool>) -> JoinHandle<PollingState> {
        tokio::spawn(self.run(shutdown_rx))
    }

    /// Runs until `shutdown_rx` changes (or its sender is dropped) and returns the final state.
    pub async fn run(self, mut shutdown_rx: watch::Receiver<bool>) -> PollingState {
        let operation_type = self.config.operation_type.clone();
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max(1)));
        let mut polling = PollingState::new(Utc::now());

        info!(
            operation_type = %operation_type,
            max_messages = self.config.max_messages,
            concurrency = self.config.concurrency,
            idle_max_backoff_secs = self.config.idle_max_backoff.as_secs(),
            "Starting polling scheduler"
        );

        loop {
            if *shutdown_rx.borrow() {
                info!(operation_type = %operation_type, "Shutdown signal received, stopping scheduler");
                break;
            }

            self.publish(SchedulerState::Claiming, &polling, 0);
            let claimed = tokio::select! {
                result = self.consumer.claim_batch(self.config.max_messages, &operation_type) => result,
                _ = shutdown_rx.changed() => {
                    info!(operation_type = %operation_type, "Shutdown signal received during claim, stopping scheduler");
                    break;
                }
            };

            match claimed {
                Ok(batch) if batch.is_empty() => {
                    let backoff = polling.on_empty_poll(
                        self.config.idle_base_backoff,
                        self.config.idle_max_backoff,
                    );
                    self.record_polling_gauges(&polling);
                    self.publish(SchedulerState::IdleBackoff, &polling, 0);
                    debug!(
                        operation_type = %operation_type,
                        consecutive_empty_polls = polling.consecutive_empty_polls,
                        backoff_secs = backoff.as_secs_f64(),
                        "Queue empty, backing off"
                    );
                    if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                        info!(operation_type = %operation_type, "Shutdown signal received during backoff, stopping scheduler");
                        break;
                    }
                }
                Ok(batch) => {
                    polling.on_batch(Utc::now());
                    self.record_polling_gauges(&polling);
                    self.publish(SchedulerState::Processing, &polling, batch.len());

                    let shutdown_requested =
                        self.process_batch(batch, &semaphore, &mut shutdown_rx).await;
                    polling.on_batch_complete(Utc::now());
                    if shutdown_requested {
                        break;
                    }
                }
                Err(e) => {
                    let retryable = e.is_retryable();
                    let backoff = polling.on_claim_error(retryable);
                    CLAIM_ERRORS_TOTAL
                        .with_label_values(&[operation_type.as_str(), if retryable { "true" } else { "false" }])
                        .inc();
                    error!(
                        operation_type = %operation_type,
                        error = %e,
                        retryable = retryable,
                        consecutive_errors = polling.consecutive_claim_errors,
                        health = ?polling.health,
                        backoff_secs = backoff.as_secs(),
                        "Failed to claim messages, backing off"
                    );
                    self.publish(SchedulerState::IdleBackoff, &polling, 0);
                    if !sleep_or_shutdown(backoff, &mut shutdown_rx).await {
                        info!(operation_type = %operation_type, "Shutdown signal received during backoff, stopping scheduler");
                        break;
                    }
                }
            }
        }

        self.publish(SchedulerState::Terminating, &polling, 0);
        info!(operation_type = %operation_type, "Polling scheduler stopped");
        polling
    }

    /// Processes one batch. Returns true when shutdown was requested meanwhile.
    async fn process_batch(
        &self,
        batch: Vec<ClaimedMessage>,
        semaphore: &Arc<Semaphore>,
        shutdown_rx: &mut watch::Receiver<bool>,
    ) -> bool {
        let operation_type = self.config.operation_type.as_str();
        let mut inflight: JoinSet<MessageOutcome> = JoinSet::new();

        if let Some(lease_timeout) = batch
            .iter()
            .find_map(|claimed| claimed.as_ref().ok().map(|m| m.lease_timeout))
        {
            self.check_dedup_ttl(lease_timeout);
        }

        for claimed in batch {
            let message = match claimed {
                Ok(message) => message,
                Err(malformed) => {
                    self.processor
                        .process_malformed(&malformed, operation_type)
                        .await;
                    continue;
                }
            };

            if *shutdown_rx.borrow() {
                debug!(message_id = %message.id(), "Shutdown requested, leaving message for redelivery");
                continue;
            }

            let permit = match semaphore.clone().acquire_owned().await {
                Ok(permit) => permit,
                Err(err) => {
                    error!(
                        operation_type = %operation_type,
                        error = %err,
                        "Semaphore closed, stopping batch"
                    );
                    break;
                }
            };
            let processor = Arc::clone(&self.processor);
            inflight.spawn(async move {
                let _permit = permit;
                processor.process(message).await
            });
        }

        loop {
            tokio::select! {
                joined = inflight.join_next() => match joined {
                    None => return *shutdown_rx.borrow(),
                    Some(Ok(outcome)) => {
                        debug!(operation_type = %operation_type, outcome = outcome.as_str(), "Message finished");
                    }
                    Some(Err(e)) => {
                        warn!(operation_type = %operation_type, error = %e, "In-flight task failed");
                    }
                },
                _ = shutdown_rx.changed() => {
                    self.publish_terminating(inflight.len());
                    self.drain(&mut inflight).await;
                    return true;
                }
            }
        }
    }

    async fn drain(&self, inflight: &mut JoinSet<MessageOutcome>) {
        let operation_type = self.config.operation_type.as_str();
        info!(
            operation_type = %operation_type,
            count = inflight.len(),
            "Draining in-flight messages before shutdown"
        );

        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(result) = inflight.join_next().await {
                if let Err(e) = result {
                    warn!(operation_type = %operation_type, error = %e, "In-flight task failed during drain");
                }
            }
        })
        .await;

        match drained {
            Ok(()) => info!(operation_type = %operation_type, "All in-flight messages drained"),
            Err(_) => {
                warn!(
                    operation_type = %operation_type,
                    remaining = inflight.len(),
                    "Drain timeout, abandoning remaining messages to lease expiry"
                );
                inflight.abort_all();
            }
        }
    }

    fn check_dedup_ttl(&self, lease_timeout: Duration) {
        let dedup_ttl = self.processor.dedup().ttl();
        if lease_timeout >= dedup_ttl {
            DEDUP_TTL_VIOLATIONS_TOTAL
                .with_label_values(&[self.config.operation_type.as_str()])
                .inc();
            warn!(
                operation_type = %self.config.operation_type,
                lease_secs = lease_timeout.as_secs(),
                dedup_ttl_secs = dedup_ttl.as_secs(),
                "lease is not shorter than the dedup TTL, a late redelivery may be processed twice"
            );
        }
    }

    fn record_polling_gauges(&self, polling: &PollingState) {
        let labels = [self.config.operation_type.as_str()];
        IDLE_BACKOFF_SECONDS
            .with_label_values(&labels)
            .set(polling.current_backoff.as_secs_f64());
        CONSECUTIVE_EMPTY_POLLS
            .with_label_values(&labels)
            .set(f64::from(polling.consecutive_empty_polls));
    }

    fn publish(&self, state: SchedulerState, polling: &PollingState, in_flight: usize) {
        self.status_tx.send_replace(WorkerStatus::new(
            self.config.operation_type.clone(),
            state,
            polling,
            in_flight,
        ));
    }

    fn publish_terminating(&self, in_flight: usize) {
        self.status_tx.send_modify(|status| {
            status.state = SchedulerState::Terminating;
            status.in_flight = in_flight;
        });
    }
}

/// Sleeps for `duration`. Returns false if shutdown was signalled first.
async fn sleep_or_shutdown(duration: Duration, shutdown_rx: &mut watch::Receiver<bool>) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(duration) => true,
        _ = shutdown_rx.changed() => false,
    }
}
