//! Lease-managed consumer.
//!
//! Claims batches from a [`QueueService`] using a lease computed from the most
//! recent processing-duration samples of the operation type. Each returned
//! message carries its local lease expiry, measured from just before the
//! receive call so the local view never outlives the queue's.

use chrono::Utc;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::lease::{LeaseSource, LeaseTimeout, LeaseTimeoutCalculator};
use crate::metrics::LEASE_TIMEOUT_SECONDS;
use crate::models::{ClaimedMessage, LeasedMessage, MalformedMessage, Message};
use crate::repositories::DurationSampleStore;

use super::{QueueError, QueueService};

pub struct LeaseManagedConsumer {
    queue: Arc<dyn QueueService>,
    calculator: LeaseTimeoutCalculator,
    samples: Arc<dyn DurationSampleStore>,
}

impl std::fmt::Debug for LeaseManagedConsumer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LeaseManagedConsumer")
            .field("backend", &self.queue.backend_name())
            .field("calculator", &self.calculator)
            .finish()
    }
}

impl LeaseManagedConsumer {
    pub fn new(
        queue: Arc<dyn QueueService>,
        calculator: LeaseTimeoutCalculator,
        samples: Arc<dyn DurationSampleStore>,
    ) -> Self {
        Self {
            queue,
            calculator,
            samples,
        }
    }

    pub fn calculator(&self) -> &LeaseTimeoutCalculator {
        &self.calculator
    }

    /// Computes the lease the next claim for `operation_type` will request.
    ///
    /// If the sample store cannot be read the policy default is used.
    pub async fn lease_for(&self, operation_type: &str) -> LeaseTimeout {
        let samples = match self.samples.recent(operation_type, Utc::now()).await {
            Ok(samples) => samples,
            Err(e) => {
                warn!(
                    operation_type = %operation_type,
                    error = %e,
                    "duration samples unavailable, using default lease"
                );
                Vec::new()
            }
        };

        let lease = self.calculator.compute_timeout(operation_type, &samples);
        if lease.p99_exceeds_ceiling {
            warn!(
                operation_type = %operation_type,
                p99_ms = ?lease.p99_ms,
                timeout_secs = lease.timeout_seconds(),
                "p99 processing duration exceeds the lease ceiling, leases may expire mid-run"
            );
        }
        if lease.source == LeaseSource::Fallback {
            debug!(
                operation_type = %operation_type,
                sample_count = lease.sample_count,
                timeout_secs = lease.timeout_seconds(),
                "not enough duration samples, using default lease"
            );
        }
        lease
    }

    /// Claims up to `max_messages` for `operation_type`.
    ///
    /// Queue errors are returned to the caller. Envelope problems are reported
    /// per message so the rest of the batch is still usable.
    pub async fn claim_batch(
        &self,
        max_messages: usize,
        operation_type: &str,
    ) -> Result<Vec<ClaimedMessage>, QueueError> {
        let lease = self.lease_for(operation_type).await;
        LEASE_TIMEOUT_SECONDS
            .with_label_values(&[operation_type])
            .set(lease.timeout_seconds() as f64);

        let claimed_at = Utc::now();
        let raw_messages = self.queue.receive(max_messages, lease.timeout).await?;
        let lease_expires_at = claimed_at
            + chrono::Duration::from_std(lease.timeout).unwrap_or(chrono::Duration::zero());

        let batch: Vec<ClaimedMessage> = raw_messages
            .into_iter()
            .map(|raw| {
                let message_id = raw.message_id.clone();
                let receipt_handle = raw.receipt_handle.clone();
                let dequeue_count = raw.dequeue_count;
                let body = raw.body.clone();

                Message::from_raw(raw, lease_expires_at)
                    .map(|message| LeasedMessage {
                        message,
                        operation_type: operation_type.to_string(),
                        lease_timeout: lease.timeout,
                        claimed_at,
                    })
                    .map_err(|error| MalformedMessage {
                        error,
                        message_id,
                        receipt_handle,
                        dequeue_count,
                        body,
                    })
            })
            .collect();

        debug!(
            operation_type = %operation_type,
            backend = self.queue.backend_name(),
            count = batch.len(),
            lease_secs = lease.timeout_seconds(),
            "claimed batch"
        );
        Ok(batch)
    }
}
