//! Queue message envelopes.
//!
//! [`RawQueueMessage`] is what a queue adapter returns: every field is optional
//! because the service may omit any of them. [`Message`] is the validated
//! envelope, and [`LeasedMessage`] ties it to the lease this worker holds.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::EnvelopeError;

/// Message as returned by the queue service before validation.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawQueueMessage {
    pub message_id: Option<String>,
    pub receipt_handle: Option<String>,
    pub body: Option<String>,
    pub dequeue_count: Option<u32>,
    pub enqueued_at: Option<DateTime<Utc>>,
}

/// Validated queue message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    /// Opaque handle identifying this particular delivery; required for deletion.
    pub receipt_handle: String,
    pub body: String,
    /// Number of times the queue has delivered this message, including this one.
    pub dequeue_count: u32,
    pub enqueued_at: DateTime<Utc>,
    pub lease_expires_at: DateTime<Utc>,
}

impl Message {
    /// Validates a raw envelope. A missing dequeue count is treated as a first delivery.
    pub fn from_raw(
        raw: RawQueueMessage,
        lease_expires_at: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        let id = raw
            .message_id
            .filter(|id| !id.is_empty())
            .ok_or(EnvelopeError::MissingId)?;
        let receipt_handle = raw
            .receipt_handle
            .filter(|handle| !handle.is_empty())
            .ok_or_else(|| EnvelopeError::MissingReceiptHandle {
                message_id: id.clone(),
            })?;
        let body = raw.body.ok_or_else(|| EnvelopeError::MissingBody {
            message_id: id.clone(),
        })?;
        let enqueued_at = raw
            .enqueued_at
            .ok_or_else(|| EnvelopeError::MissingAttribute {
                message_id: id.clone(),
                attribute: "enqueued_at",
            })?;

        Ok(Self {
            id,
            receipt_handle,
            body,
            dequeue_count: raw.dequeue_count.unwrap_or(1).max(1),
            enqueued_at,
            lease_expires_at,
        })
    }
}

/// A message claimed by this worker together with the lease it was claimed under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeasedMessage {
    pub message: Message,
    pub operation_type: String,
    pub lease_timeout: Duration,
    pub claimed_at: DateTime<Utc>,
}

impl LeasedMessage {
    pub fn id(&self) -> &str {
        &self.message.id
    }

    pub fn body(&self) -> &str {
        &self.message.body
    }

    pub fn dequeue_count(&self) -> u32 {
        self.message.dequeue_count
    }

    pub fn lease_expires_at(&self) -> DateTime<Utc> {
        self.message.lease_expires_at
    }

    /// Lease time left at `now`; zero once the lease has expired.
    pub fn remaining_lease(&self, now: DateTime<Utc>) -> Duration {
        (self.message.lease_expires_at - now)
            .to_std()
            .unwrap_or(Duration::ZERO)
    }

    /// Local advisory check: the queue service stays authoritative over the lease.
    pub fn has_lease_margin(&self, margin: Duration, now: DateTime<Utc>) -> bool {
        self.remaining_lease(now) > margin
    }
}

/// A received message that failed envelope validation.
///
/// Kept per message so one bad envelope does not fail the whole batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MalformedMessage {
    pub error: EnvelopeError,
    pub message_id: Option<String>,
    pub receipt_handle: Option<String>,
    pub dequeue_count: Option<u32>,
    pub body: Option<String>,
}

/// One entry of a claimed batch, in the order the queue returned it.
pub type ClaimedMessage = Result<LeasedMessage, MalformedMessage>;
