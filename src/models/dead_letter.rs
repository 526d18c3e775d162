use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{LeasedMessage, MalformedMessage};

/// A message abandoned as unprocessable, kept for operator inspection.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    pub message_id: String,
    pub operation_type: String,
    pub dequeue_count: u32,
    pub body: String,
    pub reason: String,
    pub dead_lettered_at: DateTime<Utc>,
}

impl DeadLetterRecord {
    pub fn from_message(
        message: &LeasedMessage,
        reason: impl Into<String>,
        dead_lettered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message.id().to_string(),
            operation_type: message.operation_type.clone(),
            dequeue_count: message.dequeue_count(),
            body: message.body().to_string(),
            reason: reason.into(),
            dead_lettered_at,
        }
    }

    /// Missing envelope fields are stored empty so the record is still writable.
    pub fn from_malformed(
        message: &MalformedMessage,
        operation_type: &str,
        dead_lettered_at: DateTime<Utc>,
    ) -> Self {
        Self {
            message_id: message.message_id.clone().unwrap_or_default(),
            operation_type: operation_type.to_string(),
            dequeue_count: message.dequeue_count.unwrap_or_default(),
            body: message.body.clone().unwrap_or_default(),
            reason: format!("malformed envelope: {}", message.error),
            dead_lettered_at,
        }
    }
}
