use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Proof that a message id was processed successfully.
///
/// While unexpired, the record means the message must not be handled again,
/// however many times the queue redelivers it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeduplicationRecord {
    pub message_id: String,
    pub operation_type: String,
    pub processed_at: DateTime<Utc>,
    pub ttl_expires_at: DateTime<Utc>,
}

impl DeduplicationRecord {
    pub fn new(
        message_id: impl Into<String>,
        operation_type: impl Into<String>,
        processed_at: DateTime<Utc>,
        ttl: Duration,
    ) -> Self {
        let ttl = chrono::Duration::from_std(ttl).unwrap_or(chrono::Duration::MAX);
        Self {
            message_id: message_id.into(),
            operation_type: operation_type.into(),
            processed_at,
            ttl_expires_at: processed_at
                .checked_add_signed(ttl)
                .unwrap_or(DateTime::<Utc>::MAX_UTC),
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.ttl_expires_at
    }

    /// Day partition of the durable log this record is appended to.
    pub fn partition(&self) -> NaiveDate {
        self.processed_at.date_naive()
    }
}
