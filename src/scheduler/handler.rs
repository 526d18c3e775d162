//! Contract for the business handler invoked for each fresh message.

use async_trait::async_trait;
use thiserror::Error;

#[cfg(test)]
use mockall::automock;

use crate::models::LeasedMessage;

/// Failure reported by a [`MessageHandler`].
///
/// Both variants leave the message in the queue; its lease expiry triggers a
/// redelivery until the poison threshold is reached.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum HandlerError {
    #[error("Retryable: {0}")]
    Retryable(String),
    /// Not expected to succeed on redelivery. Logged at error level.
    #[error("Fatal: {0}")]
    Fatal(String),
}

#[cfg_attr(test, automock)]
#[async_trait]
pub trait MessageHandler: Send + Sync {
    async fn handle(&self, message: &LeasedMessage) -> Result<(), HandlerError>;
}
