//! Queue service abstraction layer.
//!
//! The worker core only needs three primitives from a queue service: receive
//! with a lease (visibility timeout), delete by receipt handle, and an
//! existence check. [`QueueService`] captures exactly that so the core runs
//! unchanged against AWS SQS or the in-memory queue used in tests.
//!
//! [`LeaseManagedConsumer`] sits on top and claims typed batches using a lease
//! computed from recent processing durations.

use async_trait::async_trait;
use std::time::Duration;

#[cfg(test)]
use mockall::automock;

use crate::models::RawQueueMessage;

pub mod consumer;
pub mod errors;
pub mod in_memory;
pub mod sqs;

pub use consumer::LeaseManagedConsumer;
pub use errors::QueueError;
pub use in_memory::InMemoryQueueService;
pub use sqs::SqsQueueService;

/// Result of a delete call that reached the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeleteResult {
    Deleted,
    /// The message (or this delivery of it) is already gone.
    NotFound,
}

/// Result of an existence check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessagePresence {
    Exists,
    NotFound,
    /// The service cannot answer point lookups.
    Unknown,
}

/// Queue service contract consumed by the worker core.
///
/// Delivery is at-least-once: a message whose lease expires before it is
/// deleted is delivered again, to any consumer, with a higher dequeue count.
#[cfg_attr(test, automock)]
#[async_trait]
pub trait QueueService: Send + Sync {
    /// Receives up to `max_messages`, hiding each from other consumers for `visibility_timeout`.
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawQueueMessage>, QueueError>;

    /// Deletes the delivery identified by `receipt_handle`.
    async fn delete(&self, receipt_handle: &str) -> Result<DeleteResult, QueueError>;

    /// Checks whether a message with this id is still held by the queue.
    async fn peek(&self, message_id: &str) -> Result<MessagePresence, QueueError>;

    /// Backend name for logs and metrics.
    fn backend_name(&self) -> &'static str;
}
