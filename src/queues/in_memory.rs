//! In-memory queue service with lease semantics.
//!
//! Behaves like a hosted at-least-once queue: received messages stay hidden
//! until their lease expires, every delivery increments the dequeue count and
//! issues a fresh receipt handle, and a handle from an earlier delivery can no
//! longer delete the message. Used by tests and single-process development.
//! Failures can be injected per operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::time::Duration;
use uuid::Uuid;

use crate::models::RawQueueMessage;

use super::{DeleteResult, MessagePresence, QueueError, QueueService};

#[derive(Debug, Clone)]
struct StoredMessage {
    id: String,
    body: String,
    enqueued_at: DateTime<Utc>,
    dequeue_count: u32,
    invisible_until: Option<DateTime<Utc>>,
    receipt_handle: Option<String>,
}

impl StoredMessage {
    fn is_visible(&self, now: DateTime<Utc>) -> bool {
        self.invisible_until.is_none_or(|until| until <= now)
    }
}

#[derive(Debug, Default)]
struct QueueState {
    messages: Vec<StoredMessage>,
    receive_failures: VecDeque<QueueError>,
    delete_failures: VecDeque<QueueError>,
    peek_failures: VecDeque<QueueError>,
    /// Deletes acknowledged without removing anything.
    phantom_deletes: u32,
    receive_calls: u64,
    delete_calls: u64,
}

#[derive(Debug, Default)]
pub struct InMemoryQueueService {
    state: Mutex<QueueState>,
}

impl InMemoryQueueService {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueues a message and returns its generated id.
    pub fn send(&self, body: impl Into<String>) -> String {
        let id = Uuid::new_v4().to_string();
        self.send_with_id(id.clone(), body);
        id
    }

    pub fn send_with_id(&self, id: impl Into<String>, body: impl Into<String>) {
        self.state.lock().messages.push(StoredMessage {
            id: id.into(),
            body: body.into(),
            enqueued_at: Utc::now(),
            dequeue_count: 0,
            invisible_until: None,
            receipt_handle: None,
        });
    }

    /// Ends every outstanding lease, as if the visibility timeouts had elapsed.
    pub fn expire_leases(&self) {
        for message in self.state.lock().messages.iter_mut() {
            message.invisible_until = None;
        }
    }

    /// Sets the dequeue count of a stored message, e.g. to simulate many past deliveries.
    pub fn set_dequeue_count(&self, id: &str, dequeue_count: u32) {
        if let Some(message) = self.state.lock().messages.iter_mut().find(|m| m.id == id) {
            message.dequeue_count = dequeue_count;
        }
    }

    pub fn fail_next_receive(&self, error: QueueError) {
        self.state.lock().receive_failures.push_back(error);
    }

    pub fn fail_next_delete(&self, error: QueueError) {
        self.state.lock().delete_failures.push_back(error);
    }

    pub fn fail_next_peek(&self, error: QueueError) {
        self.state.lock().peek_failures.push_back(error);
    }

    /// The next `count` deletes report success but leave the message in place.
    pub fn acknowledge_without_deleting(&self, count: u32) {
        self.state.lock().phantom_deletes = count;
    }

    pub fn contains(&self, id: &str) -> bool {
        self.state.lock().messages.iter().any(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.state.lock().messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn visible_count(&self) -> usize {
        let now = Utc::now();
        self.state
            .lock()
            .messages
            .iter()
            .filter(|m| m.is_visible(now))
            .count()
    }

    pub fn receive_calls(&self) -> u64 {
        self.state.lock().receive_calls
    }

    pub fn delete_calls(&self) -> u64 {
        self.state.lock().delete_calls
    }
}

#[async_trait]
impl QueueService for InMemoryQueueService {
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawQueueMessage>, QueueError> {
        let mut state = self.state.lock();
        state.receive_calls += 1;
        if let Some(error) = state.receive_failures.pop_front() {
            return Err(error);
        }

        let now = Utc::now();
        let lease = chrono::Duration::from_std(visibility_timeout)
            .map_err(|e| QueueError::InvalidRequest(format!("visibility timeout: {e}")))?;

        let mut received = Vec::new();
        for message in state
            .messages
            .iter_mut()
            .filter(|m| m.is_visible(now))
            .take(max_messages)
        {
            let handle = Uuid::new_v4().to_string();
            message.dequeue_count += 1;
            message.invisible_until = Some(now + lease);
            message.receipt_handle = Some(handle.clone());

            received.push(RawQueueMessage {
                message_id: Some(message.id.clone()),
                receipt_handle: Some(handle),
                body: Some(message.body.clone()),
                dequeue_count: Some(message.dequeue_count),
                enqueued_at: Some(message.enqueued_at),
            });
        }

        Ok(received)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<DeleteResult, QueueError> {
        let mut state = self.state.lock();
        state.delete_calls += 1;
        if let Some(error) = state.delete_failures.pop_front() {
            return Err(error);
        }
        if state.phantom_deletes > 0 {
            state.phantom_deletes -= 1;
            return Ok(DeleteResult::Deleted);
        }

        let position = state
            .messages
            .iter()
            .position(|m| m.receipt_handle.as_deref() == Some(receipt_handle));
        match position {
            Some(index) => {
                state.messages.remove(index);
                Ok(DeleteResult::Deleted)
            }
            None => Ok(DeleteResult::NotFound),
        }
    }

    async fn peek(&self, message_id: &str) -> Result<MessagePresence, QueueError> {
        let mut state = self.state.lock();
        if let Some(error) = state.peek_failures.pop_front() {
            return Err(error);
        }
        if state.messages.iter().any(|m| m.id == message_id) {
            Ok(MessagePresence::Exists)
        } else {
            Ok(MessagePresence::NotFound)
        }
    }

    fn backend_name(&self) -> &'static str {
        "in_memory"
    }
}
