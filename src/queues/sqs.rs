//! AWS SQS queue service adapter.
//!
//! Maps SQS receive/delete onto [`QueueService`]. The SQS
//! `ApproximateReceiveCount` attribute is the dequeue count and
//! `SentTimestamp` the enqueue time. SQS offers no lookup by message id, so
//! [`QueueService::peek`] always answers [`MessagePresence::Unknown`].

use async_trait::async_trait;
use aws_sdk_sqs::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_sqs::types::{Message, MessageSystemAttributeName};
use chrono::{DateTime, Utc};
use std::time::Duration;
use tracing::{debug, info};

use crate::constants::{MAX_VISIBILITY_TIMEOUT_SECS, WORKER_MAX_MESSAGES_LIMIT};
use crate::models::RawQueueMessage;

use super::{DeleteResult, MessagePresence, QueueError, QueueService};

/// SQS long-poll wait used when none is configured. SQS allows at most 20 seconds.
const DEFAULT_WAIT_TIME_SECS: i32 = 10;
const MAX_WAIT_TIME_SECS: i32 = 20;

#[derive(Clone)]
pub struct SqsQueueService {
    sqs_client: aws_sdk_sqs::Client,
    queue_url: String,
    wait_time_secs: i32,
}

impl std::fmt::Debug for SqsQueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqsQueueService")
            .field("queue_url", &self.queue_url)
            .field("wait_time_secs", &self.wait_time_secs)
            .finish()
    }
}

impl SqsQueueService {
    pub fn new(sqs_client: aws_sdk_sqs::Client, queue_url: impl Into<String>) -> Self {
        let queue_url = queue_url.into();
        info!(queue_url = %queue_url, "Using SQS queue service");
        Self {
            sqs_client,
            queue_url,
            wait_time_secs: DEFAULT_WAIT_TIME_SECS,
        }
    }

    /// Long-poll wait per receive call, clamped to the SQS maximum.
    pub fn with_wait_time(mut self, wait_time: Duration) -> Self {
        self.wait_time_secs = i32::try_from(wait_time.as_secs())
            .unwrap_or(MAX_WAIT_TIME_SECS)
            .min(MAX_WAIT_TIME_SECS);
        self
    }
}

#[async_trait]
impl QueueService for SqsQueueService {
    async fn receive(
        &self,
        max_messages: usize,
        visibility_timeout: Duration,
    ) -> Result<Vec<RawQueueMessage>, QueueError> {
        let batch_size = max_messages.clamp(1, WORKER_MAX_MESSAGES_LIMIT) as i32;
        let visibility_secs = visibility_timeout
            .as_secs()
            .clamp(1, MAX_VISIBILITY_TIMEOUT_SECS) as i32;

        let output = self
            .sqs_client
            .receive_message()
            .queue_url(&self.queue_url)
            .max_number_of_messages(batch_size)
            .wait_time_seconds(self.wait_time_secs)
            .visibility_timeout(visibility_secs)
            .message_system_attribute_names(MessageSystemAttributeName::ApproximateReceiveCount)
            .message_system_attribute_names(MessageSystemAttributeName::SentTimestamp)
            .send()
            .await
            .map_err(|e| map_sdk_error(e, "ReceiveMessage"))?;

        let messages: Vec<RawQueueMessage> = output
            .messages
            .unwrap_or_default()
            .iter()
            .map(to_raw_message)
            .collect();

        debug!(
            queue_url = %self.queue_url,
            message_count = messages.len(),
            visibility_timeout_secs = visibility_secs,
            "Received messages from SQS"
        );
        Ok(messages)
    }

    async fn delete(&self, receipt_handle: &str) -> Result<DeleteResult, QueueError> {
        match self
            .sqs_client
            .delete_message()
            .queue_url(&self.queue_url)
            .receipt_handle(receipt_handle)
            .send()
            .await
        {
            Ok(_) => Ok(DeleteResult::Deleted),
            Err(e) if is_receipt_handle_gone(e.code()) => Ok(DeleteResult::NotFound),
            Err(e) => Err(map_sdk_error(e, "DeleteMessage")),
        }
    }

    async fn peek(&self, _message_id: &str) -> Result<MessagePresence, QueueError> {
        Ok(MessagePresence::Unknown)
    }

    fn backend_name(&self) -> &'static str {
        "sqs"
    }
}

fn to_raw_message(message: &Message) -> RawQueueMessage {
    let attribute = |name: MessageSystemAttributeName| {
        message
            .attributes()
            .and_then(|attrs| attrs.get(&name))
            .cloned()
    };

    RawQueueMessage {
        message_id: message.message_id().map(str::to_string),
        receipt_handle: message.receipt_handle().map(str::to_string),
        body: message.body().map(str::to_string),
        dequeue_count: attribute(MessageSystemAttributeName::ApproximateReceiveCount)
            .and_then(|count| count.parse::<u32>().ok()),
        enqueued_at: attribute(MessageSystemAttributeName::SentTimestamp)
            .and_then(|millis| parse_epoch_millis(&millis)),
    }
}

fn parse_epoch_millis(value: &str) -> Option<DateTime<Utc>> {
    value
        .parse::<i64>()
        .ok()
        .and_then(DateTime::from_timestamp_millis)
}

/// A delete with a handle from an expired or already-deleted delivery.
fn is_receipt_handle_gone(code: Option<&str>) -> bool {
    matches!(
        code,
        Some("ReceiptHandleIsInvalid") | Some("AWS.SimpleQueueService.ReceiptHandleIsInvalid")
    )
}

fn map_sdk_error<E, R>(error: SdkError<E, R>, operation: &str) -> QueueError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
    R: std::fmt::Debug,
{
    let detail = format!("{operation} failed: {}", DisplayErrorContext(&error));
    match &error {
        SdkError::TimeoutError(_) | SdkError::DispatchFailure(_) | SdkError::ResponseError(_) => {
            QueueError::Unavailable(detail)
        }
        _ => classify_error_code(error.code(), detail),
    }
}

fn classify_error_code(code: Option<&str>, detail: String) -> QueueError {
    match code {
        Some(
            "ThrottlingException"
            | "RequestThrottled"
            | "OverLimit"
            | "KmsThrottled"
            | "AWS.SimpleQueueService.RequestThrottled",
        ) => QueueError::Throttled(detail),
        Some(
            "AccessDenied"
            | "AccessDeniedException"
            | "InvalidClientTokenId"
            | "SignatureDoesNotMatch"
            | "ExpiredToken"
            | "UnrecognizedClientException"
            | "InvalidSecurity",
        ) => QueueError::Unauthorized(detail),
        Some("QueueDoesNotExist" | "AWS.SimpleQueueService.NonExistentQueue") => {
            QueueError::QueueNotFound(detail)
        }
        Some(
            "InvalidParameterValue"
            | "InvalidAddress"
            | "InvalidAttributeName"
            | "MissingParameter"
            | "InvalidIdFormat",
        ) => QueueError::InvalidRequest(detail),
        Some("ServiceUnavailable" | "InternalError" | "InternalFailure") | None => {
            QueueError::Unavailable(detail)
        }
        Some(_) => QueueError::Other(detail),
    }
}
