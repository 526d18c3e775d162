use serde::Serialize;
use thiserror::Error;

/// Errors returned by a queue service adapter.
#[derive(Debug, Error, Serialize, Clone, PartialEq, Eq)]
pub enum QueueError {
    #[error("Queue service unavailable: {0}")]
    Unavailable(String),
    #[error("Queue service throttled the request: {0}")]
    Throttled(String),
    #[error("Not authorized to access the queue: {0}")]
    Unauthorized(String),
    #[error("Queue not found: {0}")]
    QueueNotFound(String),
    #[error("Invalid queue request: {0}")]
    InvalidRequest(String),
    #[error("Queue error: {0}")]
    Other(String),
}

impl QueueError {
    /// Transport-level failures that are worth repeating with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Unavailable(_) | Self::Throttled(_) | Self::Other(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(QueueError::Unavailable("timeout".into()).is_retryable());
        assert!(QueueError::Throttled("slow down".into()).is_retryable());
        assert!(QueueError::Other("?".into()).is_retryable());
        assert!(!QueueError::Unauthorized("denied".into()).is_retryable());
        assert!(!QueueError::QueueNotFound("q".into()).is_retryable());
        assert!(!QueueError::InvalidRequest("bad".into()).is_retryable());
    }

    #[test]
    fn test_error_messages_not_empty() {
        let errors = vec![
            QueueError::Unavailable("test".to_string()),
            QueueError::Throttled("test".to_string()),
            QueueError::Unauthorized("test".to_string()),
            QueueError::QueueNotFound("test".to_string()),
            QueueError::InvalidRequest("test".to_string()),
            QueueError::Other("test".to_string()),
        ];
        for error in errors {
            assert!(error.to_string().contains("test"));
        }
    }
}
