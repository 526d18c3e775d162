use thiserror::Error;

/// Errors raised by the durable stores (dedup log, samples, dead letters).
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("Entity not found: {0}")]
    NotFound(String),

    #[error("Failed to connect to the store: {0}")]
    ConnectionError(String),

    #[error("Invalid data: {0}")]
    InvalidData(String),

    #[error("An unknown error occurred: {0}")]
    Unknown(String),
}

impl RepositoryError {
    /// Connection-level failures may succeed if the same call is repeated.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionError(_) | Self::Unknown(_))
    }
}
