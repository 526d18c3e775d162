use thiserror::Error;

/// A received message whose queue envelope cannot be turned into a [`crate::models::Message`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EnvelopeError {
    #[error("Message has no id")]
    MissingId,
    #[error("Message {message_id} has no receipt handle")]
    MissingReceiptHandle { message_id: String },
    #[error("Message {message_id} has no body")]
    MissingBody { message_id: String },
    #[error("Message {message_id} is missing attribute {attribute}")]
    MissingAttribute {
        message_id: String,
        attribute: &'static str,
    },
}
