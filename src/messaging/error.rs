//! Error types for messaging operations

use crate::error::AppError;

/// Result type for messaging operations
pub type MessagingResult<T> = std::result::Result<T, MessagingError>;

/// Errors that can occur during messaging operations
#[derive(Debug, thiserror::Error)]
pub enum MessagingError {
    /// Connection failed
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Publish failed
    #[error("Publish failed: {0}")]
    PublishFailed(String),

    /// Subscribe failed
    #[error("Subscribe failed: {0}")]
    SubscribeFailed(String),

    /// Consume failed
    #[error("Consume failed: {0}")]
    ConsumeFailed(String),

    /// Acknowledgement was not accepted by the broker
    #[error("Acknowledge failed: {0}")]
    AcknowledgeFailed(String),

    /// Queue already exists with different properties
    #[error("Queue '{queue}' declared with conflicting properties: {reason}")]
    QueueConfigConflict { queue: String, reason: String },

    /// Message could not be encoded
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Payload is not a well-formed notification envelope
    #[error("Decoding error: {0}")]
    Decoding(String),

    /// Message failed validation before it was queued
    #[error("Invalid message: {0}")]
    InvalidMessage(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// Backend not available
    #[error("Backend not available: {0}")]
    BackendUnavailable(String),

    /// Timeout error
    #[error("Operation timed out: {0}")]
    Timeout(String),
}

impl MessagingError {
    /// Whether the error means the broker connection is unusable
    pub fn is_connection_error(&self) -> bool {
        matches!(
            self,
            MessagingError::ConnectionFailed(_)
                | MessagingError::BackendUnavailable(_)
                | MessagingError::Timeout(_)
        )
    }
}

impl From<validator::ValidationErrors> for MessagingError {
    fn from(err: validator::ValidationErrors) -> Self {
        MessagingError::InvalidMessage(err.to_string())
    }
}

impl From<MessagingError> for AppError {
    fn from(err: MessagingError) -> Self {
        match err {
            MessagingError::ConfigurationError(msg) => AppError::Configuration(msg),
            MessagingError::InvalidMessage(msg) => AppError::Validation(msg),
            MessagingError::Encoding(msg) | MessagingError::Decoding(msg) => {
                AppError::Serialization(msg)
            }
            MessagingError::Timeout(msg) => AppError::Timeout(msg),
            MessagingError::BackendUnavailable(msg) => AppError::Unavailable(msg),
            _ => AppError::Messaging(err.to_string()),
        }
    }
}
