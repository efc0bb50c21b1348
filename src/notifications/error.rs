//! Error types for direct delivery and queue draining

use crate::error::AppError;
use crate::messaging::MessagingError;
use crate::notifications::drainer::DrainReport;

/// Why a direct send did not go through
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DeliveryError {
    /// The relay refused our credentials
    #[error("SMTP authentication failed: {0}")]
    Authentication(String),

    /// Could not reach or talk to the relay
    #[error("SMTP network error: {0}")]
    Network(String),

    /// The relay refused the message for good (5xx)
    #[error("Message rejected by relay: {0}")]
    Rejected(String),

    /// The relay asked us to try again later (4xx)
    #[error("Message deferred by relay: {0}")]
    Deferred(String),

    /// The send did not finish in time
    #[error("SMTP send timed out: {0}")]
    Timeout(String),

    /// Sender, reply-to or recipient is not a usable address
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Static transport settings are unusable
    #[error("Transport configuration error: {0}")]
    Configuration(String),
}

impl DeliveryError {
    /// Short label for logs and metrics
    pub fn kind(&self) -> &'static str {
        match self {
            DeliveryError::Authentication(_) => "authentication",
            DeliveryError::Network(_) => "network",
            DeliveryError::Rejected(_) => "rejected",
            DeliveryError::Deferred(_) => "deferred",
            DeliveryError::Timeout(_) => "timeout",
            DeliveryError::InvalidAddress(_) => "invalid_address",
            DeliveryError::Configuration(_) => "configuration",
        }
    }

    /// Whether sending the same message again can never succeed
    pub fn is_permanent(&self) -> bool {
        matches!(
            self,
            DeliveryError::Rejected(_) | DeliveryError::InvalidAddress(_)
        )
    }
}

impl From<DeliveryError> for AppError {
    fn from(err: DeliveryError) -> Self {
        match err {
            DeliveryError::Configuration(msg) => AppError::Configuration(msg),
            DeliveryError::Timeout(msg) => AppError::Timeout(msg),
            other => AppError::Delivery(other.to_string()),
        }
    }
}

/// Failure of a whole drain invocation
#[derive(Debug, thiserror::Error)]
pub enum DrainError {
    /// Another drain on the same drainer still holds the lease
    #[error("a drain is already in progress on this queue")]
    ConcurrentDrainConflict,

    /// Declaring the queue or opening the session failed
    #[error("drain could not start: {0}")]
    Connect(#[from] MessagingError),

    /// The session broke after the drain started; `report` covers the
    /// messages handled before that
    #[error("drain interrupted: {source}")]
    Interrupted {
        source: MessagingError,
        report: Box<DrainReport>,
    },
}

impl From<DrainError> for AppError {
    fn from(err: DrainError) -> Self {
        match err {
            DrainError::ConcurrentDrainConflict => AppError::Conflict(err.to_string()),
            DrainError::Connect(inner) => inner.into(),
            DrainError::Interrupted { source, .. } => source.into(),
        }
    }
}
