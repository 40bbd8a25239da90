//! Error types for catch-up subscriptions.

use crate::subscriptions::DropReason;
use thiserror::Error;

/// Error returned by a subscription handler callback.
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

/// Main error type for subscription operations.
#[derive(Debug, Error)]
pub enum SubscriptionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Access denied: {0}")]
    AccessDenied(String),

    #[error("Not authenticated")]
    NotAuthenticated,

    #[error("Stream deleted: {0}")]
    StreamDeleted(String),

    #[error("Connection closed: {0}")]
    ConnectionClosed(String),

    #[error("Operation timed out: {0}")]
    Timeout(String),

    #[error("Server error: {0}")]
    Server(String),

    #[error("Event handler failed: {0}")]
    Handler(#[source] HandlerError),

    #[error("Event handler panicked: {0}")]
    HandlerPanicked(String),

    #[error("Invalid settings: {0}")]
    InvalidSettings(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Could not stop subscription '{0}' in time")]
    StopTimeout(String),
}

impl SubscriptionError {
    /// Classify a transport failure into the drop taxonomy used for live feeds.
    pub fn drop_reason(&self) -> DropReason {
        match self {
            SubscriptionError::ConnectionClosed(_)
            | SubscriptionError::Io(_)
            | SubscriptionError::Timeout(_) => DropReason::ConnectionClosed,
            SubscriptionError::AccessDenied(_) => DropReason::AccessDenied,
            SubscriptionError::NotAuthenticated => DropReason::NotAuthenticated,
            SubscriptionError::StreamDeleted(_) => DropReason::StreamDeleted,
            SubscriptionError::Server(_) => DropReason::ServerError,
            SubscriptionError::Handler(_) | SubscriptionError::HandlerPanicked(_) => {
                DropReason::ProcessingError
            }
            SubscriptionError::InvalidSettings(_)
            | SubscriptionError::Config(_)
            | SubscriptionError::StopTimeout(_) => DropReason::Unknown,
        }
    }
}

impl From<serde_json::Error> for SubscriptionError {
    fn from(e: serde_json::Error) -> Self {
        SubscriptionError::Config(e.to_string())
    }
}

/// Result type for subscription operations.
pub type Result<T> = std::result::Result<T, SubscriptionError>;
