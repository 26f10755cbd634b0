//! Queue error type.

use pushlab_common::AppError;
use thiserror::Error;

/// Errors raised by queue operations.
#[derive(Debug, Error)]
pub enum QueueError {
    /// No live broker connection; a reconnect is in progress.
    #[error("queue connection unavailable")]
    Disconnected,

    /// Broker command failed.
    #[error("Redis operation failed: {0}")]
    Redis(String),

    /// Failed to encode or decode a message envelope.
    #[error("serialization failed: {0}")]
    Serialization(String),

    /// The queue was closed and will deliver no more messages.
    #[error("queue closed")]
    Closed,
}

impl From<fred::error::Error> for QueueError {
    fn from(err: fred::error::Error) -> Self {
        Self::Redis(err.to_string())
    }
}

impl From<serde_json::Error> for QueueError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

impl From<QueueError> for AppError {
    fn from(err: QueueError) -> Self {
        match err {
            QueueError::Redis(msg) => Self::Redis(msg),
            other => Self::Queue(other.to_string()),
        }
    }
}
