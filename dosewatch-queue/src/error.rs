//! Error types for queue operations.

use crate::job::JobKind;
use thiserror::Error;

/// Result type for queue operations.
pub type QueueResult<T> = Result<T, QueueError>;

/// Queue-specific errors.
#[derive(Debug, Error)]
pub enum QueueError {
    /// Redis error
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Deserialization error
    #[error("Deserialization error: {0}")]
    Deserialization(String),

    /// No backing queue was provisioned for the job kind
    #[error("No queue provisioned for job kind: {0}")]
    QueueNotFound(JobKind),

    /// Job not found
    #[error("Job not found: {0}")]
    JobNotFound(String),

    /// Backend rejected or lost the operation
    #[error("Queue backend error: {0}")]
    Backend(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),
}
