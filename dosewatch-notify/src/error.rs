//! Error types for the notification layer.

use thiserror::Error;

/// Result type for notification operations.
pub type NotifyResult<T> = Result<T, NotifyError>;

/// Notification-layer errors.
///
/// Intentional skips (rate limits, permissions, preferences) are not
/// errors; they are [`SendOutcome::Skipped`](crate::SendOutcome::Skipped).
#[derive(Debug, Error)]
pub enum NotifyError {
    /// Notification kind missing from the catalog; a configuration bug.
    #[error("unknown notification kind: {0}")]
    UnknownKind(String),

    /// Recipient does not exist; a data inconsistency, not a skip.
    #[error("user not found: {0}")]
    UserNotFound(String),

    /// The notification store failed.
    #[error("store error: {0}")]
    Store(String),

    /// The user directory failed.
    #[error("user directory error: {0}")]
    Directory(String),

    /// The permission gate failed (distinct from denying).
    #[error("permission check failed: {0}")]
    Permission(String),

    /// Payload encryption or signing failed.
    #[error("crypto error: {0}")]
    Crypto(String),

    /// A delivery channel failed.
    #[error("{channel} channel error: {reason}")]
    Channel {
        /// Which channel failed (`email` or `push`).
        channel: &'static str,
        /// What went wrong.
        reason: String,
    },

    /// Payload serialization failed.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
