//! Push delivery error types.

use thiserror::Error;

/// Result type for push operations.
pub type PushResult<T> = Result<T, PushError>;

/// Push delivery errors.
#[derive(Debug, Error)]
pub enum PushError {
    /// Subscription is structurally invalid.
    #[error("invalid subscription: {0}")]
    Subscription(String),

    /// Endpoint no longer exists (410 Gone / unsubscribed).
    #[error("endpoint gone: {0}")]
    Gone(String),

    /// Transient network failure.
    #[error("network error: {0}")]
    Network(String),

    /// Delivery timed out.
    #[error("push timed out")]
    Timeout,

    /// Push service or WebSocket protocol error.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl PushError {
    /// True for failures worth retrying.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Timeout)
    }
}

impl From<web_push::WebPushError> for PushError {
    fn from(err: web_push::WebPushError) -> Self {
        let text = err.to_string();
        let lower = text.to_lowercase();
        if lower.contains("gone")
            || lower.contains("410")
            || lower.contains("unsubscribed")
            || lower.contains("expired")
            || lower.contains("not found")
        {
            Self::Gone(text)
        } else if lower.contains("timed out") || lower.contains("timeout") {
            Self::Timeout
        } else if lower.contains("connection") || lower.contains("network") {
            Self::Network(text)
        } else if lower.contains("endpoint") || lower.contains("invalid") {
            Self::Subscription(text)
        } else {
            Self::Protocol(text)
        }
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for PushError {
    fn from(err: tokio_tungstenite::tungstenite::Error) -> Self {
        match err {
            tokio_tungstenite::tungstenite::Error::Io(e) => Self::Io(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}
