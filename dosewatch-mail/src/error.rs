//! Error types for email delivery.

use thiserror::Error;

/// Result type for mail operations.
pub type MailResult<T> = Result<T, MailError>;

/// Mail-specific errors.
#[derive(Debug, Error)]
pub enum MailError {
    /// Invalid email address
    #[error("invalid address: {0}")]
    Address(#[from] lettre::address::AddressError),

    /// SMTP transport failure; usually transient.
    #[error("SMTP error: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),

    /// Message could not be built
    #[error("message build error: {0}")]
    Build(#[from] lettre::error::Error),

    /// The batcher has shut down and accepts no more mail.
    #[error("mail queue closed")]
    QueueClosed,

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),
}
