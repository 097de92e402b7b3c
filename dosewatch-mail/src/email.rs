//! Outbound email data.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// One email as submitted to the batcher.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EmailData {
    /// Recipient address.
    pub to: String,
    /// Subject line.
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// When the email was created.
    pub created_at: DateTime<Utc>,
    /// Envelope signature carried as an `X-Dosewatch-Signature` header.
    /// Digests drop it; a combined body has no single valid signature.
    pub signature: Option<String>,
}

impl EmailData {
    /// Create an email.
    pub fn new(
        to: impl Into<String>,
        subject: impl Into<String>,
        html: impl Into<String>,
    ) -> Self {
        Self {
            to: to.into(),
            subject: subject.into(),
            html: html.into(),
            created_at: Utc::now(),
            signature: None,
        }
    }

    /// Attach an envelope signature.
    pub fn with_signature(mut self, signature: impl Into<String>) -> Self {
        self.signature = Some(signature.into());
        self
    }
}
