//! SMTP delivery with per-recipient batching for the Dosewatch pipeline.
//!
//! Emails are submitted to an [`EmailBatcher`], which groups them per
//! recipient and flushes a batch when it reaches five items or its oldest
//! item has waited fifteen minutes. Multi-item batches are collapsed into a
//! single digest email. A recipient receives at most one outbound email
//! every five minutes; submissions inside that floor are dropped.
//!
//! ```no_run
//! use dosewatch_mail::{BatcherConfig, EmailBatcher, EmailData, SmtpConfig, SmtpTransport};
//! use dosewatch_metrics::Metrics;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = SmtpTransport::new(SmtpConfig::gmail(
//!     "user",
//!     "app-password",
//!     "Dosewatch <noreply@dosewatch.app>",
//! ))?;
//! let batcher = EmailBatcher::start(
//!     BatcherConfig::default(),
//!     Arc::new(transport),
//!     Metrics::new()?,
//! );
//!
//! batcher
//!     .send_email(EmailData::new(
//!         "patient@example.com",
//!         "Medication Reminder",
//!         "<p>Time to take Metformin (500mg)</p>",
//!     ))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod batcher;
mod email;
mod error;
mod transport;

pub use batcher::{BatcherConfig, EmailBatcher};
pub use email::EmailData;
pub use error::{MailError, MailResult};
pub use transport::{SmtpConfig, SmtpSecurity, SmtpTransport, Transport};
