//! Notification layer for the Dosewatch pipeline.
//!
//! A [`Notification`] is created `Scheduled`, then driven to exactly one
//! terminal state (`Sent` or `Failed`) by
//! [`NotificationService::send_notification`]. Sends pass a per-user rate
//! limiter, a permission gate, and the user's channel preferences before
//! content is encrypted, signed, and handed to the email and push channel
//! seams. Intentional skips are outcomes, never errors.

pub mod crypto;
pub mod error;
pub mod notification;
pub mod ratelimit;
pub mod seams;
pub mod service;

pub use crypto::{HmacSha256Signer, PayloadCrypto};
pub use error::{NotifyError, NotifyResult};
pub use notification::{
    KindConfig, Notification, NotificationCatalog, NotificationPriority, NotificationStatus,
};
pub use ratelimit::{CooldownLimiter, CooldownPolicy, Decision};
pub use seams::{
    Carer, ChannelPreferences, EmailChannel, NotificationStore, OutboundEmail, PermissionGate,
    PushChannel, PushEnvelope, User, UserDirectory,
};
pub use service::{
    NotificationService, NotificationServiceBuilder, SendOutcome, SkipReason,
};
