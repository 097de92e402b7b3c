//! Traits the notification service depends on, implemented by the host
//! application (persistence, user data, permissions, delivery channels).

use crate::error::NotifyResult;
use crate::notification::Notification;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A recipient as the user directory reports them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct User {
    /// Opaque user id.
    pub id: String,
    /// Email address, when the user has one on file.
    pub email: Option<String>,
    /// Push subscription records, opaque to this crate; the push channel
    /// knows their shape.
    pub push_subscriptions: Vec<serde_json::Value>,
}

/// Per-user channel preferences.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChannelPreferences {
    /// Email delivery enabled.
    pub email: bool,
    /// Push delivery enabled.
    pub push: bool,
    /// Kinds the user has muted entirely.
    pub muted_kinds: Vec<String>,
}

impl ChannelPreferences {
    /// Preferences with both channels enabled and nothing muted.
    pub fn all_enabled() -> Self {
        Self {
            email: true,
            push: true,
            muted_kinds: Vec::new(),
        }
    }

    /// Whether the kind is muted.
    pub fn is_muted(&self, kind: &str) -> bool {
        self.muted_kinds.iter().any(|muted| muted == kind)
    }
}

/// A carer linked to a patient.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Carer {
    /// The carer's own user id.
    pub id: String,
}

/// Notification persistence. Saves upsert by id; deletion happens only
/// through `purge_older_than` (the cleanup job's path).
#[async_trait]
pub trait NotificationStore: Send + Sync {
    /// Insert or update a record.
    async fn save(&self, notification: &Notification) -> NotifyResult<()>;

    /// Delete terminal records created before the cutoff. Returns how many
    /// were deleted.
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> NotifyResult<usize>;
}

/// Read access to users, their preferences, and their carers.
#[async_trait]
pub trait UserDirectory: Send + Sync {
    /// Look up a user. `None` means the user does not exist.
    async fn find_user(&self, id: &str) -> NotifyResult<Option<User>>;

    /// The user's channel preferences.
    async fn preferences(&self, id: &str) -> NotifyResult<ChannelPreferences>;

    /// Carers linked to the user.
    async fn carers_for(&self, id: &str) -> NotifyResult<Vec<Carer>>;
}

/// Consent/permission check, evaluated fresh on every send.
#[async_trait]
pub trait PermissionGate: Send + Sync {
    /// Whether the user may receive this kind right now.
    async fn can_receive(&self, user_id: &str, kind: &str) -> NotifyResult<bool>;
}

/// An email handed to the email channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboundEmail {
    /// Recipient address.
    pub to: String,
    /// Subject line (the kind's title).
    pub subject: String,
    /// HTML body.
    pub html: String,
    /// Encrypted channel content.
    pub ciphertext: Vec<u8>,
    /// Envelope signature (hex).
    pub signature: String,
}

/// A push message handed to the push channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushEnvelope {
    /// Push title (the kind's title).
    pub title: String,
    /// Push body.
    pub body: String,
    /// Kind-specific data payload.
    pub data: serde_json::Value,
    /// Encrypted channel content.
    pub ciphertext: Vec<u8>,
    /// Envelope signature (hex).
    pub signature: String,
}

/// Email delivery channel (batched SMTP in production).
#[async_trait]
pub trait EmailChannel: Send + Sync {
    /// Accept an email for delivery.
    async fn send(&self, email: OutboundEmail) -> NotifyResult<()>;
}

/// Push delivery channel (web push plus live connections in production).
#[async_trait]
pub trait PushChannel: Send + Sync {
    /// Deliver a push message to the user's subscriptions.
    async fn deliver(&self, user: &User, envelope: PushEnvelope) -> NotifyResult<()>;
}
