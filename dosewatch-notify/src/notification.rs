//! Notification records and the kind catalog.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use uuid::Uuid;

/// Notification lifecycle state. `Scheduled` is the only non-terminal
/// state; a record that reached `Sent` or `Failed` never changes again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationStatus {
    /// Created, not yet delivered.
    Scheduled,
    /// Delivered on every attempted channel.
    Sent,
    /// Delivery failed.
    Failed,
}

impl NotificationStatus {
    /// Whether the state is terminal.
    pub fn is_terminal(&self) -> bool {
        !matches!(self, NotificationStatus::Scheduled)
    }
}

/// Notification priority, taken from the kind's catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum NotificationPriority {
    /// Urgent, e.g. interaction alerts.
    High,
    /// Routine reminders.
    #[default]
    Medium,
    /// Informational.
    Low,
}

/// One notification record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Notification {
    /// Unique identifier.
    pub id: Uuid,
    /// Recipient user id.
    pub user_id: String,
    /// Catalog kind, e.g. `"medication_reminder"`.
    pub kind: String,
    /// Lifecycle state.
    pub status: NotificationStatus,
    /// Priority from the kind's catalog entry.
    pub priority: NotificationPriority,
    /// Message body.
    pub message: String,
    /// Kind-specific metadata.
    pub metadata: Map<String, Value>,
    /// When the record was created.
    pub created_at: DateTime<Utc>,
    /// When delivery should happen, if deferred.
    pub scheduled_time: Option<DateTime<Utc>>,
    /// When delivery succeeded.
    pub sent_at: Option<DateTime<Utc>>,
    /// Why delivery failed.
    pub error_message: Option<String>,
}

impl Notification {
    /// Create a scheduled notification.
    pub fn new(
        user_id: impl Into<String>,
        kind: impl Into<String>,
        priority: NotificationPriority,
        message: impl Into<String>,
        metadata: Map<String, Value>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            user_id: user_id.into(),
            kind: kind.into(),
            status: NotificationStatus::Scheduled,
            priority,
            message: message.into(),
            metadata,
            created_at: Utc::now(),
            scheduled_time: None,
            sent_at: None,
            error_message: None,
        }
    }

    /// Defer delivery to a future time.
    pub fn with_schedule(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_time = Some(time);
        self
    }

    /// Transition to `Sent`. No-op once terminal.
    pub fn mark_sent(&mut self) {
        if self.status.is_terminal() {
            return;
        }
        self.status = NotificationStatus::Sent;
        self.sent_at = Some(Utc::now());
    }

    /// Transition to `Failed` with a reason. No-op once terminal.
    pub fn mark_failed(&mut self, reason: impl Into<String>) {
        if self.status.is_terminal() {
            return;
        }
        self.status = NotificationStatus::Failed;
        self.error_message = Some(reason.into());
    }

    /// Whether this record is a carer copy produced by fan-out.
    pub fn is_carer_copy(&self) -> bool {
        self.metadata
            .get("is_carer_notification")
            .and_then(|v| v.as_bool())
            .unwrap_or(false)
    }
}

/// Static configuration for one notification kind.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KindConfig {
    /// Display title used as the email subject and push title.
    pub title: String,
    /// Delivery priority.
    pub priority: NotificationPriority,
    /// Whether the recipient's carers get their own copy.
    pub notify_carers: bool,
}

/// Owned catalog of notification kinds. Looked up on every create and
/// send; an unknown kind is a configuration error.
#[derive(Debug, Clone)]
pub struct NotificationCatalog {
    kinds: HashMap<String, KindConfig>,
}

impl NotificationCatalog {
    /// Catalog with the built-in kinds.
    pub fn built_in() -> Self {
        let mut kinds = HashMap::new();
        kinds.insert(
            "medication_reminder".to_string(),
            KindConfig {
                title: "Medication Reminder".to_string(),
                priority: NotificationPriority::Medium,
                notify_carers: false,
            },
        );
        kinds.insert(
            "refill_reminder".to_string(),
            KindConfig {
                title: "Refill Reminder".to_string(),
                priority: NotificationPriority::Medium,
                notify_carers: false,
            },
        );
        kinds.insert(
            "interaction_alert".to_string(),
            KindConfig {
                title: "Interaction Alert".to_string(),
                priority: NotificationPriority::High,
                notify_carers: true,
            },
        );
        kinds.insert(
            "missed_dose_alert".to_string(),
            KindConfig {
                title: "Missed Dose Alert".to_string(),
                priority: NotificationPriority::High,
                notify_carers: true,
            },
        );
        kinds.insert(
            "admin_alert".to_string(),
            KindConfig {
                title: "System Alert".to_string(),
                priority: NotificationPriority::High,
                notify_carers: false,
            },
        );
        Self { kinds }
    }

    /// Add or replace a kind.
    pub fn with_kind(mut self, name: impl Into<String>, config: KindConfig) -> Self {
        self.kinds.insert(name.into(), config);
        self
    }

    /// Look up a kind's configuration.
    pub fn get(&self, kind: &str) -> Option<&KindConfig> {
        self.kinds.get(kind)
    }
}
