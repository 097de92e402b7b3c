//! Seams to the medication domain and notification layer.
//!
//! The pipeline never owns medication data or medical logic; handlers reach
//! both through these traits, implemented by the host application (and by
//! recording fakes in tests).

use crate::error::JobResult;
use async_trait::async_trait;
use dosewatch_queue::Job;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A medication as the directory reports it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Medication {
    /// Opaque medication id.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Prescribed dosage, when known.
    pub dosage: Option<String>,
}

/// One detected interaction between medications.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Interaction {
    /// Severity label, e.g. `"major"`.
    pub severity: String,
    /// Human-readable description.
    pub description: String,
}

/// Read access to the medication catalog.
#[async_trait]
pub trait MedicationDirectory: Send + Sync {
    /// Look up a medication. Missing ids are
    /// [`JobError::MedicationNotFound`](crate::JobError::MedicationNotFound).
    async fn get_medication(&self, id: &str) -> JobResult<Medication>;
}

/// External interaction analysis over a set of medications.
#[async_trait]
pub trait InteractionChecker: Send + Sync {
    /// Report interactions among the given medications.
    async fn check_interactions(&self, medications: &[Medication]) -> JobResult<Vec<Interaction>>;
}

/// Escalation path for jobs that exhaust their retry budget.
#[async_trait]
pub trait AdminAlert: Send + Sync {
    /// Raise an operator-facing alert for a permanently failed job.
    async fn escalate(&self, job: &Job, message: &str) -> JobResult<()>;
}

/// What a handler asks the notification layer to deliver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationSpec {
    /// Recipient user id.
    pub user_id: String,
    /// Notification kind, e.g. `"medication_reminder"`.
    pub kind: String,
    /// Message body.
    pub message: String,
    /// Kind-specific metadata.
    pub metadata: Map<String, Value>,
}

impl NotificationSpec {
    /// Build a spec with empty metadata.
    pub fn new(user_id: impl Into<String>, kind: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            user_id: user_id.into(),
            kind: kind.into(),
            message: message.into(),
            metadata: Map::new(),
        }
    }

    /// Attach one metadata entry.
    pub fn with_meta(mut self, key: impl Into<String>, value: Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }
}

/// Create-and-send path into the notification layer.
#[async_trait]
pub trait NotificationGateway: Send + Sync {
    /// Create a notification and send it immediately.
    async fn create_and_send(&self, spec: NotificationSpec) -> JobResult<()>;
}

/// Purge path into the notification store, used by the cleanup job. The
/// only deletion path for notification records.
#[async_trait]
pub trait NotificationJanitor: Send + Sync {
    /// Delete terminal notifications older than the cutoff. Returns how
    /// many were deleted.
    async fn purge_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> JobResult<usize>;
}
