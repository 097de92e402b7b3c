//! Scheduled medication reminders.

use super::str_field;
use crate::domain::{MedicationDirectory, NotificationGateway, NotificationSpec};
use crate::error::JobResult;
use crate::handler::JobHandler;
use async_trait::async_trait;
use dosewatch_queue::{Job, JobData, JobKind};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Sends a `medication_reminder` notification at a dose's scheduled time.
pub struct MedicationReminderHandler {
    medications: Arc<dyn MedicationDirectory>,
    notifications: Arc<dyn NotificationGateway>,
}

impl MedicationReminderHandler {
    /// Create the handler over its seams.
    pub fn new(
        medications: Arc<dyn MedicationDirectory>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            medications,
            notifications,
        }
    }
}

#[async_trait]
impl JobHandler for MedicationReminderHandler {
    fn kind(&self) -> JobKind {
        JobKind::MedicationReminder
    }

    fn validate(&self, data: &JobData) -> bool {
        str_field(data, "user_id").is_some()
            && str_field(data, "medication_id").is_some()
            && str_field(data, "scheduled_time").is_some()
            && str_field(data, "dosage").is_some()
    }

    async fn process(&self, job: &Job) -> JobResult<serde_json::Value> {
        let user_id = str_field(&job.data, "user_id").unwrap_or_default();
        let medication_id = str_field(&job.data, "medication_id").unwrap_or_default();
        let scheduled_time = str_field(&job.data, "scheduled_time").unwrap_or_default();
        let dosage = str_field(&job.data, "dosage").unwrap_or_default();

        let medication = self.medications.get_medication(medication_id).await?;
        debug!(user_id, medication = %medication.name, "sending medication reminder");

        let spec = NotificationSpec::new(
            user_id,
            "medication_reminder",
            format!("Time to take {} ({})", medication.name, dosage),
        )
        .with_meta("medication_name", json!(medication.name))
        .with_meta("dosage", json!(dosage))
        .with_meta("scheduled_time", json!(scheduled_time));

        self.notifications.create_and_send(spec).await?;

        Ok(json!({"medication_id": medication_id, "reminded": true}))
    }
}
