//! Medication interaction checks.

use super::str_field;
use crate::domain::{InteractionChecker, MedicationDirectory, NotificationGateway, NotificationSpec};
use crate::error::JobResult;
use crate::handler::JobHandler;
use async_trait::async_trait;
use dosewatch_queue::{Job, JobData, JobKind};
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, info};

/// Runs the external interaction checker over a user's medication list and
/// sends an `interaction_alert` when anything is found.
pub struct InteractionCheckHandler {
    medications: Arc<dyn MedicationDirectory>,
    checker: Arc<dyn InteractionChecker>,
    notifications: Arc<dyn NotificationGateway>,
}

impl InteractionCheckHandler {
    /// Create the handler over its seams.
    pub fn new(
        medications: Arc<dyn MedicationDirectory>,
        checker: Arc<dyn InteractionChecker>,
        notifications: Arc<dyn NotificationGateway>,
    ) -> Self {
        Self {
            medications,
            checker,
            notifications,
        }
    }
}

#[async_trait]
impl JobHandler for InteractionCheckHandler {
    fn kind(&self) -> JobKind {
        JobKind::InteractionCheck
    }

    fn validate(&self, data: &JobData) -> bool {
        let ids_ok = data
            .get("medication_ids")
            .and_then(|v| v.as_array())
            .map(|ids| ids.len() >= 2 && ids.iter().all(|id| id.is_string()))
            .unwrap_or(false);
        str_field(data, "user_id").is_some() && ids_ok
    }

    async fn process(&self, job: &Job) -> JobResult<serde_json::Value> {
        let user_id = str_field(&job.data, "user_id").unwrap_or_default();
        let ids: Vec<&str> = job
            .data
            .get("medication_ids")
            .and_then(|v| v.as_array())
            .map(|ids| ids.iter().filter_map(|id| id.as_str()).collect())
            .unwrap_or_default();

        let mut medications = Vec::with_capacity(ids.len());
        for id in &ids {
            medications.push(self.medications.get_medication(id).await?);
        }

        let interactions = self.checker.check_interactions(&medications).await?;
        debug!(user_id, medications = medications.len(), interactions = interactions.len(), "interaction check");

        if !interactions.is_empty() {
            info!(user_id, count = interactions.len(), "interactions found, alerting user");
            let worst = &interactions[0];
            let spec = NotificationSpec::new(
                user_id,
                "interaction_alert",
                format!(
                    "Possible interaction between your medications: {}",
                    worst.description
                ),
            )
            .with_meta("interactions", json!(interactions))
            .with_meta("medication_ids", json!(ids));

            self.notifications.create_and_send(spec).await?;
        }

        Ok(json!({"interactions_found": interactions.len()}))
    }
}
