//! Refill supply checks.

use super::{str_field, u64_field};
use crate::domain::{NotificationGateway, NotificationSpec};
use crate::error::JobResult;
use crate::handler::JobHandler;
use async_trait::async_trait;
use dosewatch_queue::{Job, JobData, JobKind};
use serde_json::json;
use std::sync::Arc;
use tracing::debug;

/// Sends a `refill_reminder` when a medication supply falls to its
/// threshold. Completes either way; a healthy supply is not a failure.
pub struct RefillCheckHandler {
    notifications: Arc<dyn NotificationGateway>,
}

impl RefillCheckHandler {
    /// Create the handler over its notification seam.
    pub fn new(notifications: Arc<dyn NotificationGateway>) -> Self {
        Self { notifications }
    }
}

#[async_trait]
impl JobHandler for RefillCheckHandler {
    fn kind(&self) -> JobKind {
        JobKind::RefillCheck
    }

    fn validate(&self, data: &JobData) -> bool {
        str_field(data, "user_id").is_some()
            && str_field(data, "medication_id").is_some()
            && u64_field(data, "current_supply").is_some()
            && u64_field(data, "threshold").is_some()
    }

    async fn process(&self, job: &Job) -> JobResult<serde_json::Value> {
        let user_id = str_field(&job.data, "user_id").unwrap_or_default();
        let medication_id = str_field(&job.data, "medication_id").unwrap_or_default();
        let current_supply = u64_field(&job.data, "current_supply").unwrap_or_default();
        let threshold = u64_field(&job.data, "threshold").unwrap_or_default();

        let needs_refill = current_supply <= threshold;
        debug!(user_id, medication_id, current_supply, threshold, needs_refill, "refill check");

        if needs_refill {
            let spec = NotificationSpec::new(
                user_id,
                "refill_reminder",
                format!("Your medication supply is low: {} doses left", current_supply),
            )
            .with_meta("medication_id", json!(medication_id))
            .with_meta("current_supply", json!(current_supply));

            self.notifications.create_and_send(spec).await?;
        }

        Ok(json!({"needs_refill": needs_refill}))
    }
}
