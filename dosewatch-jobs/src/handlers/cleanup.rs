//! Notification retention cleanup.

use super::u64_field;
use crate::domain::NotificationJanitor;
use crate::error::JobResult;
use crate::handler::JobHandler;
use async_trait::async_trait;
use chrono::Utc;
use dosewatch_queue::{Job, JobData, JobKind};
use serde_json::json;
use std::sync::Arc;
use tracing::info;

const DEFAULT_RETENTION_DAYS: u64 = 90;

/// Purges terminal notifications past their retention window.
pub struct NotificationCleanupHandler {
    janitor: Arc<dyn NotificationJanitor>,
}

impl NotificationCleanupHandler {
    /// Create the handler over the store's purge seam.
    pub fn new(janitor: Arc<dyn NotificationJanitor>) -> Self {
        Self { janitor }
    }
}

#[async_trait]
impl JobHandler for NotificationCleanupHandler {
    fn kind(&self) -> JobKind {
        JobKind::NotificationCleanup
    }

    fn validate(&self, data: &JobData) -> bool {
        // retention_days is optional but must be numeric when present.
        data.get("retention_days").is_none() || u64_field(data, "retention_days").is_some()
    }

    async fn process(&self, job: &Job) -> JobResult<serde_json::Value> {
        let retention_days =
            u64_field(&job.data, "retention_days").unwrap_or(DEFAULT_RETENTION_DAYS);
        let cutoff = Utc::now() - chrono::Duration::days(retention_days as i64);

        let purged = self.janitor.purge_older_than(cutoff).await?;
        info!(retention_days, purged, "notification cleanup finished");

        Ok(json!({"purged": purged, "retention_days": retention_days}))
    }
}
