//! Dead job cleanup.

use super::u64_field;
use crate::error::JobResult;
use crate::handler::JobHandler;
use async_trait::async_trait;
use dosewatch_queue::{Job, JobData, JobKind, QueueService};
use serde_json::json;
use std::time::Duration;
use tracing::info;

const DEFAULT_OLDER_THAN_HOURS: u64 = 24;

/// Purges dead jobs that exhausted their retry budget and aged out.
pub struct ErrorCleanupHandler {
    queues: QueueService,
}

impl ErrorCleanupHandler {
    /// Create the handler over the queue service.
    pub fn new(queues: QueueService) -> Self {
        Self { queues }
    }
}

#[async_trait]
impl JobHandler for ErrorCleanupHandler {
    fn kind(&self) -> JobKind {
        JobKind::ErrorCleanup
    }

    fn validate(&self, data: &JobData) -> bool {
        data.get("older_than_hours").is_none() || u64_field(data, "older_than_hours").is_some()
    }

    async fn process(&self, job: &Job) -> JobResult<serde_json::Value> {
        let older_than_hours =
            u64_field(&job.data, "older_than_hours").unwrap_or(DEFAULT_OLDER_THAN_HOURS);
        let older_than = Duration::from_secs(older_than_hours * 3600);

        let purged = self.queues.purge_dead(older_than).await?;
        info!(older_than_hours, purged, "dead job cleanup finished");

        Ok(json!({"purged": purged, "older_than_hours": older_than_hours}))
    }
}
