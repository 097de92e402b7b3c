//! Queue metrics rollups.

use crate::error::JobResult;
use crate::handler::JobHandler;
use async_trait::async_trait;
use dosewatch_metrics::Metrics;
use dosewatch_queue::{Job, JobKind, QueueService};
use serde_json::json;
use tracing::info;

/// Snapshots queue counts into gauges so the scrape endpoint sees queue
/// depth without hitting the backends on every scrape.
pub struct MetricsRollupHandler {
    queues: QueueService,
    metrics: Metrics,
}

impl MetricsRollupHandler {
    /// Create the handler over the queue service.
    pub fn new(queues: QueueService, metrics: Metrics) -> Self {
        Self { queues, metrics }
    }
}

#[async_trait]
impl JobHandler for MetricsRollupHandler {
    fn kind(&self) -> JobKind {
        JobKind::MetricsRollup
    }

    async fn process(&self, _job: &Job) -> JobResult<serde_json::Value> {
        let total = self.queues.aggregate_metrics().await;

        self.metrics.set_gauge("queue.waiting", total.waiting as f64);
        self.metrics.set_gauge("queue.active", total.active as f64);
        self.metrics.set_gauge("queue.completed", total.completed as f64);
        self.metrics.set_gauge("queue.failed", total.failed as f64);
        self.metrics.set_gauge("queue.delayed", total.delayed as f64);

        for (kind, counts) in self.queues.queue_metrics().await {
            self.metrics
                .set_gauge(&format!("queue.{}.waiting", kind), counts.waiting as f64);
            self.metrics
                .set_gauge(&format!("queue.{}.failed", kind), counts.failed as f64);
        }

        info!(
            waiting = total.waiting,
            active = total.active,
            completed = total.completed,
            failed = total.failed,
            delayed = total.delayed,
            "queue metrics rollup"
        );

        Ok(json!({
            "waiting": total.waiting,
            "active": total.active,
            "completed": total.completed,
            "failed": total.failed,
            "delayed": total.delayed,
        }))
    }
}
