//! Job processor: routes dequeued jobs to their registered handler.

use crate::domain::AdminAlert;
use crate::error::{JobError, JobResult};
use crate::handler::JobHandler;
use async_trait::async_trait;
use dosewatch_metrics::Metrics;
use dosewatch_queue::{Job, JobDispatcher, JobKind};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, warn};

/// Builder for [`JobProcessor`]. Registration rejects duplicate kinds so
/// every kind has exactly one handler.
pub struct JobProcessorBuilder {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    metrics: Metrics,
    alerts: Option<Arc<dyn AdminAlert>>,
}

impl JobProcessorBuilder {
    /// Start a builder recording through the given metrics handle.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            handlers: HashMap::new(),
            metrics,
            alerts: None,
        }
    }

    /// Register a handler for its kind.
    pub fn register(mut self, handler: Arc<dyn JobHandler>) -> JobResult<Self> {
        let kind = handler.kind();
        if self.handlers.contains_key(&kind) {
            return Err(JobError::DuplicateHandler(kind));
        }
        self.handlers.insert(kind, handler);
        Ok(self)
    }

    /// Set the escalation path for permanently failed jobs.
    pub fn with_alerts(mut self, alerts: Arc<dyn AdminAlert>) -> Self {
        self.alerts = Some(alerts);
        self
    }

    /// Build the processor.
    pub fn build(self) -> JobProcessor {
        JobProcessor {
            handlers: self.handlers,
            metrics: self.metrics,
            alerts: self.alerts,
        }
    }
}

impl std::fmt::Debug for JobProcessorBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("JobProcessorBuilder")
            .field("kinds", &self.handlers.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

/// Stateless router from jobs to handlers. Safe to share across workers.
pub struct JobProcessor {
    handlers: HashMap<JobKind, Arc<dyn JobHandler>>,
    metrics: Metrics,
    alerts: Option<Arc<dyn AdminAlert>>,
}

impl JobProcessor {
    /// Start building a processor.
    pub fn builder(metrics: Metrics) -> JobProcessorBuilder {
        JobProcessorBuilder::new(metrics)
    }

    /// Kinds with a registered handler.
    pub fn kinds(&self) -> Vec<JobKind> {
        self.handlers.keys().copied().collect()
    }

    /// Process one job attempt.
    ///
    /// Errors propagate to the caller; the queue backend owns retries. The
    /// handler's `on_failed` and the admin escalation fire only when the
    /// failing attempt was the last one.
    pub async fn process_job(&self, job: &Job) -> JobResult<serde_json::Value> {
        let started = Instant::now();
        match self.run(job).await {
            Ok(value) => {
                self.metrics.incr("job.completed");
                self.metrics.observe_latency("job.duration", started.elapsed());
                debug!(job_id = %job.id, kind = %job.kind, attempt = job.attempts, "job completed");
                if let Some(handler) = self.handlers.get(&job.kind) {
                    handler.on_completed(job, &value).await;
                }
                Ok(value)
            }
            Err(e) => {
                self.metrics.incr("job.failed");
                warn!(
                    job_id = %job.id,
                    kind = %job.kind,
                    attempt = job.attempts,
                    max_attempts = job.max_attempts,
                    error = %e,
                    "job attempt failed"
                );
                if job.is_final_attempt() {
                    error!(job_id = %job.id, kind = %job.kind, error = %e, "job permanently failed");
                    if let Some(handler) = self.handlers.get(&job.kind) {
                        handler.on_failed(job, &e).await;
                    }
                    if let Some(alerts) = &self.alerts {
                        if let Err(alert_err) = alerts.escalate(job, &e.to_string()).await {
                            warn!(job_id = %job.id, error = %alert_err, "failed to escalate job failure");
                        }
                    }
                }
                Err(e)
            }
        }
    }

    async fn run(&self, job: &Job) -> JobResult<serde_json::Value> {
        let handler = self
            .handlers
            .get(&job.kind)
            .ok_or(JobError::UnknownJobKind(job.kind))?;
        if !handler.validate(&job.data) {
            return Err(JobError::InvalidJobData {
                kind: job.kind,
                reason: "payload failed validation".to_string(),
            });
        }
        handler.process(job).await
    }
}

#[async_trait]
impl JobDispatcher for JobProcessor {
    async fn dispatch(&self, job: &Job) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        self.process_job(job).await?;
        Ok(())
    }
}
