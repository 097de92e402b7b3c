//! Queue service: one backend per job kind behind a single enqueue facade.

use crate::backend::{MemoryBackend, QueueBackend, QueueMetrics};
use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobData, JobId, JobKind, JobOptions};
use chrono::{DateTime, Utc};
use dosewatch_metrics::Metrics;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

struct NamedQueue {
    backend: Arc<dyn QueueBackend>,
    paused: Arc<AtomicBool>,
}

struct Inner {
    queues: HashMap<JobKind, NamedQueue>,
    defaults: JobOptions,
    metrics: Metrics,
}

/// Builder for [`QueueService`].
pub struct QueueServiceBuilder {
    queues: HashMap<JobKind, NamedQueue>,
    defaults: JobOptions,
    metrics: Metrics,
}

impl QueueServiceBuilder {
    /// Start a builder recording through the given metrics handle.
    pub fn new(metrics: Metrics) -> Self {
        Self {
            queues: HashMap::new(),
            defaults: JobOptions::default(),
            metrics,
        }
    }

    /// Provision a queue for one job kind.
    pub fn with_queue(mut self, kind: JobKind, backend: Arc<dyn QueueBackend>) -> Self {
        self.queues.insert(
            kind,
            NamedQueue {
                backend,
                paused: Arc::new(AtomicBool::new(false)),
            },
        );
        self
    }

    /// Provision an in-memory queue for every job kind.
    pub fn with_memory_queues(mut self) -> Self {
        for kind in JobKind::ALL {
            self = self.with_queue(kind, Arc::new(MemoryBackend::new()));
        }
        self
    }

    /// Override the instance-wide default job options.
    pub fn with_defaults(mut self, defaults: JobOptions) -> Self {
        self.defaults = defaults;
        self
    }

    /// Build the service.
    pub fn build(self) -> QueueService {
        info!(queues = self.queues.len(), "queue service ready");
        QueueService {
            inner: Arc::new(Inner {
                queues: self.queues,
                defaults: self.defaults,
                metrics: self.metrics,
            }),
        }
    }
}

/// Enqueue facade over the provisioned per-kind queues.
///
/// Cloneable; clones share the same queues and pause flags.
#[derive(Clone)]
pub struct QueueService {
    inner: Arc<Inner>,
}

impl QueueService {
    /// Start building a service.
    pub fn builder(metrics: Metrics) -> QueueServiceBuilder {
        QueueServiceBuilder::new(metrics)
    }

    fn queue(&self, kind: JobKind) -> QueueResult<&NamedQueue> {
        self.inner
            .queues
            .get(&kind)
            .ok_or(QueueError::QueueNotFound(kind))
    }

    /// Enqueue a job with the instance-wide default options.
    pub async fn add_job(&self, kind: JobKind, data: JobData) -> QueueResult<Job> {
        self.add_job_with(kind, data, self.inner.defaults.clone())
            .await
    }

    /// Enqueue a job with explicit options.
    pub async fn add_job_with(
        &self,
        kind: JobKind,
        data: JobData,
        options: JobOptions,
    ) -> QueueResult<Job> {
        let queue = self.queue(kind)?;
        let job = Job::new(kind, data, options);

        match queue.backend.push(job.clone()).await {
            Ok(()) => {
                self.inner.metrics.incr("queue.job_added");
                debug!(job_id = %job.id, kind = %kind, priority = ?job.priority, "job enqueued");
                Ok(job)
            }
            Err(e) => {
                self.inner.metrics.incr("queue.job_add_failed");
                warn!(kind = %kind, error = %e, "failed to enqueue job");
                Err(e)
            }
        }
    }

    /// Enqueue a job that becomes ready at a future time.
    pub async fn schedule_job(
        &self,
        kind: JobKind,
        data: JobData,
        options: JobOptions,
        at: DateTime<Utc>,
    ) -> QueueResult<Job> {
        let queue = self.queue(kind)?;
        let job = Job::new(kind, data, options).schedule_at(at);

        queue.backend.push(job.clone()).await?;
        self.inner.metrics.incr("queue.job_added");
        debug!(job_id = %job.id, kind = %kind, ready_at = %at, "delayed job enqueued");
        Ok(job)
    }

    /// Fetch a job record by id, scanning every queue. `None` means the
    /// record no longer exists (or never did); that is not an error.
    pub async fn get_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        for queue in self.inner.queues.values() {
            if let Some(job) = queue.backend.get(id).await? {
                return Ok(Some(job));
            }
        }
        Ok(None)
    }

    /// Cancel a job wherever it is. Returns whether anything was removed.
    pub async fn remove_job(&self, id: JobId) -> QueueResult<bool> {
        for queue in self.inner.queues.values() {
            if queue.backend.remove(id).await? {
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Stop handing out jobs for one kind. Already-active jobs finish.
    pub fn pause(&self, kind: JobKind) -> QueueResult<()> {
        self.queue(kind)?.paused.store(true, Ordering::SeqCst);
        info!(kind = %kind, "queue paused");
        Ok(())
    }

    /// Resume handing out jobs for one kind.
    pub fn resume(&self, kind: JobKind) -> QueueResult<()> {
        self.queue(kind)?.paused.store(false, Ordering::SeqCst);
        info!(kind = %kind, "queue resumed");
        Ok(())
    }

    /// Pause every provisioned queue.
    pub fn pause_all(&self) {
        for queue in self.inner.queues.values() {
            queue.paused.store(true, Ordering::SeqCst);
        }
        info!("all queues paused");
    }

    /// Resume every provisioned queue.
    pub fn resume_all(&self) {
        for queue in self.inner.queues.values() {
            queue.paused.store(false, Ordering::SeqCst);
        }
        info!("all queues resumed");
    }

    /// Whether a queue is paused.
    pub fn is_paused(&self, kind: JobKind) -> bool {
        self.inner
            .queues
            .get(&kind)
            .map(|q| q.paused.load(Ordering::SeqCst))
            .unwrap_or(false)
    }

    /// Job kinds with a provisioned queue.
    pub fn kinds(&self) -> Vec<JobKind> {
        self.inner.queues.keys().copied().collect()
    }

    /// Backend and pause flag for one kind, for worker loops.
    pub(crate) fn lease(&self, kind: JobKind) -> QueueResult<(Arc<dyn QueueBackend>, Arc<AtomicBool>)> {
        let queue = self.queue(kind)?;
        Ok((Arc::clone(&queue.backend), Arc::clone(&queue.paused)))
    }

    /// Per-queue job counts. A queue whose backend fails to report is
    /// logged and skipped rather than failing the whole snapshot.
    pub async fn queue_metrics(&self) -> HashMap<JobKind, QueueMetrics> {
        let mut out = HashMap::new();
        for (kind, queue) in &self.inner.queues {
            match queue.backend.counts().await {
                Ok(counts) => {
                    out.insert(*kind, counts);
                }
                Err(e) => {
                    warn!(kind = %kind, error = %e, "failed to read queue counts");
                }
            }
        }
        out
    }

    /// Aggregated job counts across every queue.
    pub async fn aggregate_metrics(&self) -> QueueMetrics {
        let mut total = QueueMetrics::default();
        for counts in self.queue_metrics().await.values() {
            total += *counts;
        }
        total
    }

    /// Purge dead jobs older than the cutoff across every queue. Returns
    /// the total purged.
    pub async fn purge_dead(&self, older_than: Duration) -> QueueResult<usize> {
        let mut purged = 0;
        for (kind, queue) in &self.inner.queues {
            let n = queue.backend.purge_dead(older_than).await?;
            if n > 0 {
                info!(kind = %kind, purged = n, "purged dead jobs");
            }
            purged += n;
        }
        Ok(purged)
    }

    /// The metrics handle the service records through.
    pub fn metrics(&self) -> &Metrics {
        &self.inner.metrics
    }
}

impl std::fmt::Debug for QueueService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueueService")
            .field("queues", &self.inner.queues.len())
            .finish_non_exhaustive()
    }
}
