//! Worker pool: polls provisioned queues and hands jobs to a dispatcher.

use crate::error::QueueResult;
use crate::job::{Job, JobKind};
use crate::service::QueueService;
use async_trait::async_trait;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

/// Routes a dequeued job to whatever processes it.
///
/// Implemented by the job processor; the queue crate only knows that
/// dispatch either succeeds or fails with a displayable error.
#[async_trait]
pub trait JobDispatcher: Send + Sync {
    /// Process one job attempt.
    async fn dispatch(&self, job: &Job) -> Result<(), Box<dyn std::error::Error + Send + Sync>>;
}

/// Pool of polling workers, `concurrency` per provisioned job kind.
pub struct WorkerPool {
    service: QueueService,
    dispatcher: Arc<dyn JobDispatcher>,
    concurrency: usize,
    poll_interval: Duration,
}

impl WorkerPool {
    /// Create a pool with one worker per kind, polling every 250ms.
    pub fn new(service: QueueService, dispatcher: Arc<dyn JobDispatcher>) -> Self {
        Self {
            service,
            dispatcher,
            concurrency: 1,
            poll_interval: Duration::from_millis(250),
        }
    }

    /// Set how many workers poll each queue.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = concurrency.max(1);
        self
    }

    /// Set the idle polling interval.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    /// Spawn the worker tasks. The returned handle stops them.
    pub fn start(self) -> QueueResult<WorkerHandle> {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let mut tasks = Vec::new();

        for kind in self.service.kinds() {
            let (backend, paused) = self.service.lease(kind)?;
            for worker in 0..self.concurrency {
                let backend = Arc::clone(&backend);
                let paused = Arc::clone(&paused);
                let dispatcher = Arc::clone(&self.dispatcher);
                let metrics = self.service.metrics().clone();
                let poll_interval = self.poll_interval;
                let mut shutdown = shutdown_rx.clone();

                tasks.push(tokio::spawn(async move {
                    debug!(kind = %kind, worker, "worker started");
                    loop {
                        if *shutdown.borrow() {
                            break;
                        }
                        if paused.load(std::sync::atomic::Ordering::SeqCst) {
                            if wait_or_shutdown(&mut shutdown, poll_interval).await {
                                break;
                            }
                            continue;
                        }

                        let job = match backend.pop().await {
                            Ok(Some(job)) => job,
                            Ok(None) => {
                                if wait_or_shutdown(&mut shutdown, poll_interval).await {
                                    break;
                                }
                                continue;
                            }
                            Err(e) => {
                                warn!(kind = %kind, error = %e, "worker failed to poll queue");
                                if wait_or_shutdown(&mut shutdown, poll_interval).await {
                                    break;
                                }
                                continue;
                            }
                        };

                        let started = std::time::Instant::now();
                        let outcome =
                            tokio::time::timeout(job.timeout, dispatcher.dispatch(&job)).await;
                        metrics.observe_latency("worker.dispatch", started.elapsed());

                        let result = match outcome {
                            Ok(Ok(())) => {
                                metrics.incr("worker.job_completed");
                                backend.complete(job.id, job.remove_on_complete).await
                            }
                            Ok(Err(e)) => {
                                metrics.incr("worker.job_failed");
                                backend.fail(job.id, &e.to_string()).await
                            }
                            Err(_) => {
                                metrics.incr("worker.job_failed");
                                warn!(job_id = %job.id, kind = %kind, timeout = ?job.timeout, "job attempt timed out");
                                backend
                                    .fail(job.id, &format!("attempt timed out after {:?}", job.timeout))
                                    .await
                            }
                        };
                        if let Err(e) = result {
                            error!(job_id = %job.id, kind = %kind, error = %e, "failed to settle job state");
                        }
                    }
                    debug!(kind = %kind, worker, "worker stopped");
                }));
            }
        }

        info!(workers = tasks.len(), "worker pool started");
        Ok(WorkerHandle { shutdown_tx, tasks })
    }
}

/// Waits one poll interval, returning early (and `true`) on shutdown.
async fn wait_or_shutdown(shutdown: &mut watch::Receiver<bool>, interval: Duration) -> bool {
    tokio::select! {
        _ = tokio::time::sleep(interval) => *shutdown.borrow(),
        _ = shutdown.changed() => true,
    }
}

/// Stops the worker pool. Workers finish the attempt in flight.
pub struct WorkerHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Signal shutdown and wait for every worker to exit.
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        for task in self.tasks {
            let _ = task.await;
        }
        info!("worker pool stopped");
    }
}
