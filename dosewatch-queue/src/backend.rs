//! Queue backends: the storage contract plus in-memory and Redis
//! implementations.
//!
//! The in-memory backend serves tests and single-process deployments; the
//! Redis backend gives durable, shared queues with the same semantics.

use crate::error::{QueueError, QueueResult};
use crate::job::{Job, JobId, JobPriority, JobState};
use async_trait::async_trait;
use chrono::Utc;
use redis::{aio::ConnectionManager, AsyncCommands, Client};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::ops::AddAssign;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// Per-queue (and aggregated) job counts. Diagnostic, not authoritative.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueMetrics {
    /// Jobs ready to be dequeued.
    pub waiting: u64,
    /// Jobs currently held by workers.
    pub active: u64,
    /// Jobs finished successfully (including removed records).
    pub completed: u64,
    /// Jobs that exhausted their retry budget.
    pub failed: u64,
    /// Jobs waiting out an initial delay or retry backoff.
    pub delayed: u64,
}

impl AddAssign for QueueMetrics {
    fn add_assign(&mut self, rhs: Self) {
        self.waiting += rhs.waiting;
        self.active += rhs.active;
        self.completed += rhs.completed;
        self.failed += rhs.failed;
        self.delayed += rhs.delayed;
    }
}

/// Storage contract for one job-kind queue.
///
/// `pop` owns attempt accounting: it promotes due delayed jobs, returns the
/// highest-priority ready job, marks it active, and increments `attempts`,
/// so a job observed by a worker always reports its current attempt number.
#[async_trait]
pub trait QueueBackend: Send + Sync {
    /// Persist and enqueue a job.
    async fn push(&self, job: Job) -> QueueResult<()>;

    /// Dequeue the next ready job in priority order.
    async fn pop(&self) -> QueueResult<Option<Job>>;

    /// Fetch a job by id.
    async fn get(&self, id: JobId) -> QueueResult<Option<Job>>;

    /// Remove a job wherever it is. Returns whether anything was removed.
    async fn remove(&self, id: JobId) -> QueueResult<bool>;

    /// Mark a job completed, optionally dropping its record.
    async fn complete(&self, id: JobId, remove: bool) -> QueueResult<()>;

    /// Record a failed attempt: schedule a retry with backoff while budget
    /// remains, otherwise dead-letter (honoring `remove_on_fail`).
    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()>;

    /// Current job counts.
    async fn counts(&self) -> QueueResult<QueueMetrics>;

    /// Drop dead jobs that reached their terminal state before the cutoff.
    /// Returns how many were purged.
    async fn purge_dead(&self, older_than: Duration) -> QueueResult<usize>;
}

// ---------------------------------------------------------------------------
// In-memory backend
// ---------------------------------------------------------------------------

#[derive(Default)]
struct MemoryState {
    jobs: HashMap<JobId, Job>,
    ready: [VecDeque<JobId>; 3],
    delayed: Vec<JobId>,
    completed_removed: u64,
    failed_removed: u64,
}

impl MemoryState {
    fn promote_due(&mut self) {
        let now = Utc::now();
        let mut still_delayed = Vec::new();
        for id in self.delayed.drain(..) {
            let due = match self.jobs.get_mut(&id) {
                Some(job) => {
                    if job.scheduled_at.map(|at| at <= now).unwrap_or(true) {
                        job.state = JobState::Waiting;
                        true
                    } else {
                        false
                    }
                }
                // Removed while delayed; drop the reference.
                None => continue,
            };
            if due {
                let lane = self.jobs[&id].priority.lane();
                self.ready[lane].push_back(id);
            } else {
                still_delayed.push(id);
            }
        }
        self.delayed = still_delayed;
    }
}

/// In-memory queue backend behind a single mutex.
pub struct MemoryBackend {
    state: Mutex<MemoryState>,
}

impl MemoryBackend {
    /// Create an empty in-memory backend.
    pub fn new() -> Self {
        Self {
            state: Mutex::new(MemoryState::default()),
        }
    }
}

impl Default for MemoryBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl QueueBackend for MemoryBackend {
    async fn push(&self, job: Job) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let id = job.id;
        let ready = job.is_ready();
        let lane = job.priority.lane();
        state.jobs.insert(id, job);
        if ready {
            state.ready[lane].push_back(id);
        } else {
            state.delayed.push(id);
        }
        Ok(())
    }

    async fn pop(&self) -> QueueResult<Option<Job>> {
        let mut state = self.state.lock().await;
        state.promote_due();

        for priority in JobPriority::ORDERED {
            while let Some(id) = state.ready[priority.lane()].pop_front() {
                if let Some(job) = state.jobs.get_mut(&id) {
                    job.begin_attempt();
                    return Ok(Some(job.clone()));
                }
                // Stale reference to a removed job; keep draining the lane.
            }
        }
        Ok(None)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        let state = self.state.lock().await;
        Ok(state.jobs.get(&id).cloned())
    }

    async fn remove(&self, id: JobId) -> QueueResult<bool> {
        let mut state = self.state.lock().await;
        let removed = state.jobs.remove(&id).is_some();
        for lane in &mut state.ready {
            lane.retain(|queued| *queued != id);
        }
        state.delayed.retain(|queued| *queued != id);
        Ok(removed)
    }

    async fn complete(&self, id: JobId, remove: bool) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        if remove {
            if state.jobs.remove(&id).is_some() {
                state.completed_removed += 1;
            }
        } else if let Some(job) = state.jobs.get_mut(&id) {
            job.complete();
        }
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()> {
        let mut state = self.state.lock().await;
        let outcome = match state.jobs.get_mut(&id) {
            Some(job) => {
                job.fail(error);
                Some((job.state, job.remove_on_fail))
            }
            None => None,
        };
        match outcome {
            Some((JobState::Failed, _)) => state.delayed.push(id),
            Some((JobState::Dead, true)) => {
                state.jobs.remove(&id);
                state.failed_removed += 1;
            }
            _ => {}
        }
        Ok(())
    }

    async fn counts(&self) -> QueueResult<QueueMetrics> {
        let state = self.state.lock().await;
        let mut metrics = QueueMetrics {
            completed: state.completed_removed,
            failed: state.failed_removed,
            ..QueueMetrics::default()
        };
        for job in state.jobs.values() {
            match job.state {
                JobState::Waiting => metrics.waiting += 1,
                JobState::Delayed | JobState::Failed => metrics.delayed += 1,
                JobState::Active => metrics.active += 1,
                JobState::Completed => metrics.completed += 1,
                JobState::Dead => metrics.failed += 1,
            }
        }
        Ok(metrics)
    }

    async fn purge_dead(&self, older_than: Duration) -> QueueResult<usize> {
        let mut state = self.state.lock().await;
        let cutoff = Utc::now() - chrono::Duration::from_std(older_than).unwrap_or_default();
        let dead: Vec<JobId> = state
            .jobs
            .values()
            .filter(|job| {
                job.state == JobState::Dead
                    && job.finished_at.map(|at| at < cutoff).unwrap_or(false)
            })
            .map(|job| job.id)
            .collect();
        for id in &dead {
            state.jobs.remove(id);
        }
        Ok(dead.len())
    }
}

// ---------------------------------------------------------------------------
// Redis backend
// ---------------------------------------------------------------------------

/// Redis queue configuration.
#[derive(Debug, Clone)]
pub struct RedisQueueConfig {
    /// Redis connection URL.
    pub redis_url: String,
    /// Queue name (one per job kind).
    pub queue_name: String,
    /// Key prefix for all queue keys.
    pub key_prefix: String,
    /// Retention for job records.
    pub retention: Duration,
}

impl RedisQueueConfig {
    /// Create a configuration for one named queue.
    pub fn new(redis_url: impl Into<String>, queue_name: impl Into<String>) -> Self {
        let queue_name = queue_name.into();
        Self {
            redis_url: redis_url.into(),
            key_prefix: format!("dosewatch:queue:{}", queue_name),
            queue_name,
            retention: Duration::from_secs(86400),
        }
    }

    /// Set the key prefix.
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into();
        self
    }

    /// Set the job record retention.
    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}:{}", self.key_prefix, suffix)
    }

    fn lane_key(&self, priority: JobPriority) -> String {
        self.key(&format!("pending:{}", priority.lane()))
    }
}

/// Redis-backed queue. Per-priority sorted sets hold ready jobs (scored by
/// enqueue time for FIFO within a lane); `delayed`, `processing` and `dead`
/// sorted sets track the rest; job records live under `job:{id}` with a
/// retention TTL.
pub struct RedisBackend {
    connection: ConnectionManager,
    config: RedisQueueConfig,
}

impl RedisBackend {
    /// Connect a Redis backend.
    pub async fn connect(config: RedisQueueConfig) -> QueueResult<Self> {
        debug!(queue = %config.queue_name, prefix = %config.key_prefix, "connecting redis queue");
        let client =
            Client::open(config.redis_url.as_str()).map_err(|e| QueueError::Config(e.to_string()))?;
        let connection = ConnectionManager::new(client).await?;
        Ok(Self { connection, config })
    }

    async fn save_job(&self, job: &Job) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let json =
            serde_json::to_string(job).map_err(|e| QueueError::Serialization(e.to_string()))?;
        let _: () = conn
            .set_ex(
                self.config.key(&format!("job:{}", job.id)),
                json,
                self.config.retention.as_secs(),
            )
            .await?;
        Ok(())
    }

    async fn load_job(&self, id: JobId) -> QueueResult<Option<Job>> {
        let mut conn = self.connection.clone();
        let json: Option<String> = conn.get(self.config.key(&format!("job:{}", id))).await?;
        match json {
            Some(json) => {
                let job = serde_json::from_str(&json)
                    .map_err(|e| QueueError::Deserialization(e.to_string()))?;
                Ok(Some(job))
            }
            None => Ok(None),
        }
    }

    async fn delete_job(&self, id: JobId) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.del(self.config.key(&format!("job:{}", id))).await?;
        Ok(())
    }

    async fn promote_due(&self) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let delayed_key = self.config.key("delayed");
        let now = Utc::now().timestamp_millis();

        let due: Vec<String> = conn.zrangebyscore(&delayed_key, "-inf", now).await?;
        for id_str in due {
            let Ok(id) = id_str.parse::<JobId>() else {
                continue;
            };
            let Some(mut job) = self.load_job(id).await? else {
                let _: () = conn.zrem(&delayed_key, &id_str).await?;
                continue;
            };
            job.state = JobState::Waiting;
            self.save_job(&job).await?;
            let _: () = conn.zrem(&delayed_key, &id_str).await?;
            let _: () = conn
                .zadd(
                    self.config.lane_key(job.priority),
                    id_str,
                    Utc::now().timestamp_millis(),
                )
                .await?;
        }
        Ok(())
    }

    async fn bump_stat(&self, field: &str) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn.hincr(self.config.key("stats"), field, 1).await?;
        Ok(())
    }
}

#[async_trait]
impl QueueBackend for RedisBackend {
    async fn push(&self, job: Job) -> QueueResult<()> {
        let id = job.id;
        self.save_job(&job).await?;

        let mut conn = self.connection.clone();
        if job.is_ready() {
            let _: () = conn
                .zadd(
                    self.config.lane_key(job.priority),
                    id.to_string(),
                    Utc::now().timestamp_millis(),
                )
                .await?;
        } else {
            let score = job
                .scheduled_at
                .map(|at| at.timestamp_millis())
                .unwrap_or_else(|| Utc::now().timestamp_millis());
            let _: () = conn
                .zadd(self.config.key("delayed"), id.to_string(), score)
                .await?;
        }
        Ok(())
    }

    async fn pop(&self) -> QueueResult<Option<Job>> {
        self.promote_due().await?;

        let mut conn = self.connection.clone();
        for priority in JobPriority::ORDERED {
            let popped: Vec<(String, f64)> = conn.zpopmin(self.config.lane_key(priority), 1).await?;
            let Some((id_str, _)) = popped.first() else {
                continue;
            };
            let Ok(id) = id_str.parse::<JobId>() else {
                continue;
            };
            let Some(mut job) = self.load_job(id).await? else {
                continue;
            };
            job.begin_attempt();
            self.save_job(&job).await?;
            let _: () = conn
                .zadd(
                    self.config.key("processing"),
                    id.to_string(),
                    Utc::now().timestamp_millis(),
                )
                .await?;
            return Ok(Some(job));
        }
        Ok(None)
    }

    async fn get(&self, id: JobId) -> QueueResult<Option<Job>> {
        self.load_job(id).await
    }

    async fn remove(&self, id: JobId) -> QueueResult<bool> {
        let existed = self.load_job(id).await?.is_some();
        let mut conn = self.connection.clone();
        let id_str = id.to_string();
        for priority in JobPriority::ORDERED {
            let _: () = conn.zrem(self.config.lane_key(priority), &id_str).await?;
        }
        for set in ["delayed", "processing", "dead"] {
            let _: () = conn.zrem(self.config.key(set), &id_str).await?;
        }
        self.delete_job(id).await?;
        Ok(existed)
    }

    async fn complete(&self, id: JobId, remove: bool) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .zrem(self.config.key("processing"), id.to_string())
            .await?;
        self.bump_stat("completed").await?;
        if remove {
            self.delete_job(id).await?;
        } else if let Some(mut job) = self.load_job(id).await? {
            job.complete();
            self.save_job(&job).await?;
        }
        Ok(())
    }

    async fn fail(&self, id: JobId, error: &str) -> QueueResult<()> {
        let mut conn = self.connection.clone();
        let _: () = conn
            .zrem(self.config.key("processing"), id.to_string())
            .await?;

        let Some(mut job) = self.load_job(id).await? else {
            return Ok(());
        };
        job.fail(error);
        match job.state {
            JobState::Failed => {
                let score = job
                    .scheduled_at
                    .map(|at| at.timestamp_millis())
                    .unwrap_or_else(|| Utc::now().timestamp_millis());
                self.save_job(&job).await?;
                let _: () = conn
                    .zadd(self.config.key("delayed"), id.to_string(), score)
                    .await?;
            }
            JobState::Dead => {
                self.bump_stat("failed").await?;
                if job.remove_on_fail {
                    self.delete_job(id).await?;
                } else {
                    self.save_job(&job).await?;
                    let _: () = conn
                        .zadd(
                            self.config.key("dead"),
                            id.to_string(),
                            Utc::now().timestamp_millis(),
                        )
                        .await?;
                }
            }
            _ => {}
        }
        Ok(())
    }

    async fn counts(&self) -> QueueResult<QueueMetrics> {
        let mut conn = self.connection.clone();
        let mut waiting = 0u64;
        for priority in JobPriority::ORDERED {
            let count: u64 = conn.zcard(self.config.lane_key(priority)).await?;
            waiting += count;
        }
        let active: u64 = conn.zcard(self.config.key("processing")).await?;
        let delayed: u64 = conn.zcard(self.config.key("delayed")).await?;
        let completed: Option<u64> = conn.hget(self.config.key("stats"), "completed").await?;
        let failed: Option<u64> = conn.hget(self.config.key("stats"), "failed").await?;

        Ok(QueueMetrics {
            waiting,
            active,
            completed: completed.unwrap_or(0),
            failed: failed.unwrap_or(0),
            delayed,
        })
    }

    async fn purge_dead(&self, older_than: Duration) -> QueueResult<usize> {
        let mut conn = self.connection.clone();
        let dead_key = self.config.key("dead");
        let cutoff = Utc::now().timestamp_millis() - older_than.as_millis() as i64;

        let ids: Vec<String> = conn.zrangebyscore(&dead_key, "-inf", cutoff).await?;
        for id_str in &ids {
            if let Ok(id) = id_str.parse::<JobId>() {
                self.delete_job(id).await?;
            }
            let _: () = conn.zrem(&dead_key, id_str).await?;
        }
        Ok(ids.len())
    }
}
