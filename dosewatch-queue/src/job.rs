//! Job definition and state management.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Job unique identifier.
pub type JobId = Uuid;

/// Job payload data.
pub type JobData = serde_json::Value;

/// The fixed set of background job types the pipeline runs.
///
/// Every kind must have exactly one registered handler and one provisioned
/// queue; dispatching an unknown kind is a deployment bug, not a retryable
/// condition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    /// Send a scheduled medication reminder to a user.
    MedicationReminder,
    /// Check whether a medication supply is due for a refill.
    RefillCheck,
    /// Check a user's medication list for interactions.
    InteractionCheck,
    /// Purge old terminal notifications from the store.
    NotificationCleanup,
    /// Snapshot queue metrics into gauges.
    MetricsRollup,
    /// Purge dead jobs that exhausted their retry budget.
    ErrorCleanup,
}

impl JobKind {
    /// Every job kind, in queue-provisioning order.
    pub const ALL: [JobKind; 6] = [
        JobKind::MedicationReminder,
        JobKind::RefillCheck,
        JobKind::InteractionCheck,
        JobKind::NotificationCleanup,
        JobKind::MetricsRollup,
        JobKind::ErrorCleanup,
    ];

    /// Stable string name, used for queue keys and log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::MedicationReminder => "medication_reminder",
            JobKind::RefillCheck => "refill_check",
            JobKind::InteractionCheck => "interaction_check",
            JobKind::NotificationCleanup => "notification_cleanup",
            JobKind::MetricsRollup => "metrics_rollup",
            JobKind::ErrorCleanup => "error_cleanup",
        }
    }
}

impl std::fmt::Display for JobKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Job priority levels. Within one queue, `High` dequeues before `Medium`
/// before `Low`; equal priorities dequeue in arrival order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobPriority {
    /// Highest priority
    High,
    /// Default priority
    #[default]
    Medium,
    /// Lowest priority
    Low,
}

impl JobPriority {
    /// Dequeue order, highest first.
    pub const ORDERED: [JobPriority; 3] = [JobPriority::High, JobPriority::Medium, JobPriority::Low];

    /// Lane index for per-priority queues (0 = highest).
    pub fn lane(&self) -> usize {
        match self {
            JobPriority::High => 0,
            JobPriority::Medium => 1,
            JobPriority::Low => 2,
        }
    }
}

/// Retry backoff policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", tag = "type")]
pub enum Backoff {
    /// `delay * 2^(attempt - 1)`, capped at one hour.
    Exponential {
        /// Base delay before the first retry.
        delay: Duration,
    },
    /// The same delay before every retry.
    Fixed {
        /// Delay before each retry.
        delay: Duration,
    },
}

impl Backoff {
    const MAX_DELAY: Duration = Duration::from_secs(3600);

    /// Delay to apply before retrying after the given (1-based) attempt.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        match self {
            Backoff::Exponential { delay } => {
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                delay.saturating_mul(factor).min(Self::MAX_DELAY)
            }
            Backoff::Fixed { delay } => *delay,
        }
    }
}

/// Options applied when a job is enqueued. Caller-supplied overrides are
/// merged over the queue service's instance-wide defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobOptions {
    /// Queue priority.
    pub priority: JobPriority,
    /// Total tries before the job is dead-lettered.
    pub max_attempts: u32,
    /// Retry backoff policy.
    pub backoff: Backoff,
    /// Per-attempt processing timeout.
    pub timeout: Duration,
    /// Drop the job record once it completes.
    pub remove_on_complete: bool,
    /// Drop the job record once it is dead-lettered.
    pub remove_on_fail: bool,
}

impl Default for JobOptions {
    fn default() -> Self {
        Self {
            priority: JobPriority::Medium,
            max_attempts: 3,
            backoff: Backoff::Exponential {
                delay: Duration::from_millis(1000),
            },
            timeout: Duration::from_millis(5000),
            remove_on_complete: true,
            remove_on_fail: false,
        }
    }
}

impl JobOptions {
    /// Set the priority.
    pub fn with_priority(mut self, priority: JobPriority) -> Self {
        self.priority = priority;
        self
    }

    /// Set the retry budget.
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Set the backoff policy.
    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Set the per-attempt timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Keep or drop the record on completion.
    pub fn with_remove_on_complete(mut self, remove: bool) -> Self {
        self.remove_on_complete = remove;
        self
    }

    /// Keep or drop the record on terminal failure.
    pub fn with_remove_on_fail(mut self, remove: bool) -> Self {
        self.remove_on_fail = remove;
        self
    }
}

/// Job lifecycle state, maintained by the queue backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JobState {
    /// Ready to be dequeued.
    Waiting,
    /// Scheduled for later (initial delay or retry backoff).
    Delayed,
    /// Handed to a worker.
    Active,
    /// Finished successfully.
    Completed,
    /// Failed with retries remaining.
    Failed,
    /// Failed permanently; retained for inspection unless removed.
    Dead,
}

/// A unit of asynchronous work.
///
/// Immutable once enqueued except for the state bookkeeping fields, which
/// only the owning backend mutates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    /// Unique job identifier.
    pub id: JobId,
    /// Job type.
    pub kind: JobKind,
    /// Queue priority.
    pub priority: JobPriority,
    /// Type-specific payload.
    pub data: JobData,
    /// Lifecycle state.
    pub state: JobState,
    /// Attempts started so far; incremented by the backend on dequeue.
    pub attempts: u32,
    /// Total tries before dead-lettering.
    pub max_attempts: u32,
    /// Retry backoff policy.
    pub backoff: Backoff,
    /// Per-attempt processing timeout.
    pub timeout: Duration,
    /// Drop the record on completion.
    pub remove_on_complete: bool,
    /// Drop the record on terminal failure.
    pub remove_on_fail: bool,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// When the job becomes ready (delayed jobs and retries).
    pub scheduled_at: Option<DateTime<Utc>>,
    /// When the current/last attempt started.
    pub started_at: Option<DateTime<Utc>>,
    /// When the job reached a terminal state.
    pub finished_at: Option<DateTime<Utc>>,
    /// Error message from the most recent failed attempt.
    pub last_error: Option<String>,
}

impl Job {
    /// Create a new waiting job from a payload and merged options.
    pub fn new(kind: JobKind, data: JobData, options: JobOptions) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            priority: options.priority,
            data,
            state: JobState::Waiting,
            attempts: 0,
            max_attempts: options.max_attempts,
            backoff: options.backoff,
            timeout: options.timeout,
            remove_on_complete: options.remove_on_complete,
            remove_on_fail: options.remove_on_fail,
            created_at: Utc::now(),
            scheduled_at: None,
            started_at: None,
            finished_at: None,
            last_error: None,
        }
    }

    /// Schedule the job to become ready at a future time.
    pub fn schedule_at(mut self, time: DateTime<Utc>) -> Self {
        self.scheduled_at = Some(time);
        self.state = JobState::Delayed;
        self
    }

    /// Whether the job is ready to be dequeued.
    pub fn is_ready(&self) -> bool {
        match self.scheduled_at {
            Some(at) => Utc::now() >= at,
            None => true,
        }
    }

    /// Whether another attempt remains in the retry budget.
    pub fn can_retry(&self) -> bool {
        self.attempts < self.max_attempts
    }

    /// Whether the attempt currently in flight is the last one.
    pub fn is_final_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Backoff delay that applies after the current attempt fails.
    pub fn retry_delay(&self) -> Duration {
        self.backoff.delay_for(self.attempts)
    }

    /// Mark the job active and consume one attempt. Called by the backend
    /// when handing the job to a worker.
    pub fn begin_attempt(&mut self) {
        self.state = JobState::Active;
        self.attempts += 1;
        self.started_at = Some(Utc::now());
    }

    /// Mark the job completed.
    pub fn complete(&mut self) {
        self.state = JobState::Completed;
        self.finished_at = Some(Utc::now());
    }

    /// Record a failed attempt. Schedules a retry while budget remains,
    /// otherwise dead-letters the job.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.last_error = Some(error.into());
        if self.can_retry() {
            self.state = JobState::Failed;
            let delay = self.retry_delay();
            self.scheduled_at =
                Some(Utc::now() + chrono::Duration::from_std(delay).unwrap_or_default());
        } else {
            self.state = JobState::Dead;
            self.finished_at = Some(Utc::now());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn job(options: JobOptions) -> Job {
        Job::new(JobKind::MedicationReminder, serde_json::json!({}), options)
    }

    #[test]
    fn test_job_creation_defaults() {
        let j = job(JobOptions::default());

        assert_eq!(j.kind, JobKind::MedicationReminder);
        assert_eq!(j.priority, JobPriority::Medium);
        assert_eq!(j.attempts, 0);
        assert_eq!(j.max_attempts, 3);
        assert_eq!(j.state, JobState::Waiting);
        assert!(j.remove_on_complete);
        assert!(!j.remove_on_fail);
        assert_eq!(j.timeout, Duration::from_millis(5000));
    }

    #[test]
    fn test_options_builder() {
        let options = JobOptions::default()
            .with_priority(JobPriority::High)
            .with_max_attempts(5)
            .with_backoff(Backoff::Fixed {
                delay: Duration::from_secs(2),
            })
            .with_remove_on_fail(true);

        let j = job(options);
        assert_eq!(j.priority, JobPriority::High);
        assert_eq!(j.max_attempts, 5);
        assert!(j.remove_on_fail);
    }

    #[test]
    fn test_exponential_backoff_schedule() {
        let backoff = Backoff::Exponential {
            delay: Duration::from_millis(1000),
        };

        assert_eq!(backoff.delay_for(1), Duration::from_millis(1000));
        assert_eq!(backoff.delay_for(2), Duration::from_millis(2000));
        assert_eq!(backoff.delay_for(3), Duration::from_millis(4000));
    }

    #[test]
    fn test_exponential_backoff_is_capped() {
        let backoff = Backoff::Exponential {
            delay: Duration::from_secs(60),
        };

        assert_eq!(backoff.delay_for(30), Duration::from_secs(3600));
    }

    #[test]
    fn test_fixed_backoff() {
        let backoff = Backoff::Fixed {
            delay: Duration::from_secs(5),
        };

        assert_eq!(backoff.delay_for(1), Duration::from_secs(5));
        assert_eq!(backoff.delay_for(7), Duration::from_secs(5));
    }

    #[test]
    fn test_retry_budget() {
        let mut j = job(JobOptions::default());

        j.begin_attempt();
        j.fail("boom");
        assert_eq!(j.state, JobState::Failed);
        assert!(j.scheduled_at.is_some());

        j.begin_attempt();
        j.fail("boom");
        assert_eq!(j.state, JobState::Failed);

        j.begin_attempt();
        assert!(j.is_final_attempt());
        j.fail("boom");
        assert_eq!(j.state, JobState::Dead);
        assert!(j.finished_at.is_some());
    }

    #[test]
    fn test_ready_and_delayed() {
        let j = job(JobOptions::default());
        assert!(j.is_ready());

        let delayed = job(JobOptions::default())
            .schedule_at(Utc::now() + chrono::Duration::minutes(10));
        assert!(!delayed.is_ready());
        assert_eq!(delayed.state, JobState::Delayed);

        let past = job(JobOptions::default())
            .schedule_at(Utc::now() - chrono::Duration::minutes(10));
        assert!(past.is_ready());
    }

    #[test]
    fn test_begin_attempt_bookkeeping() {
        let mut j = job(JobOptions::default());

        j.begin_attempt();
        assert_eq!(j.state, JobState::Active);
        assert_eq!(j.attempts, 1);
        assert!(j.started_at.is_some());
        assert!(!j.is_final_attempt());
    }

    #[test]
    fn test_job_id_uniqueness() {
        let a = job(JobOptions::default());
        let b = job(JobOptions::default());
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn test_kind_names_are_stable() {
        assert_eq!(JobKind::MedicationReminder.as_str(), "medication_reminder");
        assert_eq!(JobKind::ErrorCleanup.as_str(), "error_cleanup");
        assert_eq!(JobKind::ALL.len(), 6);
    }

    #[test]
    fn test_kind_serde_round_trip() {
        let json = serde_json::to_string(&JobKind::RefillCheck).unwrap();
        assert_eq!(json, "\"refill_check\"");
        let kind: JobKind = serde_json::from_str(&json).unwrap();
        assert_eq!(kind, JobKind::RefillCheck);
    }

    #[test]
    fn test_job_serde_round_trip() {
        let j = job(JobOptions::default());
        let json = serde_json::to_string(&j).unwrap();
        let back: Job = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, j.id);
        assert_eq!(back.kind, j.kind);
        assert_eq!(back.max_attempts, j.max_attempts);
    }

    #[test]
    fn test_priority_lanes() {
        assert_eq!(JobPriority::High.lane(), 0);
        assert_eq!(JobPriority::Medium.lane(), 1);
        assert_eq!(JobPriority::Low.lane(), 2);
        assert_eq!(JobPriority::ORDERED[0], JobPriority::High);
    }

    #[test]
    fn test_fail_records_error_message() {
        let mut j = job(JobOptions::default());
        j.begin_attempt();
        j.fail("medication lookup failed");

        assert_eq!(j.last_error.as_deref(), Some("medication lookup failed"));
    }
}
