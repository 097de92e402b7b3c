//! The job handler contract.

use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use dosewatch_queue::{Job, JobData, JobKind};

/// Processes jobs of exactly one [`JobKind`].
///
/// Handlers return their outcome explicitly; there is no completion
/// callback to invoke. The queue may redeliver a job after a crash, so
/// handlers must tolerate processing the same payload twice.
#[async_trait]
pub trait JobHandler: Send + Sync {
    /// The kind this handler processes.
    fn kind(&self) -> JobKind;

    /// Cheap payload check run before any side effect. Rejected payloads
    /// fail with [`JobError::InvalidJobData`] without being processed.
    fn validate(&self, _data: &JobData) -> bool {
        true
    }

    /// Process one attempt and return the job's result value.
    async fn process(&self, job: &Job) -> JobResult<serde_json::Value>;

    /// Called after a successful attempt.
    async fn on_completed(&self, _job: &Job, _result: &serde_json::Value) {}

    /// Called once, when the final attempt has failed.
    async fn on_failed(&self, _job: &Job, _error: &JobError) {}
}
