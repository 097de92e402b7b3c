//! Error types for job processing.

use dosewatch_queue::JobKind;
use thiserror::Error;

/// Result type for job processing.
pub type JobResult<T> = Result<T, JobError>;

/// Job processing errors.
#[derive(Debug, Error)]
pub enum JobError {
    /// No handler registered for the job kind; a deployment bug.
    #[error("no handler registered for job kind: {0}")]
    UnknownJobKind(JobKind),

    /// Two handlers registered for the same kind.
    #[error("duplicate handler for job kind: {0}")]
    DuplicateHandler(JobKind),

    /// Payload failed the handler's validation.
    #[error("invalid job data for {kind}: {reason}")]
    InvalidJobData {
        /// Kind of the rejected job.
        kind: JobKind,
        /// What was wrong with the payload.
        reason: String,
    },

    /// Referenced medication does not exist.
    #[error("medication not found: {0}")]
    MedicationNotFound(String),

    /// Notification dispatch failed.
    #[error("notification dispatch failed: {0}")]
    Notify(String),

    /// An external collaborator failed.
    #[error("external call failed: {0}")]
    External(String),

    /// Queue error
    #[error(transparent)]
    Queue(#[from] dosewatch_queue::QueueError),
}
