//! Durable priority job queue for the Dosewatch pipeline.
//!
//! One queue is provisioned per [`JobKind`]; within a queue, jobs dequeue
//! in priority order (high, medium, low) and FIFO within a priority. Jobs
//! carry a retry budget with backoff, a per-attempt timeout, and retention
//! flags; a worker pool polls the queues and hands jobs to a
//! [`JobDispatcher`].
//!
//! # Example
//!
//! ```no_run
//! use dosewatch_queue::prelude::*;
//! use dosewatch_metrics::Metrics;
//! use serde_json::json;
//!
//! # async fn run() -> QueueResult<()> {
//! let service = QueueService::builder(Metrics::new().unwrap())
//!     .with_memory_queues()
//!     .build();
//!
//! service
//!     .add_job_with(
//!         JobKind::MedicationReminder,
//!         json!({"user_id": "u1", "medication_id": "m1"}),
//!         JobOptions::default().with_priority(JobPriority::High),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod backend;
pub mod error;
pub mod job;
pub mod service;
pub mod worker;

pub use backend::{MemoryBackend, QueueBackend, QueueMetrics, RedisBackend, RedisQueueConfig};
pub use error::{QueueError, QueueResult};
pub use job::{Backoff, Job, JobData, JobId, JobKind, JobOptions, JobPriority, JobState};
pub use service::{QueueService, QueueServiceBuilder};
pub use worker::{JobDispatcher, WorkerHandle, WorkerPool};

/// Commonly used queue types.
pub mod prelude {
    pub use crate::backend::{MemoryBackend, QueueBackend, QueueMetrics};
    pub use crate::error::{QueueError, QueueResult};
    pub use crate::job::{Backoff, Job, JobData, JobId, JobKind, JobOptions, JobPriority, JobState};
    pub use crate::service::QueueService;
    pub use crate::worker::{JobDispatcher, WorkerPool};
}
