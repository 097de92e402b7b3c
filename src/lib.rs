//! Dosewatch — background job and notification delivery pipeline for a
//! medication tracker.
//!
//! The pipeline is a set of focused crates, re-exported here:
//!
//! - [`queue`]: priority job queue with retries, delayed jobs, and worker
//!   pools over pluggable backends (in-memory, Redis).
//! - [`jobs`]: one typed handler per job kind, routed by the processor,
//!   with admin escalation when a job exhausts its retry budget.
//! - [`notify`]: notification records driven from `Scheduled` to `Sent`
//!   or `Failed` through rate limiting, permission checks, preference
//!   gates, payload crypto, and carer fan-out.
//! - [`mail`]: SMTP delivery with per-recipient batching and digests.
//! - [`push`]: VAPID web push and a live WebSocket gateway.
//! - [`metrics`]: the shared prometheus-backed metrics handle.
//!
//! [`Pipeline`] wires them together from host-provided seam
//! implementations:
//!
//! ```no_run
//! use dosewatch::{Pipeline, queue::JobKind};
//! # use std::sync::Arc;
//! # async fn demo(
//! #     store: Arc<dyn dosewatch::notify::NotificationStore>,
//! #     users: Arc<dyn dosewatch::notify::UserDirectory>,
//! #     permissions: Arc<dyn dosewatch::notify::PermissionGate>,
//! #     crypto: Arc<dyn dosewatch::notify::PayloadCrypto>,
//! #     medications: Arc<dyn dosewatch::jobs::MedicationDirectory>,
//! #     checker: Arc<dyn dosewatch::jobs::InteractionChecker>,
//! # ) -> Result<(), Box<dyn std::error::Error>> {
//! let pipeline = Pipeline::builder(store, users, permissions, crypto, medications, checker)
//!     .start()?;
//!
//! pipeline
//!     .queues()
//!     .add_job(
//!         JobKind::MedicationReminder,
//!         serde_json::json!({
//!             "user_id": "u1",
//!             "medication_id": "m1",
//!             "scheduled_time": "2026-08-25T08:00:00Z",
//!             "dosage": "500mg",
//!         }),
//!     )
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub use dosewatch_jobs as jobs;
pub use dosewatch_mail as mail;
pub use dosewatch_metrics as metrics;
pub use dosewatch_notify as notify;
pub use dosewatch_push as push;
pub use dosewatch_queue as queue;

pub mod pipeline;

pub use pipeline::{
    BatcherEmailChannel, Pipeline, PipelineBuilder, PipelineError, PipelineResult, WebPushChannel,
};
