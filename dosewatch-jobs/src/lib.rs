//! Typed job handlers and the job processor for the Dosewatch pipeline.
//!
//! Each [`JobKind`](dosewatch_queue::JobKind) has exactly one
//! [`JobHandler`]; the [`JobProcessor`] routes dequeued jobs to them,
//! records metrics, and escalates permanently failed jobs through an
//! [`AdminAlert`](domain::AdminAlert). Medication data and the notification
//! layer are reached through the seam traits in [`domain`].

pub mod domain;
pub mod error;
pub mod handler;
pub mod handlers;
pub mod processor;

#[cfg(test)]
pub(crate) mod testkit;

pub use domain::{
    AdminAlert, Interaction, InteractionChecker, Medication, MedicationDirectory,
    NotificationGateway, NotificationJanitor, NotificationSpec,
};
pub use error::{JobError, JobResult};
pub use handler::JobHandler;
pub use handlers::{
    ErrorCleanupHandler, InteractionCheckHandler, MedicationReminderHandler,
    MetricsRollupHandler, NotificationCleanupHandler, RefillCheckHandler,
};
pub use processor::{JobProcessor, JobProcessorBuilder};
