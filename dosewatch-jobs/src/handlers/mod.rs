//! The built-in handlers, one per job kind.

mod cleanup;
mod errors;
mod interaction;
mod refill;
mod reminder;
mod rollup;

pub use cleanup::NotificationCleanupHandler;
pub use errors::ErrorCleanupHandler;
pub use interaction::InteractionCheckHandler;
pub use refill::RefillCheckHandler;
pub use reminder::MedicationReminderHandler;
pub use rollup::MetricsRollupHandler;

use dosewatch_queue::JobData;

pub(crate) fn str_field<'a>(data: &'a JobData, key: &str) -> Option<&'a str> {
    data.get(key).and_then(|v| v.as_str())
}

pub(crate) fn u64_field(data: &JobData, key: &str) -> Option<u64> {
    data.get(key).and_then(|v| v.as_u64())
}
