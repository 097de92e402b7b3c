//! Web Push delivery and a live WebSocket gateway for the Dosewatch
//! pipeline.
//!
//! [`PushSender`] delivers VAPID-signed Web Push messages through a
//! [`PushTransport`]; a lost endpoint (410 Gone) is reported as
//! [`PushDelivery::Expired`] so the caller can prune the subscription.
//! [`LiveGateway`] keeps authenticated WebSocket connections per user and
//! fans notification payloads in to them in real time.
//!
//! ```no_run
//! use dosewatch_push::{PushSender, PushSubscription, WebPushConfig, WebPushTransport};
//! use dosewatch_metrics::Metrics;
//! use std::sync::Arc;
//!
//! # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
//! let transport = WebPushTransport::new(WebPushConfig::new(
//!     "vapid-private-key",
//!     "mailto:ops@dosewatch.app",
//! ))?;
//! let sender = PushSender::new(Arc::new(transport), Metrics::new()?);
//!
//! let subscription = PushSubscription::new("https://push.example/ep", "p256dh", "auth");
//! sender
//!     .send_push(&subscription, "Medication Reminder", "Time to take Metformin", serde_json::json!({}))
//!     .await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod live;
mod sender;
mod subscription;
mod transport;

pub use error::{PushError, PushResult};
pub use live::{
    LiveConfig, LiveGateway, TokenValidator, CLOSE_IDLE, CLOSE_INTERNAL, CLOSE_MALFORMED,
    CLOSE_OVERSIZED, CLOSE_UNAUTHORIZED, SUBPROTOCOL,
};
pub use sender::{PushDelivery, PushSender};
pub use subscription::PushSubscription;
pub use transport::{PushTransport, WebPushConfig, WebPushTransport};
