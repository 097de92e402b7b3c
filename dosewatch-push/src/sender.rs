//! Push sending with expired-endpoint handling.

use crate::error::{PushError, PushResult};
use crate::subscription::PushSubscription;
use crate::transport::PushTransport;
use chrono::Utc;
use dosewatch_metrics::Metrics;
use serde_json::json;
use std::sync::Arc;
use tracing::{debug, error, info};

/// Outcome of a push delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushDelivery {
    /// Accepted by the push service.
    Delivered,
    /// Endpoint no longer exists; the subscription should be pruned.
    Expired,
}

/// Sends push payloads and classifies endpoint loss as a soft failure.
pub struct PushSender {
    transport: Arc<dyn PushTransport>,
    metrics: Metrics,
}

impl PushSender {
    /// Create a sender over a transport.
    pub fn new(transport: Arc<dyn PushTransport>, metrics: Metrics) -> Self {
        Self { transport, metrics }
    }

    /// Deliver one push message.
    ///
    /// An expired or unregistered endpoint is not an error: the caller is
    /// expected to prune the subscription and move on. Anything else is
    /// counted and re-raised.
    pub async fn send_push(
        &self,
        subscription: &PushSubscription,
        title: &str,
        body: &str,
        data: serde_json::Value,
    ) -> PushResult<PushDelivery> {
        if subscription.is_expired() {
            info!(endpoint = %subscription.endpoint, "subscription expired, skipping push");
            return Ok(PushDelivery::Expired);
        }

        let payload = serde_json::to_vec(&json!({
            "title": title,
            "body": body,
            "data": data,
            "timestamp": Utc::now().to_rfc3339(),
        }))?;

        match self.transport.deliver(subscription, &payload).await {
            Ok(()) => {
                debug!(endpoint = %subscription.endpoint, "push delivered");
                Ok(PushDelivery::Delivered)
            }
            Err(PushError::Gone(reason)) => {
                info!(endpoint = %subscription.endpoint, reason = %reason, "push endpoint gone");
                Ok(PushDelivery::Expired)
            }
            Err(e) => {
                error!(endpoint = %subscription.endpoint, error = %e, "push delivery failed");
                self.metrics.incr("push.failed");
                Err(e)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::Duration;
    use std::sync::Mutex;

    struct FakeTransport {
        outcome: Mutex<Option<PushError>>,
        delivered: Mutex<Vec<Vec<u8>>>,
    }

    impl FakeTransport {
        fn succeeding() -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(None),
                delivered: Mutex::new(Vec::new()),
            })
        }

        fn failing(error: PushError) -> Arc<Self> {
            Arc::new(Self {
                outcome: Mutex::new(Some(error)),
                delivered: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl PushTransport for FakeTransport {
        async fn deliver(&self, _: &PushSubscription, payload: &[u8]) -> PushResult<()> {
            if let Some(error) = self.outcome.lock().unwrap().take() {
                return Err(error);
            }
            self.delivered.lock().unwrap().push(payload.to_vec());
            Ok(())
        }
    }

    fn subscription() -> PushSubscription {
        PushSubscription::new("https://push.example/ep", "pk", "as")
    }

    #[tokio::test]
    async fn test_successful_delivery() {
        let transport = FakeTransport::succeeding();
        let sender = PushSender::new(transport.clone(), Metrics::new().unwrap());

        let delivery = sender
            .send_push(&subscription(), "Reminder", "Time to take Metformin", json!({}))
            .await
            .unwrap();

        assert_eq!(delivery, PushDelivery::Delivered);
        let payloads = transport.delivered.lock().unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&payloads[0]).unwrap();
        assert_eq!(parsed["title"], "Reminder");
    }

    #[tokio::test]
    async fn test_gone_endpoint_is_a_soft_failure() {
        let transport = FakeTransport::failing(PushError::Gone("410".to_string()));
        let metrics = Metrics::new().unwrap();
        let sender = PushSender::new(transport, metrics.clone());

        let delivery = sender
            .send_push(&subscription(), "t", "b", json!({}))
            .await
            .unwrap();

        assert_eq!(delivery, PushDelivery::Expired);
        assert_eq!(metrics.event_count("push.failed"), 0);
    }

    #[tokio::test]
    async fn test_expired_subscription_skipped_before_transport() {
        let transport = FakeTransport::succeeding();
        let sender = PushSender::new(transport.clone(), Metrics::new().unwrap());
        let expired = subscription().with_expiry(Utc::now() - Duration::minutes(1));

        let delivery = sender.send_push(&expired, "t", "b", json!({})).await.unwrap();

        assert_eq!(delivery, PushDelivery::Expired);
        assert!(transport.delivered.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_hard_failure_counts_and_re_raises() {
        let transport = FakeTransport::failing(PushError::Network("refused".to_string()));
        let metrics = Metrics::new().unwrap();
        let sender = PushSender::new(transport, metrics.clone());

        let result = sender.send_push(&subscription(), "t", "b", json!({})).await;

        assert!(matches!(result, Err(PushError::Network(_))));
        assert_eq!(metrics.event_count("push.failed"), 1);
    }
}
