//! Push transports.

use crate::error::{PushError, PushResult};
use crate::subscription::PushSubscription;
use async_trait::async_trait;
use tracing::debug;
use web_push::{
    ContentEncoding, SubscriptionInfo, VapidSignatureBuilder, WebPushClient, WebPushMessageBuilder,
};

/// Raw push delivery seam.
#[async_trait]
pub trait PushTransport: Send + Sync {
    /// Deliver one payload to one subscription.
    async fn deliver(&self, subscription: &PushSubscription, payload: &[u8]) -> PushResult<()>;
}

/// Web Push (VAPID) configuration.
#[derive(Debug, Clone)]
pub struct WebPushConfig {
    /// VAPID private key (base64 URL-safe encoded).
    pub private_key: String,
    /// Subject (mailto: or https: URL).
    pub subject: String,
    /// Payload TTL in seconds.
    pub ttl: u32,
}

impl WebPushConfig {
    /// Create a configuration with a 24 hour TTL.
    pub fn new(private_key: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            private_key: private_key.into(),
            subject: subject.into(),
            ttl: 86400,
        }
    }

    /// Set the payload TTL.
    pub fn ttl(mut self, ttl: u32) -> Self {
        self.ttl = ttl;
        self
    }
}

/// Web Push transport with VAPID signing and Aes128Gcm content encoding.
pub struct WebPushTransport {
    config: WebPushConfig,
    client: web_push::IsahcWebPushClient,
}

impl WebPushTransport {
    /// Create a Web Push transport.
    pub fn new(config: WebPushConfig) -> PushResult<Self> {
        let client =
            web_push::IsahcWebPushClient::new().map_err(|e| PushError::Config(e.to_string()))?;
        Ok(Self { config, client })
    }
}

#[async_trait]
impl PushTransport for WebPushTransport {
    async fn deliver(&self, subscription: &PushSubscription, payload: &[u8]) -> PushResult<()> {
        let subscription_info = SubscriptionInfo::new(
            &subscription.endpoint,
            &subscription.p256dh,
            &subscription.auth,
        );

        let mut sig_builder = VapidSignatureBuilder::from_base64(
            &self.config.private_key,
            web_push::URL_SAFE_NO_PAD,
            &subscription_info,
        )
        .map_err(|e: web_push::WebPushError| PushError::Config(e.to_string()))?;
        sig_builder.add_claim(
            "sub",
            serde_json::Value::String(self.config.subject.clone()),
        );
        let signature = sig_builder
            .build()
            .map_err(|e: web_push::WebPushError| PushError::Config(e.to_string()))?;

        let mut builder = WebPushMessageBuilder::new(&subscription_info);
        builder.set_vapid_signature(signature);
        builder.set_payload(ContentEncoding::Aes128Gcm, payload);
        builder.set_ttl(self.config.ttl);
        let message = builder.build()?;

        debug!(endpoint = %subscription.endpoint, "sending web push message");
        WebPushClient::send(&self.client, message).await?;
        Ok(())
    }
}
