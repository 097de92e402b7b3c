//! Push subscriptions as registered by a browser.

use crate::error::{PushError, PushResult};
use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// A Web Push subscription.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PushSubscription {
    /// Push service endpoint URL.
    pub endpoint: String,
    /// Client public key (base64 URL-safe encoded).
    pub p256dh: String,
    /// Auth secret (base64 URL-safe encoded).
    pub auth: String,
    /// Optional expiry.
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl PushSubscription {
    /// Create a subscription without expiry.
    pub fn new(
        endpoint: impl Into<String>,
        p256dh: impl Into<String>,
        auth: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            p256dh: p256dh.into(),
            auth: auth.into(),
            expires_at: None,
        }
    }

    /// Set the expiry.
    pub fn with_expiry(mut self, expires_at: DateTime<Utc>) -> Self {
        self.expires_at = Some(expires_at);
        self
    }

    /// True once the subscription's expiry has passed.
    pub fn is_expired(&self) -> bool {
        match self.expires_at {
            Some(at) => at <= Utc::now(),
            None => false,
        }
    }

    /// Parse the JSON shape browsers produce from
    /// `PushSubscription.toJSON()`: `{ endpoint, expirationTime,
    /// keys: { p256dh, auth } }`.
    pub fn from_browser(value: &serde_json::Value) -> PushResult<Self> {
        let endpoint = value
            .get("endpoint")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PushError::Subscription("missing endpoint".to_string()))?;
        let keys = value
            .get("keys")
            .ok_or_else(|| PushError::Subscription("missing keys".to_string()))?;
        let p256dh = keys
            .get("p256dh")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PushError::Subscription("missing p256dh key".to_string()))?;
        let auth = keys
            .get("auth")
            .and_then(|v| v.as_str())
            .ok_or_else(|| PushError::Subscription("missing auth secret".to_string()))?;

        // expirationTime is milliseconds since the epoch, usually null.
        let expires_at = value
            .get("expirationTime")
            .and_then(|v| v.as_i64())
            .and_then(|ms| Utc.timestamp_millis_opt(ms).single());

        Ok(Self {
            endpoint: endpoint.to_string(),
            p256dh: p256dh.to_string(),
            auth: auth.to_string(),
            expires_at,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use serde_json::json;

    #[test]
    fn test_expiry_check() {
        let fresh = PushSubscription::new("https://push.example/ep", "key", "secret");
        assert!(!fresh.is_expired());

        let expired = PushSubscription::new("https://push.example/ep", "key", "secret")
            .with_expiry(Utc::now() - Duration::minutes(1));
        assert!(expired.is_expired());
    }

    #[test]
    fn test_from_browser_json() {
        let value = json!({
            "endpoint": "https://push.example/ep",
            "expirationTime": null,
            "keys": { "p256dh": "pk", "auth": "as" }
        });

        let sub = PushSubscription::from_browser(&value).unwrap();
        assert_eq!(sub.endpoint, "https://push.example/ep");
        assert_eq!(sub.p256dh, "pk");
        assert_eq!(sub.auth, "as");
        assert!(sub.expires_at.is_none());
    }

    #[test]
    fn test_from_browser_json_missing_keys() {
        let value = json!({ "endpoint": "https://push.example/ep" });
        assert!(matches!(
            PushSubscription::from_browser(&value),
            Err(PushError::Subscription(_))
        ));
    }
}
