//! Notification orchestration: create, fan out, gate, and send.

use crate::crypto::PayloadCrypto;
use crate::error::{NotifyError, NotifyResult};
use crate::notification::{KindConfig, Notification, NotificationCatalog};
use crate::ratelimit::{CooldownLimiter, CooldownPolicy, Decision};
use crate::seams::{
    EmailChannel, NotificationStore, OutboundEmail, PermissionGate, PushChannel, PushEnvelope,
    UserDirectory,
};
use chrono::{DateTime, Utc};
use dosewatch_metrics::Metrics;
use serde_json::{json, Map, Value};
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, info, warn};

/// Why a send was intentionally not performed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SkipReason {
    /// The user's notification budget is exhausted.
    RateLimited,
    /// The permission gate denied the kind.
    PermissionDenied,
    /// The kind is muted or no enabled channel has a usable endpoint.
    PreferenceDisabled,
}

/// Outcome of a send. Skips are expected behavior, not errors.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendOutcome {
    /// Delivered on every attempted channel.
    Sent,
    /// Intentionally not delivered.
    Skipped(SkipReason),
}

enum Delivery {
    Attempted,
    NoChannel,
}

/// Builder for [`NotificationService`].
pub struct NotificationServiceBuilder {
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserDirectory>,
    permissions: Arc<dyn PermissionGate>,
    crypto: Arc<dyn PayloadCrypto>,
    metrics: Metrics,
    catalog: NotificationCatalog,
    policy: CooldownPolicy,
    email: Option<Arc<dyn EmailChannel>>,
    push: Option<Arc<dyn PushChannel>>,
}

impl NotificationServiceBuilder {
    /// Start a builder over the required seams.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionGate>,
        crypto: Arc<dyn PayloadCrypto>,
        metrics: Metrics,
    ) -> Self {
        Self {
            store,
            users,
            permissions,
            crypto,
            metrics,
            catalog: NotificationCatalog::built_in(),
            policy: CooldownPolicy::notifications(),
            email: None,
            push: None,
        }
    }

    /// Replace the kind catalog.
    pub fn with_catalog(mut self, catalog: NotificationCatalog) -> Self {
        self.catalog = catalog;
        self
    }

    /// Replace the rate-limit policy.
    pub fn with_rate_policy(mut self, policy: CooldownPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Wire the email channel.
    pub fn with_email_channel(mut self, email: Arc<dyn EmailChannel>) -> Self {
        self.email = Some(email);
        self
    }

    /// Wire the push channel.
    pub fn with_push_channel(mut self, push: Arc<dyn PushChannel>) -> Self {
        self.push = Some(push);
        self
    }

    /// Build the service.
    pub fn build(self) -> NotificationService {
        NotificationService {
            store: self.store,
            users: self.users,
            permissions: self.permissions,
            crypto: self.crypto,
            metrics: self.metrics,
            catalog: self.catalog,
            limiter: CooldownLimiter::new(self.policy),
            email: self.email,
            push: self.push,
        }
    }
}

/// Creates notification records and drives their delivery.
pub struct NotificationService {
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserDirectory>,
    permissions: Arc<dyn PermissionGate>,
    crypto: Arc<dyn PayloadCrypto>,
    metrics: Metrics,
    catalog: NotificationCatalog,
    limiter: CooldownLimiter,
    email: Option<Arc<dyn EmailChannel>>,
    push: Option<Arc<dyn PushChannel>>,
}

impl NotificationService {
    /// Start building a service.
    pub fn builder(
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionGate>,
        crypto: Arc<dyn PayloadCrypto>,
        metrics: Metrics,
    ) -> NotificationServiceBuilder {
        NotificationServiceBuilder::new(store, users, permissions, crypto, metrics)
    }

    /// Create and persist a `Scheduled` record. When the kind notifies
    /// carers, each carer gets their own copy (marked
    /// `is_carer_notification` with a `patient_id`); carer copies never
    /// fan out again. Returns the primary record.
    pub async fn create_notification(
        &self,
        user_id: &str,
        kind: &str,
        message: &str,
        metadata: Map<String, Value>,
        schedule_time: Option<DateTime<Utc>>,
    ) -> NotifyResult<Notification> {
        let mut records = self
            .create_records(user_id, kind, message, metadata, schedule_time)
            .await?;
        Ok(records.remove(0))
    }

    async fn create_records(
        &self,
        user_id: &str,
        kind: &str,
        message: &str,
        metadata: Map<String, Value>,
        schedule_time: Option<DateTime<Utc>>,
    ) -> NotifyResult<Vec<Notification>> {
        let config = self
            .catalog
            .get(kind)
            .ok_or_else(|| NotifyError::UnknownKind(kind.to_string()))?
            .clone();

        let is_carer_copy = metadata
            .get("is_carer_notification")
            .and_then(|v| v.as_bool())
            .unwrap_or(false);

        let mut primary = Notification::new(user_id, kind, config.priority, message, metadata);
        if let Some(time) = schedule_time {
            primary = primary.with_schedule(time);
        }
        self.persist_new(&primary).await?;

        let mut records = vec![primary];

        if config.notify_carers && !is_carer_copy {
            let carers = self.users.carers_for(user_id).await?;
            for carer in carers {
                let mut meta = records[0].metadata.clone();
                meta.insert("is_carer_notification".to_string(), json!(true));
                meta.insert("patient_id".to_string(), json!(user_id));

                let mut copy =
                    Notification::new(&carer.id, kind, config.priority, message, meta);
                if let Some(time) = schedule_time {
                    copy = copy.with_schedule(time);
                }
                self.persist_new(&copy).await?;
                debug!(carer = %carer.id, patient = user_id, kind, "carer copy created");
                records.push(copy);
            }
        }

        Ok(records)
    }

    async fn persist_new(&self, notification: &Notification) -> NotifyResult<()> {
        match self.store.save(notification).await {
            Ok(()) => {
                self.metrics.incr("notification.created");
                Ok(())
            }
            Err(e) => {
                self.metrics.incr("notification.create_failed");
                Err(e)
            }
        }
    }

    /// Send one notification, re-running every gate.
    ///
    /// Writes the terminal status exactly once: `Sent` when every
    /// attempted channel delivered, `Failed` on any delivery error. Skips
    /// leave the record `Scheduled` so a later retry runs the gates fresh.
    pub async fn send_notification(
        &self,
        notification: &mut Notification,
    ) -> NotifyResult<SendOutcome> {
        let config = self
            .catalog
            .get(&notification.kind)
            .ok_or_else(|| NotifyError::UnknownKind(notification.kind.clone()))?
            .clone();

        let key = format!("notification:{}", notification.user_id);
        if let Decision::Limited { retry_after } = self.limiter.acquire(&key) {
            info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                retry_after = ?retry_after,
                "notification rate limited"
            );
            self.metrics.incr("notification.rate_limited");
            return Ok(SendOutcome::Skipped(SkipReason::RateLimited));
        }

        let allowed = self
            .permissions
            .can_receive(&notification.user_id, &notification.kind)
            .await?;
        if !allowed {
            info!(
                notification_id = %notification.id,
                user_id = %notification.user_id,
                kind = %notification.kind,
                "notification denied by permission gate"
            );
            self.metrics.incr("notification.skipped");
            return Ok(SendOutcome::Skipped(SkipReason::PermissionDenied));
        }

        let started = Instant::now();
        match self.deliver(notification, &config).await {
            Ok(Delivery::Attempted) => {
                notification.mark_sent();
                self.store.save(notification).await?;
                self.metrics.incr("notification.sent");
                self.metrics
                    .observe_latency("notification.send", started.elapsed());
                debug!(notification_id = %notification.id, "notification sent");
                Ok(SendOutcome::Sent)
            }
            Ok(Delivery::NoChannel) => {
                info!(
                    notification_id = %notification.id,
                    user_id = %notification.user_id,
                    "no enabled channel for notification"
                );
                self.metrics.incr("notification.skipped");
                Ok(SendOutcome::Skipped(SkipReason::PreferenceDisabled))
            }
            Err(e) => {
                notification.mark_failed(e.to_string());
                if let Err(save_err) = self.store.save(notification).await {
                    warn!(notification_id = %notification.id, error = %save_err, "failed to persist failure state");
                }
                self.metrics.incr("notification.failed");
                Err(e)
            }
        }
    }

    /// Create a notification (with carer fan-out) and send every created
    /// record immediately. Returns the primary record's outcome.
    pub async fn create_and_send(
        &self,
        user_id: &str,
        kind: &str,
        message: &str,
        metadata: Map<String, Value>,
    ) -> NotifyResult<SendOutcome> {
        let mut records = self
            .create_records(user_id, kind, message, metadata, None)
            .await?;

        let mut primary_outcome = None;
        for (i, record) in records.iter_mut().enumerate() {
            let outcome = self.send_notification(record).await;
            match outcome {
                Ok(outcome) if i == 0 => primary_outcome = Some(Ok(outcome)),
                Err(e) if i == 0 => primary_outcome = Some(Err(e)),
                Err(e) => {
                    warn!(notification_id = %record.id, error = %e, "carer copy delivery failed");
                }
                Ok(_) => {}
            }
        }
        // records is never empty: create_records always returns the primary.
        primary_outcome.unwrap_or(Ok(SendOutcome::Sent))
    }

    async fn deliver(
        &self,
        notification: &Notification,
        config: &KindConfig,
    ) -> NotifyResult<Delivery> {
        let user = self
            .users
            .find_user(&notification.user_id)
            .await?
            .ok_or_else(|| NotifyError::UserNotFound(notification.user_id.clone()))?;
        let prefs = self.users.preferences(&notification.user_id).await?;

        if prefs.is_muted(&notification.kind) {
            return Ok(Delivery::NoChannel);
        }

        let email_target = match (&self.email, &user.email) {
            (Some(channel), Some(address)) if prefs.email => Some((channel, address.clone())),
            _ => None,
        };
        let push_target = match &self.push {
            Some(channel) if prefs.push && !user.push_subscriptions.is_empty() => Some(channel),
            _ => None,
        };
        if email_target.is_none() && push_target.is_none() {
            return Ok(Delivery::NoChannel);
        }

        let now = Utc::now();
        let content = serde_json::to_vec(&json!({
            "id": notification.id,
            "kind": notification.kind,
            "title": config.title,
            "message": notification.message,
            "timestamp": now,
        }))?;
        let ciphertext = self.crypto.encrypt(&content)?;

        let envelope = serde_json::to_vec(&json!({
            "id": notification.id,
            "user_id": notification.user_id,
            "kind": notification.kind,
            "content": notification.message,
            "timestamp": now,
        }))?;
        let signature = self.crypto.sign(&envelope)?;

        // Channels are independent: one failing never stops the other.
        let mut first_failure: Option<NotifyError> = None;

        if let Some((channel, address)) = email_target {
            let email = OutboundEmail {
                to: address,
                subject: config.title.clone(),
                html: format!("<p>{}</p>", notification.message),
                ciphertext: ciphertext.clone(),
                signature: signature.clone(),
            };
            if let Err(e) = channel.send(email).await {
                warn!(notification_id = %notification.id, error = %e, "email channel failed");
                first_failure.get_or_insert(e);
            }
        }

        if let Some(channel) = push_target {
            let envelope = PushEnvelope {
                title: config.title.clone(),
                body: notification.message.clone(),
                data: json!({
                    "notification_id": notification.id,
                    "kind": notification.kind,
                    "metadata": notification.metadata,
                }),
                ciphertext,
                signature,
            };
            if let Err(e) = channel.deliver(&user, envelope).await {
                warn!(notification_id = %notification.id, error = %e, "push channel failed");
                first_failure.get_or_insert(e);
            }
        }

        match first_failure {
            Some(e) => Err(e),
            None => Ok(Delivery::Attempted),
        }
    }
}
