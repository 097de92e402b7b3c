//! Composition root for the Dosewatch pipeline.
//!
//! [`PipelineBuilder`] takes the host-provided seams (persistence, user
//! data, permissions, crypto, medication access, transports), wires the
//! notification service, channel adapters, job handlers, and worker pool
//! together, and returns a running [`Pipeline`]. Everything is passed
//! explicitly; there is no ambient registry.

use async_trait::async_trait;
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use dosewatch_jobs::{
    AdminAlert, ErrorCleanupHandler, InteractionCheckHandler, InteractionChecker, JobError,
    JobHandler, JobProcessor, JobResult, MedicationDirectory, MedicationReminderHandler,
    MetricsRollupHandler, NotificationCleanupHandler, NotificationGateway, NotificationJanitor,
    NotificationSpec, RefillCheckHandler,
};
use dosewatch_mail::{BatcherConfig, EmailBatcher, EmailData, MailError, Transport};
use dosewatch_metrics::{Metrics, MetricsError};
use dosewatch_notify::{
    EmailChannel, NotificationCatalog, NotificationService, NotificationStore, NotifyError,
    NotifyResult, OutboundEmail, PayloadCrypto, PermissionGate, PushChannel, PushEnvelope, User,
    UserDirectory,
};
use dosewatch_push::{
    LiveGateway, PushDelivery, PushError, PushSender, PushSubscription, PushTransport,
};
use dosewatch_queue::{
    Job, JobKind, JobOptions, QueueBackend, QueueError, QueueService, WorkerHandle, WorkerPool,
};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, info, warn};

/// Result type for pipeline assembly.
pub type PipelineResult<T> = Result<T, PipelineError>;

/// Errors raised while assembling or stopping the pipeline.
#[derive(Debug, Error)]
pub enum PipelineError {
    /// Metric registration failed
    #[error(transparent)]
    Metrics(#[from] MetricsError),

    /// Queue layer error
    #[error(transparent)]
    Queue(#[from] QueueError),

    /// Job layer error
    #[error(transparent)]
    Job(#[from] JobError),

    /// Notification layer error
    #[error(transparent)]
    Notify(#[from] NotifyError),

    /// Mail layer error
    #[error(transparent)]
    Mail(#[from] MailError),

    /// Push layer error
    #[error(transparent)]
    Push(#[from] PushError),
}

/// Email channel over the batcher: notifications become batched SMTP sends.
pub struct BatcherEmailChannel {
    batcher: EmailBatcher,
}

impl BatcherEmailChannel {
    /// Wrap a running batcher.
    pub fn new(batcher: EmailBatcher) -> Self {
        Self { batcher }
    }
}

#[async_trait]
impl EmailChannel for BatcherEmailChannel {
    async fn send(&self, email: OutboundEmail) -> NotifyResult<()> {
        let data = EmailData::new(email.to, email.subject, email.html)
            .with_signature(email.signature);
        self.batcher.send_email(data).await.map_err(|e| NotifyError::Channel {
            channel: "email",
            reason: e.to_string(),
        })
    }
}

/// Push channel over the web-push sender, with optional live WebSocket
/// fan-in for users with an open connection.
pub struct WebPushChannel {
    sender: Option<Arc<PushSender>>,
    live: Option<LiveGateway>,
}

impl WebPushChannel {
    /// Create the channel.
    pub fn new(sender: Arc<PushSender>) -> Self {
        Self {
            sender: Some(sender),
            live: None,
        }
    }

    /// A channel that only reaches live WebSocket connections.
    pub fn live_only(live: LiveGateway) -> Self {
        Self {
            sender: None,
            live: Some(live),
        }
    }

    /// Also deliver to live WebSocket connections.
    pub fn with_live(mut self, live: LiveGateway) -> Self {
        self.live = Some(live);
        self
    }
}

#[async_trait]
impl PushChannel for WebPushChannel {
    async fn deliver(&self, user: &User, envelope: PushEnvelope) -> NotifyResult<()> {
        let data = json!({
            "data": envelope.data,
            "content": BASE64.encode(&envelope.ciphertext),
            "signature": envelope.signature,
        });

        let mut first_failure: Option<PushError> = None;
        if let Some(sender) = &self.sender {
            for raw in &user.push_subscriptions {
                let subscription = match PushSubscription::from_browser(raw) {
                    Ok(subscription) => subscription,
                    Err(e) => {
                        warn!(user_id = %user.id, error = %e, "skipping malformed push subscription");
                        continue;
                    }
                };

                match sender
                    .send_push(&subscription, &envelope.title, &envelope.body, data.clone())
                    .await
                {
                    Ok(PushDelivery::Delivered) => {}
                    Ok(PushDelivery::Expired) => {
                        info!(
                            user_id = %user.id,
                            endpoint = %subscription.endpoint,
                            "push subscription expired"
                        );
                    }
                    Err(e) => {
                        if first_failure.is_none() {
                            first_failure = Some(e);
                        }
                    }
                }
            }
        }

        if let Some(live) = &self.live {
            let reached = live.send_to_user(
                &user.id,
                &json!({
                    "type": "notification",
                    "title": envelope.title,
                    "body": envelope.body,
                    "data": data,
                }),
            );
            if reached > 0 {
                debug!(user_id = %user.id, connections = reached, "delivered to live connections");
            }
        }

        match first_failure {
            Some(e) => Err(NotifyError::Channel {
                channel: "push",
                reason: e.to_string(),
            }),
            None => Ok(()),
        }
    }
}

/// [`NotificationGateway`] over the notification service, handed to job
/// handlers.
struct ServiceGateway {
    notifications: Arc<NotificationService>,
}

#[async_trait]
impl NotificationGateway for ServiceGateway {
    async fn create_and_send(&self, spec: NotificationSpec) -> JobResult<()> {
        self.notifications
            .create_and_send(&spec.user_id, &spec.kind, &spec.message, spec.metadata)
            .await
            .map(|_| ())
            .map_err(|e| JobError::Notify(e.to_string()))
    }
}

/// [`NotificationJanitor`] over the notification store.
struct StoreJanitor {
    store: Arc<dyn NotificationStore>,
}

#[async_trait]
impl NotificationJanitor for StoreJanitor {
    async fn purge_older_than(&self, cutoff: chrono::DateTime<chrono::Utc>) -> JobResult<usize> {
        self.store
            .purge_older_than(cutoff)
            .await
            .map_err(|e| JobError::Notify(e.to_string()))
    }
}

/// [`AdminAlert`] that raises an `admin_alert` notification to a fixed
/// operator user.
struct ServiceAdminAlert {
    notifications: Arc<NotificationService>,
    admin_user_id: String,
}

#[async_trait]
impl AdminAlert for ServiceAdminAlert {
    async fn escalate(&self, job: &Job, message: &str) -> JobResult<()> {
        let body = format!(
            "Job {} failed permanently after {} attempts: {}",
            job.kind.as_str(),
            job.attempts,
            message
        );
        let mut metadata = serde_json::Map::new();
        metadata.insert("job_id".to_string(), json!(job.id.to_string()));
        metadata.insert("job_kind".to_string(), json!(job.kind.as_str()));
        metadata.insert("attempts".to_string(), json!(job.attempts));

        self.notifications
            .create_and_send(&self.admin_user_id, "admin_alert", &body, metadata)
            .await
            .map(|_| ())
            .map_err(|e| JobError::Notify(e.to_string()))
    }
}

/// Builder for [`Pipeline`].
pub struct PipelineBuilder {
    store: Arc<dyn NotificationStore>,
    users: Arc<dyn UserDirectory>,
    permissions: Arc<dyn PermissionGate>,
    crypto: Arc<dyn PayloadCrypto>,
    medications: Arc<dyn MedicationDirectory>,
    checker: Arc<dyn InteractionChecker>,
    mail_transport: Option<Arc<dyn Transport>>,
    push_transport: Option<Arc<dyn PushTransport>>,
    live: Option<LiveGateway>,
    catalog: Option<NotificationCatalog>,
    batcher_config: BatcherConfig,
    job_defaults: Option<JobOptions>,
    queue_overrides: Vec<(JobKind, Arc<dyn QueueBackend>)>,
    concurrency: Option<usize>,
    poll_interval: Option<Duration>,
    admin_user_id: String,
}

impl PipelineBuilder {
    /// Start a builder over the required seams.
    pub fn new(
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionGate>,
        crypto: Arc<dyn PayloadCrypto>,
        medications: Arc<dyn MedicationDirectory>,
        checker: Arc<dyn InteractionChecker>,
    ) -> Self {
        Self {
            store,
            users,
            permissions,
            crypto,
            medications,
            checker,
            mail_transport: None,
            push_transport: None,
            live: None,
            catalog: None,
            batcher_config: BatcherConfig::default(),
            job_defaults: None,
            queue_overrides: Vec::new(),
            concurrency: None,
            poll_interval: None,
            admin_user_id: "admin".to_string(),
        }
    }

    /// Enable email delivery through the given transport.
    pub fn with_mail_transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.mail_transport = Some(transport);
        self
    }

    /// Tune the email batcher.
    pub fn with_batcher_config(mut self, config: BatcherConfig) -> Self {
        self.batcher_config = config;
        self
    }

    /// Enable web push delivery through the given transport.
    pub fn with_push_transport(mut self, transport: Arc<dyn PushTransport>) -> Self {
        self.push_transport = Some(transport);
        self
    }

    /// Fan notifications in to live WebSocket connections. The gateway is
    /// not bound here; the host runs [`LiveGateway::run`] itself.
    pub fn with_live_gateway(mut self, live: LiveGateway) -> Self {
        self.live = Some(live);
        self
    }

    /// Replace the notification kind catalog.
    pub fn with_catalog(mut self, catalog: NotificationCatalog) -> Self {
        self.catalog = Some(catalog);
        self
    }

    /// Default options for enqueued jobs.
    pub fn with_job_defaults(mut self, defaults: JobOptions) -> Self {
        self.job_defaults = Some(defaults);
        self
    }

    /// Use a specific backend (e.g. Redis) for one job kind. Kinds without
    /// an override run on in-memory queues.
    pub fn with_queue_backend(mut self, kind: JobKind, backend: Arc<dyn QueueBackend>) -> Self {
        self.queue_overrides.push((kind, backend));
        self
    }

    /// Workers per queue.
    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.concurrency = Some(concurrency);
        self
    }

    /// Worker poll interval for empty queues.
    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = Some(poll_interval);
        self
    }

    /// Recipient of `admin_alert` notifications.
    pub fn with_admin_user(mut self, user_id: impl Into<String>) -> Self {
        self.admin_user_id = user_id.into();
        self
    }

    /// Wire everything together and start the worker pool.
    pub fn start(self) -> PipelineResult<Pipeline> {
        let metrics = Metrics::new()?;

        let batcher = self
            .mail_transport
            .map(|transport| EmailBatcher::start(self.batcher_config, transport, metrics.clone()));

        let mut notify_builder = NotificationService::builder(
            self.store.clone(),
            self.users,
            self.permissions,
            self.crypto,
            metrics.clone(),
        );
        if let Some(catalog) = self.catalog {
            notify_builder = notify_builder.with_catalog(catalog);
        }
        if let Some(batcher) = &batcher {
            notify_builder =
                notify_builder.with_email_channel(Arc::new(BatcherEmailChannel::new(batcher.clone())));
        }
        let channel = match (&self.push_transport, &self.live) {
            (Some(transport), live) => {
                let sender = Arc::new(PushSender::new(transport.clone(), metrics.clone()));
                let mut channel = WebPushChannel::new(sender);
                if let Some(live) = live {
                    channel = channel.with_live(live.clone());
                }
                Some(channel)
            }
            (None, Some(live)) => Some(WebPushChannel::live_only(live.clone())),
            (None, None) => None,
        };
        if let Some(channel) = channel {
            notify_builder = notify_builder.with_push_channel(Arc::new(channel));
        }
        let notifications = Arc::new(notify_builder.build());

        let mut queue_builder = QueueService::builder(metrics.clone()).with_memory_queues();
        if let Some(defaults) = self.job_defaults {
            queue_builder = queue_builder.with_defaults(defaults);
        }
        for (kind, backend) in self.queue_overrides {
            queue_builder = queue_builder.with_queue(kind, backend);
        }
        let queues = queue_builder.build();

        let gateway: Arc<dyn NotificationGateway> = Arc::new(ServiceGateway {
            notifications: notifications.clone(),
        });
        let janitor: Arc<dyn NotificationJanitor> = Arc::new(StoreJanitor {
            store: self.store,
        });
        let alerts: Arc<dyn AdminAlert> = Arc::new(ServiceAdminAlert {
            notifications: notifications.clone(),
            admin_user_id: self.admin_user_id,
        });

        let mut processor_builder = JobProcessor::builder(metrics.clone()).with_alerts(alerts);
        for kind in JobKind::ALL {
            let handler: Arc<dyn JobHandler> = match kind {
                JobKind::MedicationReminder => Arc::new(MedicationReminderHandler::new(
                    self.medications.clone(),
                    gateway.clone(),
                )),
                JobKind::RefillCheck => Arc::new(RefillCheckHandler::new(gateway.clone())),
                JobKind::InteractionCheck => Arc::new(InteractionCheckHandler::new(
                    self.medications.clone(),
                    self.checker.clone(),
                    gateway.clone(),
                )),
                JobKind::NotificationCleanup => {
                    Arc::new(NotificationCleanupHandler::new(janitor.clone()))
                }
                JobKind::MetricsRollup => {
                    Arc::new(MetricsRollupHandler::new(queues.clone(), metrics.clone()))
                }
                JobKind::ErrorCleanup => Arc::new(ErrorCleanupHandler::new(queues.clone())),
            };
            processor_builder = processor_builder.register(handler)?;
        }
        let processor = Arc::new(processor_builder.build());

        let mut pool = WorkerPool::new(queues.clone(), processor);
        if let Some(concurrency) = self.concurrency {
            pool = pool.with_concurrency(concurrency);
        }
        if let Some(poll_interval) = self.poll_interval {
            pool = pool.with_poll_interval(poll_interval);
        }
        let workers = pool.start()?;

        info!("pipeline started");
        Ok(Pipeline {
            queues,
            notifications,
            batcher,
            live: self.live,
            workers,
            metrics,
        })
    }
}

/// A running pipeline.
pub struct Pipeline {
    queues: QueueService,
    notifications: Arc<NotificationService>,
    batcher: Option<EmailBatcher>,
    live: Option<LiveGateway>,
    workers: WorkerHandle,
    metrics: Metrics,
}

impl Pipeline {
    /// Start building a pipeline.
    pub fn builder(
        store: Arc<dyn NotificationStore>,
        users: Arc<dyn UserDirectory>,
        permissions: Arc<dyn PermissionGate>,
        crypto: Arc<dyn PayloadCrypto>,
        medications: Arc<dyn MedicationDirectory>,
        checker: Arc<dyn InteractionChecker>,
    ) -> PipelineBuilder {
        PipelineBuilder::new(store, users, permissions, crypto, medications, checker)
    }

    /// The queue service, for enqueuing and scheduling jobs.
    pub fn queues(&self) -> &QueueService {
        &self.queues
    }

    /// The notification service, for direct create/send calls.
    pub fn notifications(&self) -> &Arc<NotificationService> {
        &self.notifications
    }

    /// The live gateway, when configured.
    pub fn live(&self) -> Option<&LiveGateway> {
        self.live.as_ref()
    }

    /// The shared metrics handle.
    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    /// Stop the worker pool, then flush and stop the email batcher.
    pub async fn shutdown(self) {
        self.workers.shutdown().await;
        if let Some(batcher) = self.batcher {
            batcher.shutdown().await;
        }
        info!("pipeline stopped");
    }
}
