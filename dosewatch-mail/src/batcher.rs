//! Per-recipient email batching with a hard floor between sends.
//!
//! Submitted emails accumulate into per-recipient batches; a batch is
//! flushed when it reaches `max_batch` items or its oldest item has waited
//! `max_wait`. One flush per recipient per `min_interval`: the floor
//! timestamp is stamped when a flush is initiated, before the SMTP outcome
//! is known, and later submissions inside the floor are dropped (logged,
//! not an error).

use crate::email::EmailData;
use crate::error::{MailError, MailResult};
use crate::transport::Transport;
use dashmap::DashMap;
use dosewatch_metrics::Metrics;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch, Mutex};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

/// Batcher tuning knobs.
#[derive(Debug, Clone)]
pub struct BatcherConfig {
    /// Flush a batch at this many items.
    pub max_batch: usize,
    /// Flush a batch once its oldest item has waited this long.
    pub max_wait: Duration,
    /// Minimum interval between flushes to one recipient.
    pub min_interval: Duration,
    /// Pause after a failed send before processing continues.
    pub error_backoff: Duration,
    /// Staleness check period.
    pub tick: Duration,
    /// Submission queue capacity.
    pub queue_capacity: usize,
}

impl Default for BatcherConfig {
    fn default() -> Self {
        Self {
            max_batch: 5,
            max_wait: Duration::from_secs(15 * 60),
            min_interval: Duration::from_secs(5 * 60),
            error_backoff: Duration::from_secs(30),
            tick: Duration::from_secs(30),
            queue_capacity: 1024,
        }
    }
}

impl BatcherConfig {
    /// Set the batch size threshold.
    pub fn with_max_batch(mut self, max_batch: usize) -> Self {
        self.max_batch = max_batch.max(1);
        self
    }

    /// Set the staleness threshold.
    pub fn with_max_wait(mut self, max_wait: Duration) -> Self {
        self.max_wait = max_wait;
        self
    }

    /// Set the per-recipient send floor.
    pub fn with_min_interval(mut self, min_interval: Duration) -> Self {
        self.min_interval = min_interval;
        self
    }

    /// Set the post-failure backoff.
    pub fn with_error_backoff(mut self, error_backoff: Duration) -> Self {
        self.error_backoff = error_backoff;
        self
    }
}

struct Batch {
    items: Vec<EmailData>,
    oldest: Instant,
}

struct Inner {
    tx: mpsc::Sender<EmailData>,
    last_flush: Arc<DashMap<String, Instant>>,
    shutdown_tx: watch::Sender<bool>,
    task: Mutex<Option<JoinHandle<()>>>,
    metrics: Metrics,
    config: BatcherConfig,
}

/// Batched email sender. Cloneable; clones share one dispatch loop.
#[derive(Clone)]
pub struct EmailBatcher {
    inner: Arc<Inner>,
}

impl EmailBatcher {
    /// Start a batcher with one serial dispatch loop over the transport.
    pub fn start(config: BatcherConfig, transport: Arc<dyn Transport>, metrics: Metrics) -> Self {
        let (tx, rx) = mpsc::channel(config.queue_capacity);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let last_flush = Arc::new(DashMap::new());

        let task = tokio::spawn(dispatch_loop(
            rx,
            shutdown_rx,
            Arc::clone(&last_flush),
            transport,
            metrics.clone(),
            config.clone(),
        ));

        Self {
            inner: Arc::new(Inner {
                tx,
                last_flush,
                shutdown_tx,
                task: Mutex::new(Some(task)),
                metrics,
                config,
            }),
        }
    }

    /// Submit an email for batched delivery.
    ///
    /// A recipient inside their send floor is skipped: logged, counted,
    /// and dropped without error.
    pub async fn send_email(&self, email: EmailData) -> MailResult<()> {
        if let Some(last) = self.inner.last_flush.get(&email.to) {
            let elapsed = last.elapsed();
            if elapsed < self.inner.config.min_interval {
                info!(
                    to = %email.to,
                    since_last = ?elapsed,
                    "recipient inside send floor, dropping email"
                );
                self.inner.metrics.incr("email.rate_limited");
                return Ok(());
            }
        }

        self.inner
            .tx
            .send(email)
            .await
            .map_err(|_| MailError::QueueClosed)?;
        self.inner.metrics.incr("email.queued");
        Ok(())
    }

    /// Stop the dispatch loop, flushing every pending batch first.
    pub async fn shutdown(&self) {
        let _ = self.inner.shutdown_tx.send(true);
        if let Some(task) = self.inner.task.lock().await.take() {
            let _ = task.await;
        }
        info!("email batcher stopped");
    }
}

impl std::fmt::Debug for EmailBatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmailBatcher").finish_non_exhaustive()
    }
}

async fn dispatch_loop(
    mut rx: mpsc::Receiver<EmailData>,
    mut shutdown: watch::Receiver<bool>,
    last_flush: Arc<DashMap<String, Instant>>,
    transport: Arc<dyn Transport>,
    metrics: Metrics,
    config: BatcherConfig,
) {
    let mut pending: HashMap<String, Batch> = HashMap::new();
    let mut tick = tokio::time::interval(config.tick);
    tick.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            received = rx.recv() => match received {
                Some(email) => {
                    let recipient = email.to.clone();
                    let batch = pending.entry(recipient.clone()).or_insert_with(|| Batch {
                        items: Vec::new(),
                        oldest: Instant::now(),
                    });
                    if batch.items.is_empty() {
                        batch.oldest = Instant::now();
                    }
                    batch.items.push(email);

                    let ready = batch.items.len() >= config.max_batch
                        || batch.oldest.elapsed() >= config.max_wait;
                    if ready {
                        if let Some(batch) = pending.remove(&recipient) {
                            flush(&recipient, batch, &transport, &last_flush, &metrics, &config)
                                .await;
                        }
                    }
                }
                None => break,
            },
            _ = tick.tick() => {
                let stale: Vec<String> = pending
                    .iter()
                    .filter(|(_, batch)| batch.oldest.elapsed() >= config.max_wait)
                    .map(|(recipient, _)| recipient.clone())
                    .collect();
                for recipient in stale {
                    if let Some(batch) = pending.remove(&recipient) {
                        flush(&recipient, batch, &transport, &last_flush, &metrics, &config).await;
                    }
                }
            }
            _ = shutdown.changed() => {
                // Drain anything already queued, then flush everything.
                while let Ok(email) = rx.try_recv() {
                    let recipient = email.to.clone();
                    pending
                        .entry(recipient)
                        .or_insert_with(|| Batch { items: Vec::new(), oldest: Instant::now() })
                        .items
                        .push(email);
                }
                break;
            }
        }
    }

    for (recipient, batch) in pending.drain() {
        flush(&recipient, batch, &transport, &last_flush, &metrics, &config).await;
    }
    debug!("email dispatch loop stopped");
}

async fn flush(
    recipient: &str,
    mut batch: Batch,
    transport: &Arc<dyn Transport>,
    last_flush: &DashMap<String, Instant>,
    metrics: &Metrics,
    config: &BatcherConfig,
) {
    if batch.items.is_empty() {
        return;
    }
    last_flush.insert(recipient.to_string(), Instant::now());

    let count = batch.items.len();
    let email = if count == 1 {
        batch.items.remove(0)
    } else {
        digest(recipient, &batch.items)
    };

    match transport.send(&email).await {
        Ok(()) => {
            metrics.incr("email.sent");
            debug!(to = recipient, items = count, "email batch flushed");
        }
        Err(e) => {
            metrics.incr("email.failed");
            warn!(to = recipient, items = count, error = %e, "email send failed");
            tokio::time::sleep(config.error_backoff).await;
        }
    }
}

fn digest(recipient: &str, items: &[EmailData]) -> EmailData {
    let html = items
        .iter()
        .map(|item| format!("<section>{}</section>", item.html))
        .collect::<Vec<_>>()
        .join("\n<hr/>\n");

    EmailData::new(
        recipient,
        format!("You have {} new notifications", items.len()),
        html,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::Mutex as StdMutex;

    struct FakeTransport {
        sent: StdMutex<Vec<EmailData>>,
        fail_to: Option<String>,
    }

    impl FakeTransport {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                fail_to: None,
            })
        }

        fn failing_for(recipient: &str) -> Arc<Self> {
            Arc::new(Self {
                sent: StdMutex::new(Vec::new()),
                fail_to: Some(recipient.to_string()),
            })
        }

        fn sent(&self) -> Vec<EmailData> {
            self.sent.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Transport for FakeTransport {
        async fn send(&self, email: &EmailData) -> MailResult<()> {
            if self.fail_to.as_deref() == Some(email.to.as_str()) {
                return Err(MailError::Config("transport rejected".to_string()));
            }
            self.sent.lock().unwrap().push(email.clone());
            Ok(())
        }
    }

    fn batcher(transport: Arc<FakeTransport>) -> EmailBatcher {
        EmailBatcher::start(
            BatcherConfig::default(),
            transport,
            Metrics::new().unwrap(),
        )
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(5)).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_size_threshold_flushes_digest() {
        let transport = FakeTransport::new();
        let b = batcher(transport.clone());

        for i in 0..5 {
            b.send_email(EmailData::new(
                "u1@example.com",
                format!("Reminder {i}"),
                format!("<p>dose {i}</p>"),
            ))
            .await
            .unwrap();
        }
        settle().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "You have 5 new notifications");
        for i in 0..5 {
            assert!(sent[0].html.contains(&format!("dose {i}")));
        }
        // Arrival order preserved.
        let first = sent[0].html.find("dose 0").unwrap();
        let last = sent[0].html.find("dose 4").unwrap();
        assert!(first < last);
    }

    #[tokio::test(start_paused = true)]
    async fn test_single_item_flushes_unmodified_after_staleness() {
        let transport = FakeTransport::new();
        let b = batcher(transport.clone());

        b.send_email(
            EmailData::new("u1@example.com", "Refill Reminder", "<p>refill</p>")
                .with_signature("sig"),
        )
        .await
        .unwrap();
        settle().await;
        assert!(transport.sent().is_empty());

        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        settle().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "Refill Reminder");
        assert_eq!(sent[0].signature.as_deref(), Some("sig"));
    }

    #[tokio::test(start_paused = true)]
    async fn test_floor_applies_after_flush() {
        let transport = FakeTransport::new();
        let b = batcher(transport.clone());

        for _ in 0..5 {
            b.send_email(EmailData::new("u1@example.com", "s", "<p>b</p>"))
                .await
                .unwrap();
        }
        settle().await;
        assert_eq!(transport.sent().len(), 1);

        // Inside the five-minute floor: dropped.
        b.send_email(EmailData::new("u1@example.com", "late", "<p>late</p>"))
            .await
            .unwrap();
        settle().await;
        assert_eq!(transport.sent().len(), 1);

        // Another recipient is unaffected by u1's floor.
        for _ in 0..5 {
            b.send_email(EmailData::new("u2@example.com", "s", "<p>b</p>"))
                .await
                .unwrap();
        }
        settle().await;
        assert_eq!(transport.sent().len(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_staggered_arrivals_batch_then_late_item_sends_alone() {
        let transport = FakeTransport::new();
        let b = batcher(transport.clone());

        for i in 0..3 {
            b.send_email(EmailData::new(
                "x@example.com",
                format!("n{i}"),
                format!("<p>n{i}</p>"),
            ))
            .await
            .unwrap();
            tokio::time::advance(Duration::from_secs(1)).await;
        }
        settle().await;
        assert!(transport.sent().is_empty());

        // The staleness threshold fires for the first three together.
        tokio::time::advance(Duration::from_secs(15 * 60)).await;
        settle().await;
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "You have 3 new notifications");

        // Twenty minutes after submission, past the floor: accepted.
        tokio::time::advance(Duration::from_secs(5 * 60)).await;
        b.send_email(EmailData::new("x@example.com", "n3", "<p>n3</p>"))
            .await
            .unwrap();
        tokio::time::advance(Duration::from_secs(16 * 60)).await;
        settle().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[1].subject, "n3");
    }

    #[tokio::test(start_paused = true)]
    async fn test_send_failure_does_not_block_other_recipients() {
        let transport = FakeTransport::failing_for("bad@example.com");
        let metrics = Metrics::new().unwrap();
        let b = EmailBatcher::start(BatcherConfig::default(), transport.clone(), metrics.clone());

        for _ in 0..5 {
            b.send_email(EmailData::new("bad@example.com", "s", "<p>b</p>"))
                .await
                .unwrap();
        }
        for _ in 0..5 {
            b.send_email(EmailData::new("ok@example.com", "s", "<p>b</p>"))
                .await
                .unwrap();
        }
        tokio::time::sleep(Duration::from_secs(60)).await;

        assert_eq!(metrics.event_count("email.failed"), 1);
        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].to, "ok@example.com");
    }

    #[tokio::test(start_paused = true)]
    async fn test_shutdown_flushes_pending() {
        let transport = FakeTransport::new();
        let b = batcher(transport.clone());

        b.send_email(EmailData::new("u1@example.com", "a", "<p>a</p>"))
            .await
            .unwrap();
        b.send_email(EmailData::new("u1@example.com", "b", "<p>b</p>"))
            .await
            .unwrap();
        b.shutdown().await;

        let sent = transport.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].subject, "You have 2 new notifications");
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limited_submissions_are_counted() {
        let transport = FakeTransport::new();
        let metrics = Metrics::new().unwrap();
        let b = EmailBatcher::start(BatcherConfig::default(), transport.clone(), metrics.clone());

        for _ in 0..5 {
            b.send_email(EmailData::new("u1@example.com", "s", "<p>b</p>"))
                .await
                .unwrap();
        }
        settle().await;
        b.send_email(EmailData::new("u1@example.com", "late", "<p>late</p>"))
            .await
            .unwrap();

        assert_eq!(metrics.event_count("email.rate_limited"), 1);
        assert_eq!(metrics.event_count("email.queued"), 5);
    }
}
