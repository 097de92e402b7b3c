//! Metrics handle for the Dosewatch pipeline.
//!
//! Every service in the pipeline records its counters and latencies through
//! a cloneable [`Metrics`] handle backed by an owned prometheus registry.
//! The registry is created explicitly at the composition root and passed
//! down; there is no process-global default.
//!
//! ```
//! use dosewatch_metrics::Metrics;
//! use std::time::Duration;
//!
//! let metrics = Metrics::new().unwrap();
//! metrics.incr("job.completed");
//! metrics.observe_latency("notification.send", Duration::from_millis(12));
//! assert_eq!(metrics.event_count("job.completed"), 1);
//! ```

use prometheus::{GaugeVec, HistogramOpts, HistogramVec, IntCounterVec, Opts, Registry};
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;

/// Result type for metrics operations.
pub type MetricsResult<T> = Result<T, MetricsError>;

/// Metrics-specific errors.
#[derive(Debug, Error)]
pub enum MetricsError {
    /// Registration with the prometheus registry failed.
    #[error("metric registration failed: {0}")]
    Registration(#[from] prometheus::Error),
}

/// Cloneable handle over an owned prometheus registry.
///
/// Events are counted under one counter family labeled by event name,
/// latencies under one histogram family labeled by operation, and point
/// stats under one gauge family. Keeping the families fixed means callers
/// never register metrics ad hoc.
#[derive(Clone)]
pub struct Metrics {
    inner: Arc<Inner>,
}

struct Inner {
    registry: Registry,
    events: IntCounterVec,
    latency: HistogramVec,
    stats: GaugeVec,
}

impl Metrics {
    /// Create a metrics handle with its own registry.
    pub fn new() -> MetricsResult<Self> {
        let registry = Registry::new();

        let events = IntCounterVec::new(
            Opts::new("dosewatch_events_total", "Pipeline event counters"),
            &["event"],
        )?;
        registry.register(Box::new(events.clone()))?;

        let latency = HistogramVec::new(
            HistogramOpts::new("dosewatch_latency_seconds", "Pipeline operation latency"),
            &["op"],
        )?;
        registry.register(Box::new(latency.clone()))?;

        let stats = GaugeVec::new(
            Opts::new("dosewatch_stats", "Pipeline point-in-time statistics"),
            &["stat"],
        )?;
        registry.register(Box::new(stats.clone()))?;

        debug!("metric families registered");

        Ok(Self {
            inner: Arc::new(Inner {
                registry,
                events,
                latency,
                stats,
            }),
        })
    }

    /// Increment an event counter, e.g. `job.completed`.
    pub fn incr(&self, event: &str) {
        self.inner.events.with_label_values(&[event]).inc();
    }

    /// Increment an event counter by `n`.
    pub fn incr_by(&self, event: &str, n: u64) {
        self.inner.events.with_label_values(&[event]).inc_by(n);
    }

    /// Record the latency of an operation.
    pub fn observe_latency(&self, op: &str, elapsed: std::time::Duration) {
        self.inner
            .latency
            .with_label_values(&[op])
            .observe(elapsed.as_secs_f64());
    }

    /// Set a point-in-time gauge, e.g. `queue.waiting`.
    pub fn set_gauge(&self, stat: &str, value: f64) {
        self.inner.stats.with_label_values(&[stat]).set(value);
    }

    /// Current value of an event counter. Intended for tests and rollups.
    pub fn event_count(&self, event: &str) -> u64 {
        self.inner.events.with_label_values(&[event]).get()
    }

    /// The underlying registry, for exposition/scraping.
    pub fn registry(&self) -> &Registry {
        &self.inner.registry
    }
}

impl std::fmt::Debug for Metrics {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Metrics").finish_non_exhaustive()
    }
}
