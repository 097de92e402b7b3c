//! End-to-end queue tests: enqueue, worker dispatch, retries, cleanup.

use async_trait::async_trait;
use dosewatch_metrics::Metrics;
use dosewatch_queue::prelude::*;
use serde_json::json;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

struct CountingDispatcher {
    calls: AtomicU32,
    fail_first: u32,
}

impl CountingDispatcher {
    fn new(fail_first: u32) -> Arc<Self> {
        Arc::new(Self {
            calls: AtomicU32::new(0),
            fail_first,
        })
    }
}

#[async_trait]
impl JobDispatcher for CountingDispatcher {
    async fn dispatch(&self, _job: &Job) -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst);
        if call < self.fail_first {
            return Err("transient failure".into());
        }
        Ok(())
    }
}

fn memory_service() -> QueueService {
    QueueService::builder(Metrics::new().unwrap())
        .with_memory_queues()
        .build()
}

#[tokio::test]
async fn test_job_flows_through_worker_to_completion() {
    let service = memory_service();
    let dispatcher = CountingDispatcher::new(0);

    service
        .add_job(JobKind::MedicationReminder, json!({"user_id": "u1"}))
        .await
        .unwrap();

    let handle = WorkerPool::new(service.clone(), dispatcher.clone())
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;

    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 1);
    assert_eq!(service.metrics().event_count("worker.job_completed"), 1);

    // Default options drop the record on completion.
    let counts = service.aggregate_metrics().await;
    assert_eq!(counts.waiting, 0);
    assert_eq!(counts.active, 0);
    assert_eq!(counts.completed, 1);
}

#[tokio::test]
async fn test_transient_failure_recovers_within_budget() {
    let service = memory_service();
    let dispatcher = CountingDispatcher::new(2);

    service
        .add_job_with(
            JobKind::RefillCheck,
            json!({"user_id": "u1"}),
            JobOptions::default()
                .with_max_attempts(3)
                .with_backoff(Backoff::Fixed {
                    delay: Duration::from_millis(0),
                }),
        )
        .await
        .unwrap();

    let handle = WorkerPool::new(service.clone(), dispatcher.clone())
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    // Two failures, then success on the final attempt.
    assert_eq!(dispatcher.calls.load(Ordering::SeqCst), 3);
    assert_eq!(service.metrics().event_count("worker.job_failed"), 2);
    assert_eq!(service.metrics().event_count("worker.job_completed"), 1);
    assert_eq!(service.aggregate_metrics().await.failed, 0);
}

#[tokio::test]
async fn test_exhausted_budget_dead_letters_and_purges() {
    let service = memory_service();
    let dispatcher = CountingDispatcher::new(u32::MAX);

    let job = service
        .add_job_with(
            JobKind::InteractionCheck,
            json!({"user_id": "u1"}),
            JobOptions::default()
                .with_max_attempts(2)
                .with_backoff(Backoff::Fixed {
                    delay: Duration::from_millis(0),
                }),
        )
        .await
        .unwrap();

    let handle = WorkerPool::new(service.clone(), dispatcher.clone())
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();

    tokio::time::sleep(Duration::from_millis(200)).await;
    handle.shutdown().await;

    let dead = service.get_job(job.id).await.unwrap().unwrap();
    assert_eq!(dead.state, JobState::Dead);
    assert_eq!(dead.attempts, 2);

    assert_eq!(service.purge_dead(Duration::from_secs(0)).await.unwrap(), 1);
    assert!(service.get_job(job.id).await.unwrap().is_none());
}

#[tokio::test]
async fn test_queues_are_isolated_per_kind() {
    let service = memory_service();

    service
        .add_job(JobKind::MedicationReminder, json!({}))
        .await
        .unwrap();
    service
        .add_job(JobKind::NotificationCleanup, json!({}))
        .await
        .unwrap();

    let per_queue = service.queue_metrics().await;
    assert_eq!(per_queue[&JobKind::MedicationReminder].waiting, 1);
    assert_eq!(per_queue[&JobKind::NotificationCleanup].waiting, 1);
    assert_eq!(per_queue[&JobKind::ErrorCleanup].waiting, 0);
}
