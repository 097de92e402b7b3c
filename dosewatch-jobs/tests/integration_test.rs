//! End-to-end job pipeline tests: queue, worker pool, processor, handlers.

use async_trait::async_trait;
use dosewatch_jobs::{
    AdminAlert, Interaction, InteractionChecker, JobError, JobProcessor, JobResult,
    Medication, MedicationDirectory, MedicationReminderHandler, NotificationGateway,
    NotificationSpec, RefillCheckHandler,
};
use dosewatch_metrics::Metrics;
use dosewatch_queue::{
    Backoff, Job, JobKind, JobOptions, JobPriority, QueueService, WorkerPool,
};
use serde_json::json;
use std::sync::{Arc, Mutex};
use std::time::Duration;

struct Directory;

#[async_trait]
impl MedicationDirectory for Directory {
    async fn get_medication(&self, id: &str) -> JobResult<Medication> {
        match id {
            "m1" => Ok(Medication {
                id: "m1".to_string(),
                name: "Metformin".to_string(),
                dosage: Some("500mg".to_string()),
            }),
            _ => Err(JobError::MedicationNotFound(id.to_string())),
        }
    }
}

struct Checker;

#[async_trait]
impl InteractionChecker for Checker {
    async fn check_interactions(&self, _medications: &[Medication]) -> JobResult<Vec<Interaction>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct Gateway {
    sent: Mutex<Vec<NotificationSpec>>,
}

#[async_trait]
impl NotificationGateway for Gateway {
    async fn create_and_send(&self, spec: NotificationSpec) -> JobResult<()> {
        self.sent.lock().unwrap().push(spec);
        Ok(())
    }
}

#[derive(Default)]
struct Alerts {
    escalations: Mutex<Vec<String>>,
}

#[async_trait]
impl AdminAlert for Alerts {
    async fn escalate(&self, job: &Job, message: &str) -> JobResult<()> {
        self.escalations
            .lock()
            .unwrap()
            .push(format!("{}: {}", job.kind, message));
        Ok(())
    }
}

fn build_pipeline(
    gateway: Arc<Gateway>,
    alerts: Arc<Alerts>,
) -> (QueueService, Arc<JobProcessor>) {
    let metrics = Metrics::new().unwrap();
    let queues = QueueService::builder(metrics.clone())
        .with_memory_queues()
        .build();

    let processor = JobProcessor::builder(metrics)
        .register(Arc::new(MedicationReminderHandler::new(
            Arc::new(Directory),
            gateway.clone(),
        )))
        .unwrap()
        .register(Arc::new(RefillCheckHandler::new(gateway)))
        .unwrap()
        .with_alerts(alerts)
        .build();

    (queues, Arc::new(processor))
}

#[tokio::test]
async fn test_scheduled_reminder_reaches_notification_gateway() {
    let gateway = Arc::new(Gateway::default());
    let alerts = Arc::new(Alerts::default());
    let (queues, processor) = build_pipeline(gateway.clone(), alerts);

    queues
        .add_job_with(
            JobKind::MedicationReminder,
            json!({
                "user_id": "u1",
                "medication_id": "m1",
                "scheduled_time": "2026-03-01T08:00:00Z",
                "dosage": "500mg",
            }),
            JobOptions::default().with_priority(JobPriority::High),
        )
        .await
        .unwrap();

    let handle = WorkerPool::new(queues.clone(), processor)
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;

    let sent = gateway.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].kind, "medication_reminder");
    assert!(sent[0].message.contains("Metformin"));
    assert_eq!(queues.metrics().event_count("job.completed"), 1);
}

#[tokio::test]
async fn test_unknown_medication_exhausts_retries_and_escalates_once() {
    let gateway = Arc::new(Gateway::default());
    let alerts = Arc::new(Alerts::default());
    let (queues, processor) = build_pipeline(gateway.clone(), alerts.clone());

    queues
        .add_job_with(
            JobKind::MedicationReminder,
            json!({
                "user_id": "u1",
                "medication_id": "missing",
                "scheduled_time": "2026-03-01T08:00:00Z",
                "dosage": "500mg",
            }),
            JobOptions::default()
                .with_max_attempts(3)
                .with_backoff(Backoff::Fixed {
                    delay: Duration::from_millis(0),
                }),
        )
        .await
        .unwrap();

    let handle = WorkerPool::new(queues.clone(), processor)
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    handle.shutdown().await;

    assert!(gateway.sent.lock().unwrap().is_empty());
    assert_eq!(queues.metrics().event_count("job.failed"), 3);

    // All three attempts failed; the escalation fired exactly once.
    let escalations = alerts.escalations.lock().unwrap();
    assert_eq!(escalations.len(), 1);
    assert!(escalations[0].contains("medication not found"));
    assert_eq!(queues.aggregate_metrics().await.failed, 1);
}

#[tokio::test]
async fn test_refill_check_low_supply_notifies() {
    let gateway = Arc::new(Gateway::default());
    let alerts = Arc::new(Alerts::default());
    let (queues, processor) = build_pipeline(gateway.clone(), alerts);

    queues
        .add_job(
            JobKind::RefillCheck,
            json!({
                "user_id": "u1",
                "medication_id": "m1",
                "current_supply": 2,
                "threshold": 5,
            }),
        )
        .await
        .unwrap();
    queues
        .add_job(
            JobKind::RefillCheck,
            json!({
                "user_id": "u2",
                "medication_id": "m1",
                "current_supply": 40,
                "threshold": 5,
            }),
        )
        .await
        .unwrap();

    let handle = WorkerPool::new(queues.clone(), processor)
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(150)).await;
    handle.shutdown().await;

    // Both jobs complete; only the low-supply user is notified.
    assert_eq!(queues.metrics().event_count("job.completed"), 2);
    let sent = gateway.sent.lock().unwrap();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].user_id, "u1");
    assert_eq!(sent[0].kind, "refill_reminder");
}

#[tokio::test]
async fn test_invalid_payload_never_reaches_gateway() {
    let gateway = Arc::new(Gateway::default());
    let alerts = Arc::new(Alerts::default());
    let (queues, processor) = build_pipeline(gateway.clone(), alerts);

    queues
        .add_job_with(
            JobKind::MedicationReminder,
            json!({"user_id": "u1"}),
            JobOptions::default().with_max_attempts(1),
        )
        .await
        .unwrap();

    let handle = WorkerPool::new(queues.clone(), processor)
        .with_poll_interval(Duration::from_millis(10))
        .start()
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    handle.shutdown().await;

    assert!(gateway.sent.lock().unwrap().is_empty());
    assert_eq!(queues.metrics().event_count("job.failed"), 1);
}
