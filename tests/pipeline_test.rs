//! Full pipeline wiring: jobs enqueued at one end, emails out the other.

use async_trait::async_trait;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use dosewatch::jobs::{
    Interaction, InteractionChecker, JobError, JobResult, Medication, MedicationDirectory,
};
use dosewatch::mail::{EmailData, MailResult, Transport};
use dosewatch::notify::{
    Carer, ChannelPreferences, HmacSha256Signer, Notification, NotificationPriority,
    NotificationStatus, NotificationStore, NotifyResult, PayloadCrypto, PermissionGate, User,
    UserDirectory,
};
use dosewatch::queue::JobKind;
use dosewatch::Pipeline;
use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

#[derive(Default)]
struct MemoryStore {
    records: Mutex<HashMap<String, Notification>>,
}

impl MemoryStore {
    fn with_status(&self, status: NotificationStatus) -> Vec<Notification> {
        self.records
            .lock()
            .unwrap()
            .values()
            .filter(|n| n.status == status)
            .cloned()
            .collect()
    }

    fn insert(&self, notification: Notification) {
        self.records
            .lock()
            .unwrap()
            .insert(notification.id.to_string(), notification);
    }

    fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl NotificationStore for MemoryStore {
    async fn save(&self, notification: &Notification) -> NotifyResult<()> {
        self.insert(notification.clone());
        Ok(())
    }

    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> NotifyResult<usize> {
        let mut records = self.records.lock().unwrap();
        let before = records.len();
        records.retain(|_, n| !(n.status.is_terminal() && n.created_at < cutoff));
        Ok(before - records.len())
    }
}

struct FakeUsers {
    users: HashMap<String, User>,
}

impl FakeUsers {
    fn new() -> Self {
        let mut users = HashMap::new();
        users.insert(
            "u1".to_string(),
            User {
                id: "u1".to_string(),
                email: Some("u1@example.com".to_string()),
                push_subscriptions: Vec::new(),
            },
        );
        users.insert(
            "admin".to_string(),
            User {
                id: "admin".to_string(),
                email: Some("ops@example.com".to_string()),
                push_subscriptions: Vec::new(),
            },
        );
        Self { users }
    }
}

#[async_trait]
impl UserDirectory for FakeUsers {
    async fn find_user(&self, id: &str) -> NotifyResult<Option<User>> {
        Ok(self.users.get(id).cloned())
    }

    async fn preferences(&self, _: &str) -> NotifyResult<ChannelPreferences> {
        Ok(ChannelPreferences::all_enabled())
    }

    async fn carers_for(&self, _: &str) -> NotifyResult<Vec<Carer>> {
        Ok(Vec::new())
    }
}

struct AllowAll;

#[async_trait]
impl PermissionGate for AllowAll {
    async fn can_receive(&self, _: &str, _: &str) -> NotifyResult<bool> {
        Ok(true)
    }
}

struct TestCrypto {
    signer: HmacSha256Signer,
}

impl TestCrypto {
    fn new() -> Self {
        Self {
            signer: HmacSha256Signer::new(b"pipeline-test-secret".to_vec()),
        }
    }
}

impl PayloadCrypto for TestCrypto {
    fn encrypt(&self, plaintext: &[u8]) -> NotifyResult<Vec<u8>> {
        let mut out = b"enc:".to_vec();
        out.extend_from_slice(plaintext);
        Ok(out)
    }

    fn sign(&self, payload: &[u8]) -> NotifyResult<String> {
        self.signer.sign(payload)
    }
}

struct FakeMedications;

#[async_trait]
impl MedicationDirectory for FakeMedications {
    async fn get_medication(&self, id: &str) -> JobResult<Medication> {
        match id {
            "m1" => Ok(Medication {
                id: "m1".to_string(),
                name: "Metformin".to_string(),
                dosage: Some("500mg".to_string()),
            }),
            other => Err(JobError::MedicationNotFound(other.to_string())),
        }
    }
}

struct NoInteractions;

#[async_trait]
impl InteractionChecker for NoInteractions {
    async fn check_interactions(&self, _: &[Medication]) -> JobResult<Vec<Interaction>> {
        Ok(Vec::new())
    }
}

#[derive(Default)]
struct RecordingTransport {
    sent: Mutex<Vec<EmailData>>,
}

impl RecordingTransport {
    fn sent(&self) -> Vec<EmailData> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn send(&self, email: &EmailData) -> MailResult<()> {
        self.sent.lock().unwrap().push(email.clone());
        Ok(())
    }
}

fn build_pipeline() -> (Pipeline, Arc<MemoryStore>, Arc<RecordingTransport>) {
    let store = Arc::new(MemoryStore::default());
    let transport = Arc::new(RecordingTransport::default());

    let pipeline = Pipeline::builder(
        store.clone(),
        Arc::new(FakeUsers::new()),
        Arc::new(AllowAll),
        Arc::new(TestCrypto::new()),
        Arc::new(FakeMedications),
        Arc::new(NoInteractions),
    )
    .with_mail_transport(transport.clone())
    .with_poll_interval(Duration::from_millis(20))
    .start()
    .unwrap();

    (pipeline, store, transport)
}

#[tokio::test(start_paused = true)]
async fn test_reminder_job_flows_through_to_email() {
    let (pipeline, store, transport) = build_pipeline();

    pipeline
        .queues()
        .add_job(
            JobKind::MedicationReminder,
            json!({
                "user_id": "u1",
                "medication_id": "m1",
                "scheduled_time": "2026-08-25T08:00:00Z",
                "dosage": "500mg",
            }),
        )
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    pipeline.shutdown().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "u1@example.com");
    assert!(sent[0].html.contains("Metformin"));

    let delivered = store.with_status(NotificationStatus::Sent);
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].kind, "medication_reminder");
}

#[tokio::test(start_paused = true)]
async fn test_exhausted_job_escalates_to_admin() {
    let (pipeline, store, transport) = build_pipeline();

    pipeline
        .queues()
        .add_job(
            JobKind::MedicationReminder,
            json!({
                "user_id": "u1",
                "medication_id": "missing",
                "scheduled_time": "2026-08-25T08:00:00Z",
                "dosage": "500mg",
            }),
        )
        .await
        .unwrap();

    // Ride out the retry schedule.
    tokio::time::sleep(Duration::from_secs(30)).await;
    pipeline.shutdown().await;

    let sent = transport.sent();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].to, "ops@example.com");
    assert!(sent[0].html.contains("failed permanently"));

    let alerts = store.with_status(NotificationStatus::Sent);
    assert_eq!(alerts.len(), 1);
    assert_eq!(alerts[0].kind, "admin_alert");
    assert_eq!(alerts[0].user_id, "admin");
}

#[tokio::test(start_paused = true)]
async fn test_cleanup_job_purges_old_notifications() {
    let (pipeline, store, _) = build_pipeline();

    let mut old = Notification::new(
        "u1",
        "medication_reminder",
        NotificationPriority::Medium,
        "old reminder",
        serde_json::Map::new(),
    );
    old.created_at = Utc::now() - ChronoDuration::days(120);
    old.mark_sent();
    store.insert(old);
    assert_eq!(store.len(), 1);

    pipeline
        .queues()
        .add_job(JobKind::NotificationCleanup, json!({ "retention_days": 90 }))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_secs(2)).await;
    pipeline.shutdown().await;

    assert_eq!(store.len(), 0);
}
