//! Recording fakes for the domain seams, shared by the handler tests.

use crate::domain::{
    AdminAlert, Interaction, InteractionChecker, Medication, MedicationDirectory,
    NotificationGateway, NotificationJanitor, NotificationSpec,
};
use crate::error::{JobError, JobResult};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dosewatch_queue::Job;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

pub struct FakeDirectory {
    medications: HashMap<String, Medication>,
}

impl FakeDirectory {
    pub fn empty() -> Arc<Self> {
        Arc::new(Self {
            medications: HashMap::new(),
        })
    }

    pub fn with_medication(id: &str, name: &str) -> Arc<Self> {
        Self::with_medications(&[(id, name)])
    }

    pub fn with_medications(entries: &[(&str, &str)]) -> Arc<Self> {
        let medications = entries
            .iter()
            .map(|(id, name)| {
                (
                    id.to_string(),
                    Medication {
                        id: id.to_string(),
                        name: name.to_string(),
                        dosage: None,
                    },
                )
            })
            .collect();
        Arc::new(Self { medications })
    }
}

#[async_trait]
impl MedicationDirectory for FakeDirectory {
    async fn get_medication(&self, id: &str) -> JobResult<Medication> {
        self.medications
            .get(id)
            .cloned()
            .ok_or_else(|| JobError::MedicationNotFound(id.to_string()))
    }
}

pub struct FakeChecker {
    interactions: Vec<Interaction>,
}

impl FakeChecker {
    pub fn finding(interactions: Vec<Interaction>) -> Arc<Self> {
        Arc::new(Self { interactions })
    }
}

#[async_trait]
impl InteractionChecker for FakeChecker {
    async fn check_interactions(&self, _medications: &[Medication]) -> JobResult<Vec<Interaction>> {
        Ok(self.interactions.clone())
    }
}

pub struct RecordingGateway {
    sent: Mutex<Vec<NotificationSpec>>,
    fail: bool,
}

impl RecordingGateway {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: false,
        })
    }

    pub fn failing() -> Arc<Self> {
        Arc::new(Self {
            sent: Mutex::new(Vec::new()),
            fail: true,
        })
    }

    pub fn sent(&self) -> Vec<NotificationSpec> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationGateway for RecordingGateway {
    async fn create_and_send(&self, spec: NotificationSpec) -> JobResult<()> {
        if self.fail {
            return Err(JobError::Notify("gateway unavailable".to_string()));
        }
        self.sent.lock().unwrap().push(spec);
        Ok(())
    }
}

pub struct FakeJanitor {
    purged: usize,
    last_cutoff: Mutex<Option<DateTime<Utc>>>,
}

impl FakeJanitor {
    pub fn purging(purged: usize) -> Arc<Self> {
        Arc::new(Self {
            purged,
            last_cutoff: Mutex::new(None),
        })
    }

    pub fn last_cutoff(&self) -> Option<DateTime<Utc>> {
        *self.last_cutoff.lock().unwrap()
    }
}

#[async_trait]
impl NotificationJanitor for FakeJanitor {
    async fn purge_older_than(&self, cutoff: DateTime<Utc>) -> JobResult<usize> {
        *self.last_cutoff.lock().unwrap() = Some(cutoff);
        Ok(self.purged)
    }
}

pub struct RecordingAlert {
    pub escalations: Mutex<Vec<String>>,
}

impl RecordingAlert {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            escalations: Mutex::new(Vec::new()),
        })
    }
}

#[async_trait]
impl AdminAlert for RecordingAlert {
    async fn escalate(&self, job: &Job, message: &str) -> JobResult<()> {
        self.escalations
            .lock()
            .unwrap()
            .push(format!("{} {}: {}", job.kind, job.id, message));
        Ok(())
    }
}
