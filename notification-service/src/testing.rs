//! In-memory mailer and work queue for unit tests.

use async_trait::async_trait;
use shared::queue::{QueueError, RawJob, WorkQueue};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use crate::email::{MailError, Mailer, OutgoingEmail};

#[derive(Default)]
pub struct RecordingMailer {
    sent: Mutex<Vec<OutgoingEmail>>,
    failures: AtomicU32,
}

impl RecordingMailer {
    pub fn sent(&self) -> Vec<OutgoingEmail> {
        self.sent.lock().unwrap().clone()
    }

    pub fn fail_next(&self, times: u32) {
        self.failures.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl Mailer for RecordingMailer {
    async fn send(&self, email: OutgoingEmail) -> Result<String, MailError> {
        let failing = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
            return Err(MailError::Encode(err));
        }
        let mut sent = self.sent.lock().unwrap();
        sent.push(email);
        Ok(format!("<{}@test>", sent.len()))
    }
}

struct Entry {
    job: RawJob,
    delivered: bool,
}

#[derive(Default)]
pub struct MemoryQueue {
    entries: Mutex<Vec<Entry>>,
    dead: Mutex<Vec<(RawJob, String)>>,
    next_id: AtomicU32,
}

impl MemoryQueue {
    pub fn push(&self, payload: impl Into<String>) -> String {
        let id = format!("{}-0", self.next_id.fetch_add(1, Ordering::SeqCst) + 1);
        self.entries.lock().unwrap().push(Entry {
            job: RawJob {
                id: id.clone(),
                payload: payload.into(),
                deliveries: 0,
            },
            delivered: false,
        });
        id
    }

    /// Jobs neither acknowledged nor dead-lettered.
    pub fn outstanding(&self) -> Vec<RawJob> {
        self.entries.lock().unwrap().iter().map(|e| e.job.clone()).collect()
    }

    pub fn dead_letters(&self) -> Vec<(RawJob, String)> {
        self.dead.lock().unwrap().clone()
    }
}

#[async_trait]
impl WorkQueue for MemoryQueue {
    async fn ensure_group(&self) -> Result<(), QueueError> {
        Ok(())
    }

    async fn read_pending(&self, count: usize) -> Result<Vec<RawJob>, QueueError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries
            .iter_mut()
            .filter(|e| e.delivered)
            .take(count)
            .map(|e| {
                e.job.deliveries += 1;
                e.job.clone()
            })
            .collect())
    }

    async fn read_new(&self, count: usize) -> Result<Vec<RawJob>, QueueError> {
        let mut entries = self.entries.lock().unwrap();
        Ok(entries
            .iter_mut()
            .filter(|e| !e.delivered)
            .take(count)
            .map(|e| {
                e.delivered = true;
                e.job.deliveries = 1;
                e.job.clone()
            })
            .collect())
    }

    async fn ack(&self, id: &str) -> Result<(), QueueError> {
        self.entries.lock().unwrap().retain(|e| e.job.id != id);
        Ok(())
    }

    async fn dead_letter(&self, job: &RawJob, reason: &str) -> Result<(), QueueError> {
        self.dead.lock().unwrap().push((job.clone(), reason.to_string()));
        self.ack(&job.id).await
    }
}
