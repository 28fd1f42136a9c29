//! Consumer of the `payment_notifications` work queue.
//!
//! A job is acknowledged only once the customer was notified. Failed jobs stay
//! pending and are picked up again on the next poll until they reach
//! `max_deliveries`, then they are moved to the dead-letter stream.

use shared::kafka::decode;
use shared::queue::{QueueError, RawJob, WorkQueue};
use shared::{Backoff, PaymentConfirmed};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

use crate::email::{EmailTemplates, MailError, Mailer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Acked,
    Retrying,
    DeadLettered,
}

#[derive(Debug, Default, PartialEq, Eq)]
pub struct PollReport {
    pub acked: usize,
    pub retrying: usize,
    pub dead_lettered: usize,
}

pub struct ConfirmationWorker {
    queue: Arc<dyn WorkQueue>,
    mailer: Arc<dyn Mailer>,
    templates: Arc<EmailTemplates>,
    max_deliveries: u64,
    batch_size: usize,
    retry: Backoff,
    reconnect: Backoff,
}

impl ConfirmationWorker {
    pub fn new(
        queue: Arc<dyn WorkQueue>,
        mailer: Arc<dyn Mailer>,
        templates: Arc<EmailTemplates>,
        max_deliveries: u64,
    ) -> Self {
        Self {
            queue,
            mailer,
            templates,
            max_deliveries: max_deliveries.max(1),
            batch_size: 10,
            retry: Backoff::default(),
            reconnect: Backoff::reconnect(),
        }
    }

    pub async fn run(self) {
        if let Err(e) = self
            .reconnect
            .retry("create consumer group", || self.queue.ensure_group())
            .await
        {
            error!(error = %e, "notification worker could not create its consumer group");
            return;
        }
        info!(max_deliveries = self.max_deliveries, "notification worker started");

        let mut failures = 0u32;
        loop {
            match self.poll().await {
                Ok(report) => {
                    failures = 0;
                    if report != PollReport::default() {
                        debug!(
                            acked = report.acked,
                            retrying = report.retrying,
                            dead_lettered = report.dead_lettered,
                            "notification jobs handled"
                        );
                    }
                    if report.retrying > 0 {
                        tokio::time::sleep(self.retry.delay(1)).await;
                    }
                }
                Err(e) => {
                    failures = failures.saturating_add(1);
                    let delay = self.reconnect.delay(failures);
                    error!(error = %e, "notification queue unavailable, backing off {:?}", delay);
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }

    /// Handles jobs left pending by earlier polls first, then waits for new ones.
    pub async fn poll(&self) -> Result<PollReport, QueueError> {
        let mut jobs = self.queue.read_pending(self.batch_size).await?;
        if jobs.is_empty() {
            jobs = self.queue.read_new(self.batch_size).await?;
        }

        let mut report = PollReport::default();
        for job in &jobs {
            match self.handle(job).await? {
                Outcome::Acked => report.acked += 1,
                Outcome::Retrying => report.retrying += 1,
                Outcome::DeadLettered => report.dead_lettered += 1,
            }
        }
        Ok(report)
    }

    async fn handle(&self, job: &RawJob) -> Result<Outcome, QueueError> {
        let event = match decode::<PaymentConfirmed>(Some(job.payload.as_bytes())) {
            Ok(event) => event,
            Err(e) => {
                warn!(id = %job.id, error = %e, "undecodable notification job");
                self.queue.dead_letter(job, &e.to_string()).await?;
                return Ok(Outcome::DeadLettered);
            }
        };

        match self.notify(&event).await {
            Ok(()) => {
                self.queue.ack(&job.id).await?;
                Ok(Outcome::Acked)
            }
            Err(e) if job.deliveries >= self.max_deliveries => {
                let reason = format!("gave up after {} deliveries: {e}", job.deliveries);
                error!(id = %job.id, order_id = %event.order_id, error = %e, "notification failed for good");
                self.queue.dead_letter(job, &reason).await?;
                Ok(Outcome::DeadLettered)
            }
            Err(e) => {
                warn!(
                    id = %job.id,
                    order_id = %event.order_id,
                    deliveries = job.deliveries,
                    error = %e,
                    "notification failed, leaving it pending"
                );
                Ok(Outcome::Retrying)
            }
        }
    }

    async fn notify(&self, event: &PaymentConfirmed) -> Result<(), MailError> {
        let name = event
            .user_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty())
            .unwrap_or("Customer");
        info!(
            event_id = %event.event_id,
            order_id = %event.order_id,
            "{name}, your order {} was PAID and will be dispatched soon",
            event.order_id
        );

        let Some(to) = event.email.as_deref().map(str::trim).filter(|to| !to.is_empty()) else {
            return Ok(());
        };
        let order_id = event.order_id.to_string();
        let message = self.templates.confirmation(to, &order_id, event.amount, &[])?;
        let message_id = self.mailer.send(message).await?;
        info!(order_id = %event.order_id, %message_id, "confirmation email sent");
        Ok(())
    }
}
