//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use shared::clients::{CancellationEmail, ConfirmationEmail, EmailNotifier, LowStockEmail, User, UserDirectory};
use shared::kafka::PublishError;
use shared::queue::QueueError;
use shared::{ClientError, OrderStatus, OrderView, PaymentConfirmed, PaymentResult};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::confirm::PaymentConfirmation;
use crate::events::{NotificationQueue, ResultPublisher};
use crate::gateway::{Authorization, Decision, PaymentGateway, SimulatedGateway};
use crate::models::{mask_card, NewPayment, PaymentRecord, PaymentStatus, Settlement};
use crate::notify::CustomerNotifier;
use crate::orders::OrderDirectory;
use crate::store::{confirmation_prefix, PaymentStore, StoreError};
use crate::worker::PaymentWorker;

#[derive(Default)]
pub struct MemoryPayments {
    records: Mutex<Vec<PaymentRecord>>,
}

impl MemoryPayments {
    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }

    fn record(payment: &NewPayment) -> PaymentRecord {
        let now = Utc::now();
        PaymentRecord {
            id: Uuid::new_v4(),
            order_id: payment.order_id,
            user_id: payment.user_id,
            method: payment.method.clone(),
            amount: payment.amount,
            status: payment.status,
            success: payment.status == PaymentStatus::Approved,
            card_number: payment.card_number.as_deref().map(mask_card),
            external_id: payment.external_id.clone(),
            metadata: payment.metadata.clone(),
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }
}

#[async_trait]
impl PaymentStore for MemoryPayments {
    async fn register(&self, payment: &NewPayment) -> Result<PaymentRecord, StoreError> {
        let mut records = self.records.lock().unwrap();
        if let Some(existing) = records.iter().find(|r| r.external_id == payment.external_id) {
            return Ok(existing.clone());
        }
        let record = Self::record(payment);
        records.push(record.clone());
        Ok(record)
    }

    async fn find_by_external_id(&self, external_id: &str) -> Result<Option<PaymentRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().find(|r| r.external_id == external_id).cloned())
    }

    async fn settle(&self, id: Uuid, settlement: &Settlement) -> Result<Option<PaymentRecord>, StoreError> {
        let mut records = self.records.lock().unwrap();
        Ok(records
            .iter_mut()
            .find(|r| r.id == id && r.status == PaymentStatus::Pending)
            .map(|r| {
                r.status = settlement.status;
                r.success = settlement.status == PaymentStatus::Approved;
                r.failure_reason = settlement.failure_reason.clone();
                r.updated_at = Utc::now();
                r.clone()
            }))
    }

    async fn record_confirmed(
        &self,
        order_id: Uuid,
        confirmed: &[NewPayment],
    ) -> Result<Vec<PaymentRecord>, StoreError> {
        let mut records = self.records.lock().unwrap();
        let prefix = confirmation_prefix(order_id);
        records.retain(|r| {
            r.order_id != order_id
                || !r.external_id.starts_with(&prefix)
                || confirmed.iter().any(|p| p.external_id == r.external_id)
        });
        let mut stored = Vec::with_capacity(confirmed.len());
        for payment in confirmed {
            let fresh = Self::record(payment);
            match records.iter_mut().find(|r| r.external_id == payment.external_id) {
                Some(existing) => {
                    existing.method = fresh.method;
                    existing.amount = fresh.amount;
                    existing.status = fresh.status;
                    existing.success = fresh.success;
                    existing.failure_reason = None;
                    stored.push(existing.clone());
                }
                None => {
                    records.push(fresh.clone());
                    stored.push(fresh);
                }
            }
        }
        Ok(stored)
    }

    async fn for_order(&self, order_id: Uuid) -> Result<Vec<PaymentRecord>, StoreError> {
        let records = self.records.lock().unwrap();
        Ok(records.iter().rev().filter(|r| r.order_id == order_id).cloned().collect())
    }
}

#[derive(Default)]
pub struct CountingGateway {
    inner: SimulatedGateway,
    calls: AtomicU32,
}

impl CountingGateway {
    pub fn calls(&self) -> u32 {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl PaymentGateway for CountingGateway {
    async fn authorize(&self, request: &Authorization<'_>) -> Decision {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.inner.authorize(request).await
    }
}

#[derive(Default)]
pub struct RecordingResults {
    published: Mutex<Vec<PaymentResult>>,
    fail_next: AtomicBool,
}

impl RecordingResults {
    pub fn published(&self) -> Vec<PaymentResult> {
        self.published.lock().unwrap().clone()
    }

    pub fn fail_next(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }
}

#[async_trait]
impl ResultPublisher for RecordingResults {
    async fn publish_result(&self, result: &PaymentResult) -> Result<(), PublishError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
            return Err(PublishError::Encode(err));
        }
        self.published.lock().unwrap().push(result.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct MemoryQueue {
    queued: Mutex<Vec<PaymentConfirmed>>,
}

impl MemoryQueue {
    pub fn queued(&self) -> Vec<PaymentConfirmed> {
        self.queued.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotificationQueue for MemoryQueue {
    async fn enqueue(&self, event: &PaymentConfirmed) -> Result<(), QueueError> {
        self.queued.lock().unwrap().push(event.clone());
        Ok(())
    }
}

pub struct MemoryUsers;

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn find_user(&self, id: i64) -> Result<Option<User>, ClientError> {
        Ok((id == 1).then(|| User {
            id,
            name: Some("Ana".into()),
            email: Some("ana@example.com".into()),
        }))
    }
}

#[derive(Default)]
pub struct MemoryOrders {
    orders: Mutex<HashMap<Uuid, OrderView>>,
    updates: Mutex<Vec<(Uuid, OrderStatus)>>,
}

impl MemoryOrders {
    pub fn add(&self, total: f64, status: OrderStatus) -> Uuid {
        let now = Utc::now();
        let order = OrderView {
            id: Uuid::new_v4(),
            user_id: 1,
            total,
            items: vec![],
            status,
            created_at: now,
            updated_at: now,
        };
        let id = order.id;
        self.orders.lock().unwrap().insert(id, order);
        id
    }

    pub fn set_status(&self, id: Uuid, status: OrderStatus) {
        if let Some(order) = self.orders.lock().unwrap().get_mut(&id) {
            order.status = status;
        }
    }

    pub fn updates(&self) -> Vec<(Uuid, OrderStatus)> {
        self.updates.lock().unwrap().clone()
    }
}

#[async_trait]
impl OrderDirectory for MemoryOrders {
    async fn find_order(&self, id: Uuid) -> Result<Option<OrderView>, ClientError> {
        Ok(self.orders.lock().unwrap().get(&id).cloned())
    }

    async fn update_status(&self, id: Uuid, status: OrderStatus) -> Result<(), ClientError> {
        self.set_status(id, status);
        self.updates.lock().unwrap().push((id, status));
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    confirmations: Mutex<Vec<ConfirmationEmail>>,
    cancellations: Mutex<Vec<CancellationEmail>>,
}

async fn wait_for<T: Clone>(sent: &Mutex<Vec<T>>) -> T {
    for _ in 0..100 {
        if let Some(first) = sent.lock().unwrap().first().cloned() {
            return first;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    panic!("no email was sent");
}

impl RecordingEmail {
    pub async fn wait_for_confirmation(&self) -> ConfirmationEmail {
        wait_for(&self.confirmations).await
    }

    pub async fn wait_for_cancellation(&self) -> CancellationEmail {
        wait_for(&self.cancellations).await
    }
}

#[async_trait]
impl EmailNotifier for RecordingEmail {
    async fn payment_confirmed(&self, email: &ConfirmationEmail) -> Result<(), ClientError> {
        self.confirmations.lock().unwrap().push(email.clone());
        Ok(())
    }

    async fn payment_cancelled(&self, email: &CancellationEmail) -> Result<(), ClientError> {
        self.cancellations.lock().unwrap().push(email.clone());
        Ok(())
    }

    async fn low_stock(&self, _email: &LowStockEmail) -> Result<(), ClientError> {
        Ok(())
    }
}

pub struct Fakes {
    pub store: Arc<MemoryPayments>,
    pub gateway: Arc<CountingGateway>,
    pub results: Arc<RecordingResults>,
    pub queue: Arc<MemoryQueue>,
    pub orders: Arc<MemoryOrders>,
    pub email: Arc<RecordingEmail>,
}

impl Fakes {
    pub fn new() -> Self {
        Self {
            store: Arc::new(MemoryPayments::default()),
            gateway: Arc::new(CountingGateway::default()),
            results: Arc::new(RecordingResults::default()),
            queue: Arc::new(MemoryQueue::default()),
            orders: Arc::new(MemoryOrders::default()),
            email: Arc::new(RecordingEmail::default()),
        }
    }

    fn notifier(&self) -> CustomerNotifier {
        CustomerNotifier::new(Arc::new(MemoryUsers), self.queue.clone(), self.email.clone())
    }

    pub fn worker(&self) -> PaymentWorker {
        PaymentWorker::new(
            self.store.clone(),
            self.gateway.clone(),
            self.results.clone(),
            self.notifier(),
        )
    }

    pub fn confirmation(&self) -> PaymentConfirmation {
        PaymentConfirmation::new(self.store.clone(), self.orders.clone(), self.notifier())
    }
}
