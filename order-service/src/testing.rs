//! In-memory collaborators for unit tests.

use async_trait::async_trait;
use chrono::Utc;
use shared::clients::{CancellationEmail, ConfirmationEmail, EmailNotifier, LowStockEmail, User, UserDirectory};
use shared::kafka::PublishError;
use shared::{Backoff, ClientError, OrderStatus, OrderView, PaymentRequested};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

use crate::catalog::{Product, ProductCatalog};
use crate::models::NewOrder;
use crate::publisher::PaymentRequestPublisher;
use crate::saga::{OrderSaga, SagaSettings};
use crate::store::{OrderStore, StoreError};

pub fn product(id: i64, name: &str, price: f64, stock: i64) -> Product {
    Product {
        id,
        name: name.to_string(),
        price,
        stock,
    }
}

#[derive(Default)]
pub struct MemoryStore {
    orders: Mutex<Vec<OrderView>>,
    fail_inserts: AtomicBool,
    interleaved: Mutex<Option<OrderStatus>>,
}

impl MemoryStore {
    pub fn fail_inserts(&self) {
        self.fail_inserts.store(true, Ordering::SeqCst);
    }

    /// Another writer moves the order to `status` just before the next update.
    pub fn settle_before_next_update(&self, status: OrderStatus) {
        *self.interleaved.lock().unwrap() = Some(status);
    }

    pub fn get(&self, id: Uuid) -> Option<OrderView> {
        self.orders.lock().unwrap().iter().find(|o| o.id == id).cloned()
    }

    pub fn all(&self) -> Vec<OrderView> {
        self.orders.lock().unwrap().clone()
    }

    pub fn is_empty(&self) -> bool {
        self.orders.lock().unwrap().is_empty()
    }

    fn newest_first(mut orders: Vec<OrderView>) -> Vec<OrderView> {
        orders.reverse();
        orders
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert(&self, order: &NewOrder) -> Result<OrderView, StoreError> {
        if self.fail_inserts.load(Ordering::SeqCst) {
            return Err(StoreError::Corrupt("insert refused".into()));
        }
        let now = Utc::now();
        let view = OrderView {
            id: order.id,
            user_id: order.user_id,
            total: order.total,
            items: order.items.clone(),
            status: OrderStatus::Pending,
            created_at: now,
            updated_at: now,
        };
        self.orders.lock().unwrap().push(view.clone());
        Ok(view)
    }

    async fn find(&self, id: Uuid) -> Result<Option<OrderView>, StoreError> {
        Ok(self.get(id))
    }

    async fn list(&self) -> Result<Vec<OrderView>, StoreError> {
        Ok(Self::newest_first(self.all()))
    }

    async fn list_for_user(&self, user_id: i64) -> Result<Vec<OrderView>, StoreError> {
        let mine = self.all().into_iter().filter(|o| o.user_id == user_id).collect();
        Ok(Self::newest_first(mine))
    }

    async fn compare_and_set_status(
        &self,
        id: Uuid,
        from: OrderStatus,
        to: OrderStatus,
    ) -> Result<Option<OrderView>, StoreError> {
        let mut orders = self.orders.lock().unwrap();
        if let Some(status) = self.interleaved.lock().unwrap().take() {
            if let Some(order) = orders.iter_mut().find(|o| o.id == id) {
                order.status = status;
            }
        }
        Ok(orders
            .iter_mut()
            .find(|o| o.id == id && o.status == from)
            .map(|o| {
                o.status = to;
                o.updated_at = Utc::now();
                o.clone()
            }))
    }
}

#[derive(Default)]
pub struct MemoryCatalog {
    products: Mutex<HashMap<i64, Product>>,
    increments: Mutex<Vec<(i64, i32)>>,
    failing_increments: AtomicU32,
}

impl MemoryCatalog {
    pub fn stock(&self, id: i64) -> i64 {
        self.products.lock().unwrap().get(&id).map_or(0, |p| p.stock)
    }

    /// Successful increments, in the order they landed.
    pub fn increments(&self) -> Vec<(i64, i32)> {
        self.increments.lock().unwrap().clone()
    }

    pub fn fail_increments(&self, times: u32) {
        self.failing_increments.store(times, Ordering::SeqCst);
    }
}

#[async_trait]
impl ProductCatalog for MemoryCatalog {
    async fn product(&self, id: i64) -> Result<Option<Product>, ClientError> {
        Ok(self.products.lock().unwrap().get(&id).cloned())
    }

    async fn decrement_stock(&self, id: i64, quantity: i32) -> Result<Product, ClientError> {
        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(&id)
            .ok_or(ClientError::NotFound { service: "products-service" })?;
        product.stock -= i64::from(quantity);
        Ok(product.clone())
    }

    async fn increment_stock(&self, id: i64, quantity: i32) -> Result<(), ClientError> {
        let pending_failures = self.failing_increments.load(Ordering::SeqCst);
        if pending_failures > 0 {
            self.failing_increments.store(pending_failures - 1, Ordering::SeqCst);
            return Err(ClientError::Rejected {
                service: "products-service",
                status: 503,
                message: "unavailable".into(),
            });
        }
        let mut products = self.products.lock().unwrap();
        let product = products
            .get_mut(&id)
            .ok_or(ClientError::NotFound { service: "products-service" })?;
        product.stock += i64::from(quantity);
        self.increments.lock().unwrap().push((id, quantity));
        Ok(())
    }
}

pub struct MemoryUsers {
    known: Vec<i64>,
}

#[async_trait]
impl UserDirectory for MemoryUsers {
    async fn find_user(&self, id: i64) -> Result<Option<User>, ClientError> {
        Ok(self.known.contains(&id).then(|| User {
            id,
            name: Some(format!("user {id}")),
            email: Some(format!("user{id}@example.com")),
        }))
    }
}

#[derive(Default)]
pub struct RecordingPublisher {
    published: Mutex<Vec<PaymentRequested>>,
    fail: AtomicBool,
}

impl RecordingPublisher {
    pub fn fail(&self) {
        self.fail.store(true, Ordering::SeqCst);
    }

    pub fn published(&self) -> Vec<PaymentRequested> {
        self.published.lock().unwrap().clone()
    }
}

#[async_trait]
impl PaymentRequestPublisher for RecordingPublisher {
    async fn publish(&self, event: &PaymentRequested) -> Result<(), PublishError> {
        if self.fail.load(Ordering::SeqCst) {
            let err = serde_json::from_str::<serde_json::Value>("{").unwrap_err();
            return Err(PublishError::Encode(err));
        }
        self.published.lock().unwrap().push(event.clone());
        Ok(())
    }
}

#[derive(Default)]
pub struct RecordingEmail {
    low_stock: Mutex<Vec<LowStockEmail>>,
}

impl RecordingEmail {
    pub async fn wait_for_low_stock(&self) -> LowStockEmail {
        for _ in 0..100 {
            if let Some(sent) = self.low_stock.lock().unwrap().first().cloned() {
                return sent;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("no low stock email was sent");
    }
}

#[async_trait]
impl EmailNotifier for RecordingEmail {
    async fn payment_confirmed(&self, _email: &ConfirmationEmail) -> Result<(), ClientError> {
        Ok(())
    }

    async fn payment_cancelled(&self, _email: &CancellationEmail) -> Result<(), ClientError> {
        Ok(())
    }

    async fn low_stock(&self, email: &LowStockEmail) -> Result<(), ClientError> {
        self.low_stock.lock().unwrap().push(email.clone());
        Ok(())
    }
}

pub struct Fakes {
    pub store: Arc<MemoryStore>,
    pub catalog: Arc<MemoryCatalog>,
    pub payments: Arc<RecordingPublisher>,
    pub email: Arc<RecordingEmail>,
}

impl Fakes {
    /// User 1 exists; the catalog holds `products`.
    pub fn new(products: Vec<Product>) -> Self {
        let catalog = MemoryCatalog::default();
        catalog
            .products
            .lock()
            .unwrap()
            .extend(products.into_iter().map(|p| (p.id, p)));
        Self {
            store: Arc::new(MemoryStore::default()),
            catalog: Arc::new(catalog),
            payments: Arc::new(RecordingPublisher::default()),
            email: Arc::new(RecordingEmail::default()),
        }
    }

    pub fn saga(&self) -> OrderSaga {
        OrderSaga::new(
            self.store.clone(),
            self.catalog.clone(),
            Arc::new(MemoryUsers { known: vec![1] }),
            self.payments.clone(),
            self.email.clone(),
            SagaSettings {
                low_stock_threshold: 5,
                supplier_email: Some("supplier@example.com".into()),
                restore_retry: Backoff::new(Duration::from_millis(1), Duration::from_millis(2), 4),
            },
        )
    }
}
