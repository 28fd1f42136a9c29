//! The order side of the payment saga.
//!
//! Placing an order reserves stock item by item and hands every reservation
//! back if a later step fails. Status changes go through the order status
//! machine and a compare-and-set in the store, and reserved stock is released
//! by whichever caller wins the move into FAILED or CANCELLED.

use futures::future::join_all;
use serde::Deserialize;
use shared::clients::{spawn_notification, EmailNotifier, LowStockEmail, UserDirectory};
use shared::money::round_cents;
use shared::{
    amounts_match, Backoff, OrderItem, OrderStatus, OrderView, PaymentDetails, PaymentOrder,
    PaymentOutcome, PaymentRequested, PaymentResult, StatusError, Transition,
};
use std::sync::Arc;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::catalog::{Product, ProductCatalog};
use crate::error::OrderError;
use crate::models::NewOrder;
use crate::publisher::PaymentRequestPublisher;
use crate::store::OrderStore;

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaceOrder {
    pub user_id: i64,
    #[serde(default)]
    pub items: Vec<LineRequest>,
    #[serde(default)]
    pub payment: Option<PaymentInstruction>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LineRequest {
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentInstruction {
    pub method: String,
    #[serde(default)]
    pub card_number: Option<String>,
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// Stock taken from one product for an order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Reservation {
    pub product_id: i64,
    pub quantity: i32,
}

#[derive(Debug, Clone)]
pub struct StatusChange {
    pub order: OrderView,
    /// `false` when the order already had the requested status.
    pub applied: bool,
}

#[derive(Debug, Clone)]
pub struct SagaSettings {
    pub low_stock_threshold: i64,
    pub supplier_email: Option<String>,
    pub restore_retry: Backoff,
}

impl Default for SagaSettings {
    fn default() -> Self {
        Self {
            low_stock_threshold: 5,
            supplier_email: None,
            restore_retry: Backoff::default(),
        }
    }
}

pub struct OrderSaga {
    store: Arc<dyn OrderStore>,
    catalog: Arc<dyn ProductCatalog>,
    users: Arc<dyn UserDirectory>,
    payments: Arc<dyn PaymentRequestPublisher>,
    email: Arc<dyn EmailNotifier>,
    settings: SagaSettings,
}

/// Checks the request and merges repeated products, keeping first-seen order.
pub fn order_lines(request: &PlaceOrder) -> Result<Vec<LineRequest>, OrderError> {
    if request.user_id <= 0 {
        return Err(OrderError::Validation("userId must be a positive integer".into()));
    }
    if request.items.is_empty() {
        return Err(OrderError::Validation("items must not be empty".into()));
    }

    let mut lines: Vec<LineRequest> = Vec::with_capacity(request.items.len());
    for item in &request.items {
        if item.product_id <= 0 {
            return Err(OrderError::Validation(format!(
                "invalid productId {}",
                item.product_id
            )));
        }
        if item.quantity <= 0 {
            return Err(OrderError::Validation(format!(
                "quantity for product {} must be positive",
                item.product_id
            )));
        }
        match lines.iter_mut().find(|line| line.product_id == item.product_id) {
            Some(line) => {
                line.quantity = line.quantity.checked_add(item.quantity).ok_or_else(|| {
                    OrderError::Validation(format!("quantity for product {} is too large", item.product_id))
                })?;
            }
            None => lines.push(*item),
        }
    }
    Ok(lines)
}

impl OrderSaga {
    pub fn new(
        store: Arc<dyn OrderStore>,
        catalog: Arc<dyn ProductCatalog>,
        users: Arc<dyn UserDirectory>,
        payments: Arc<dyn PaymentRequestPublisher>,
        email: Arc<dyn EmailNotifier>,
        settings: SagaSettings,
    ) -> Self {
        Self {
            store,
            catalog,
            users,
            payments,
            email,
            settings,
        }
    }

    pub fn store(&self) -> &dyn OrderStore {
        self.store.as_ref()
    }

    pub async fn place_order(&self, request: PlaceOrder) -> Result<OrderView, OrderError> {
        let lines = order_lines(&request)?;

        self.users
            .find_user(request.user_id)
            .await?
            .ok_or(OrderError::UserNotFound(request.user_id))?;

        let mut reserved = Vec::with_capacity(lines.len());
        let items = match self.reserve(&lines, &mut reserved).await {
            Ok(items) => items,
            Err(e) => {
                self.restore(&reserved).await;
                return Err(e);
            }
        };

        let new_order = NewOrder {
            id: Uuid::new_v4(),
            user_id: request.user_id,
            total: round_cents(items.iter().map(|item| item.subtotal).sum()),
            items,
        };
        let order = match self.store.insert(&new_order).await {
            Ok(order) => order,
            Err(e) => {
                self.restore(&reserved).await;
                return Err(e.into());
            }
        };
        info!(order_id = %order.id, user_id = order.user_id, total = order.total, "order created");

        if let Some(payment) = request.payment {
            let event = payment_request(&order, payment);
            if let Err(e) = self.payments.publish(&event).await {
                error!(order_id = %order.id, error = %e, "failed to publish payment request");
                if let Err(status_error) = self.apply_status(order.id, OrderStatus::Failed).await {
                    error!(order_id = %order.id, error = %status_error, "failed to mark order FAILED");
                    self.restore_if_pending(order.id, &reserved).await;
                }
                return Err(OrderError::PaymentUnavailable(e));
            }
            info!(order_id = %order.id, event_id = %event.event_id, "payment requested");
        }

        Ok(order)
    }

    async fn reserve(
        &self,
        lines: &[LineRequest],
        reserved: &mut Vec<Reservation>,
    ) -> Result<Vec<OrderItem>, OrderError> {
        let mut items = Vec::with_capacity(lines.len());
        for line in lines {
            let product = self
                .catalog
                .product(line.product_id)
                .await?
                .ok_or(OrderError::ProductNotFound(line.product_id))?;

            if product.stock < i64::from(line.quantity) {
                return Err(OrderError::InsufficientStock {
                    product_id: product.id,
                    name: product.name,
                    available: product.stock,
                    requested: line.quantity,
                });
            }

            let remaining = self.catalog.decrement_stock(line.product_id, line.quantity).await?;
            reserved.push(Reservation {
                product_id: line.product_id,
                quantity: line.quantity,
            });
            debug!(product_id = line.product_id, quantity = line.quantity, "stock reserved");

            if remaining.stock <= self.settings.low_stock_threshold {
                self.warn_low_stock(&remaining);
            }

            items.push(OrderItem {
                product_id: product.id,
                product_name: Some(product.name),
                quantity: line.quantity,
                subtotal: round_cents(product.price * f64::from(line.quantity)),
            });
        }
        Ok(items)
    }

    /// Hands reserved stock back. Every reservation is attempted even when
    /// others fail; failures are logged.
    pub async fn restore(&self, reserved: &[Reservation]) {
        if reserved.is_empty() {
            return;
        }
        let retry = self.settings.restore_retry;
        let results = join_all(reserved.iter().map(|r| async move {
            let outcome = retry
                .retry("restore stock", || self.catalog.increment_stock(r.product_id, r.quantity))
                .await;
            (r, outcome)
        }))
        .await;

        for (r, outcome) in results {
            match outcome {
                Ok(()) => debug!(product_id = r.product_id, quantity = r.quantity, "stock restored"),
                Err(e) => error!(
                    product_id = r.product_id,
                    quantity = r.quantity,
                    error = %e,
                    "failed to restore stock"
                ),
            }
        }
    }

    /// Releases `reserved` for an order that could not be failed, unless another
    /// transition already settled it and released the stock itself.
    async fn restore_if_pending(&self, id: Uuid, reserved: &[Reservation]) {
        match self.store.find(id).await {
            Ok(Some(order)) if order.status == OrderStatus::Pending => self.restore(reserved).await,
            Ok(Some(order)) => warn!(
                order_id = %id,
                status = %order.status,
                "order was settled concurrently, leaving its stock to that transition"
            ),
            Ok(None) => self.restore(reserved).await,
            Err(e) => error!(
                order_id = %id,
                error = %e,
                reserved = ?reserved,
                "cannot tell whether stock was released, reconcile it by hand"
            ),
        }
    }

    async fn release(&self, order: &OrderView) {
        let reserved: Vec<Reservation> = order
            .items
            .iter()
            .map(|item| Reservation {
                product_id: item.product_id,
                quantity: item.quantity,
            })
            .collect();
        info!(order_id = %order.id, status = %order.status, "releasing order stock");
        self.restore(&reserved).await;
    }

    fn warn_low_stock(&self, product: &Product) {
        let email = Arc::clone(&self.email);
        let message = LowStockEmail {
            to: self.settings.supplier_email.clone(),
            product_id: product.id,
            product_name: product.name.clone(),
            current_stock: product.stock,
            threshold: Some(self.settings.low_stock_threshold),
        };
        warn!(product_id = product.id, stock = product.stock, "product stock is low");
        spawn_notification("low stock", async move { email.low_stock(&message).await });
    }

    pub async fn apply_status(&self, id: Uuid, to: OrderStatus) -> Result<StatusChange, OrderError> {
        let order = self.store.find(id).await?.ok_or(OrderError::NotFound(id))?;
        if order.status.transition(to)? == Transition::Unchanged {
            return Ok(StatusChange {
                order,
                applied: false,
            });
        }

        match self.store.compare_and_set_status(id, order.status, to).await? {
            Some(updated) => {
                info!(order_id = %id, from = %order.status, to = %to, "order status changed");
                if to.releases_stock() {
                    self.release(&updated).await;
                }
                Ok(StatusChange {
                    order: updated,
                    applied: true,
                })
            }
            None => {
                // Someone else moved the order between the read and the update.
                let current = self.store.find(id).await?.ok_or(OrderError::NotFound(id))?;
                match current.status.transition(to)? {
                    Transition::Unchanged => Ok(StatusChange {
                        order: current,
                        applied: false,
                    }),
                    Transition::Apply => Err(StatusError::IllegalTransition {
                        from: current.status,
                        to,
                    }
                    .into()),
                }
            }
        }
    }

    pub async fn handle_payment_result(&self, result: &PaymentResult) -> Result<(), OrderError> {
        let Some(order) = self.store.find(result.order_id).await? else {
            warn!(order_id = %result.order_id, event_id = %result.event_id, "payment result for unknown order");
            return Ok(());
        };

        let (target, reason) = match result.outcome {
            PaymentOutcome::Approved if amounts_match(result.amount, order.total) => {
                (OrderStatus::Paid, None)
            }
            PaymentOutcome::Approved => {
                warn!(
                    order_id = %order.id,
                    paid = result.amount,
                    total = order.total,
                    "approved payment does not cover the order"
                );
                (OrderStatus::Failed, Some("amount mismatch"))
            }
            PaymentOutcome::Declined => (OrderStatus::Failed, result.reason.as_deref()),
        };

        match self.apply_status(order.id, target).await {
            Ok(change) if change.applied => {
                info!(order_id = %order.id, status = %target, reason, "payment result applied");
                Ok(())
            }
            Ok(_) => {
                debug!(order_id = %order.id, status = %target, "payment result already applied");
                Ok(())
            }
            Err(OrderError::Status(StatusError::IllegalTransition { from, .. }))
                if target == OrderStatus::Paid =>
            {
                // The customer was already told the order is PAID.
                error!(
                    order_id = %order.id,
                    payment_id = %result.payment_id,
                    external_id = %result.external_id,
                    amount = result.amount,
                    current = %from,
                    "approved payment for a settled order needs reconciliation"
                );
                Ok(())
            }
            Err(OrderError::Status(StatusError::IllegalTransition { from, .. })) => {
                warn!(
                    order_id = %order.id,
                    payment_id = %result.payment_id,
                    current = %from,
                    wanted = %target,
                    "order already settled, ignoring payment result"
                );
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}

fn payment_request(order: &OrderView, payment: PaymentInstruction) -> PaymentRequested {
    PaymentRequested::new(
        PaymentOrder {
            id: order.id,
            user_id: order.user_id,
            total: order.total,
            items: order.items.clone(),
        },
        PaymentDetails {
            payment_id: None,
            order_id: Some(order.id),
            user_id: Some(order.user_id),
            method: Some(payment.method),
            amount: Some(order.total),
            card_number: payment.card_number,
            metadata: payment.metadata,
        },
    )
}
