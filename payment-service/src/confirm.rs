use serde::{Deserialize, Serialize};
use shared::clients::PaymentLine;
use shared::{amounts_match, OrderStatus};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

use crate::error::PaymentError;
use crate::gateway::PaymentMethod;
use crate::models::{NewPayment, PaymentRecord, PaymentStatus};
use crate::notify::CustomerNotifier;
use crate::orders::OrderDirectory;
use crate::store::{confirmation_prefix, PaymentStore};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmPayments {
    #[serde(default)]
    pub order_id: Option<Uuid>,
    #[serde(default)]
    pub payments: Vec<PaymentInput>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentInput {
    pub method: String,
    pub amount: f64,
}

#[derive(Debug, Clone, Serialize)]
pub struct ConfirmationReceipt {
    pub message: String,
    pub payments: Vec<PaymentRecord>,
}

/// Records payments settled outside the asynchronous worker and marks the
/// order paid.
pub struct PaymentConfirmation {
    store: Arc<dyn PaymentStore>,
    orders: Arc<dyn OrderDirectory>,
    notifier: CustomerNotifier,
}

impl PaymentConfirmation {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        orders: Arc<dyn OrderDirectory>,
        notifier: CustomerNotifier,
    ) -> Self {
        Self {
            store,
            orders,
            notifier,
        }
    }

    pub fn store(&self) -> &dyn PaymentStore {
        self.store.as_ref()
    }

    pub async fn confirm(&self, request: ConfirmPayments) -> Result<ConfirmationReceipt, PaymentError> {
        let order_id = request
            .order_id
            .ok_or_else(|| PaymentError::Validation("orderId and payments are required".into()))?;
        if request.payments.is_empty() {
            return Err(PaymentError::Validation("orderId and payments are required".into()));
        }
        for payment in &request.payments {
            payment
                .method
                .parse::<PaymentMethod>()
                .map_err(|_| PaymentError::InvalidMethod(payment.method.clone()))?;
            if !payment.amount.is_finite() || payment.amount <= 0.0 {
                return Err(PaymentError::Validation(format!(
                    "invalid amount {} for {}",
                    payment.amount, payment.method
                )));
            }
        }

        let order = self
            .orders
            .find_order(order_id)
            .await?
            .ok_or(PaymentError::OrderNotFound(order_id))?;
        match order.status {
            OrderStatus::Paid => return Err(PaymentError::AlreadyPaid(order.id)),
            OrderStatus::Cancelled | OrderStatus::Failed => {
                return Err(PaymentError::OrderClosed {
                    id: order.id,
                    status: order.status,
                })
            }
            OrderStatus::Pending => {}
        }
        if !order.total.is_finite() || order.total <= 0.0 {
            return Err(PaymentError::InvalidOrderTotal(order.id));
        }

        let informed: f64 = request.payments.iter().map(|p| p.amount).sum();
        if !amounts_match(informed, order.total) {
            return Err(PaymentError::AmountMismatch {
                expected: order.total,
                informed,
            });
        }

        let user = self.notifier.recipient(order.user_id).await;

        let new_payments: Vec<NewPayment> = request
            .payments
            .iter()
            .enumerate()
            .map(|(index, payment)| NewPayment {
                order_id: order.id,
                user_id: order.user_id,
                method: payment.method.trim().to_string(),
                amount: payment.amount,
                status: PaymentStatus::Approved,
                card_number: None,
                external_id: format!("{}{}", confirmation_prefix(order.id), index),
                metadata: None,
            })
            .collect();
        let records = self.store.record_confirmed(order.id, &new_payments).await?;

        self.orders.update_status(order.id, OrderStatus::Paid).await?;
        info!(order_id = %order.id, payments = records.len(), amount = informed, "payment confirmed");

        let lines = request
            .payments
            .into_iter()
            .map(|p| PaymentLine {
                method: p.method,
                amount: p.amount,
                success: Some(true),
            })
            .collect();
        self.notifier
            .confirmed(order.id, user, order.user_id, informed, lines)
            .await;

        Ok(ConfirmationReceipt {
            message: "payment confirmed".to_string(),
            payments: records,
        })
    }
}
