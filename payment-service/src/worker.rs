//! Consumer of payment requests published by the order service.

use async_trait::async_trait;
use shared::kafka::{HandlerError, MessageHandler};
use shared::{PaymentOutcome, PaymentRequested, PaymentResult};
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

use crate::events::ResultPublisher;
use crate::gateway::{Authorization, Decision, PaymentGateway};
use crate::models::{NewPayment, PaymentRecord, PaymentStatus, Settlement};
use crate::notify::CustomerNotifier;
use crate::store::PaymentStore;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum InvalidEvent {
    #[error("payment orderId does not match the order")]
    OrderMismatch,
    #[error("payment method is missing")]
    MissingMethod,
    #[error("payment amount must be a positive number")]
    InvalidAmount,
    #[error("payment userId is invalid")]
    InvalidUser,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidatedPayment {
    pub external_id: String,
    pub order_id: Uuid,
    pub user_id: i64,
    pub method: String,
    pub amount: f64,
    pub card_number: Option<String>,
    pub metadata: Option<serde_json::Value>,
}

/// Fills payment fields from the order section where the payment omits them.
pub fn validate(event: &PaymentRequested) -> Result<ValidatedPayment, InvalidEvent> {
    let payment = &event.payment;
    let order = &event.order;

    let order_id = payment.order_id.unwrap_or(order.id);
    if order_id != order.id {
        return Err(InvalidEvent::OrderMismatch);
    }

    let method = payment.method.as_deref().map(str::trim).unwrap_or_default();
    if method.is_empty() {
        return Err(InvalidEvent::MissingMethod);
    }

    let amount = payment.amount.unwrap_or(order.total);
    if !amount.is_finite() || amount <= 0.0 {
        return Err(InvalidEvent::InvalidAmount);
    }

    let user_id = payment.user_id.unwrap_or(order.user_id);
    if user_id <= 0 {
        return Err(InvalidEvent::InvalidUser);
    }

    let external_id = payment
        .payment_id
        .as_deref()
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map_or_else(|| event.event_id.to_string(), str::to_string);

    let card_number = payment
        .card_number
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .map(str::to_string);

    let metadata = payment.metadata.clone().filter(serde_json::Value::is_object);

    Ok(ValidatedPayment {
        external_id,
        order_id,
        user_id,
        method: method.to_string(),
        amount,
        card_number,
        metadata,
    })
}

fn result_of(record: &PaymentRecord) -> PaymentResult {
    let outcome = match record.status {
        PaymentStatus::Approved => PaymentOutcome::Approved,
        _ => PaymentOutcome::Declined,
    };
    PaymentResult::new(
        record.order_id,
        record.id,
        record.external_id.clone(),
        record.amount,
        outcome,
        record.failure_reason.clone(),
    )
}

pub struct PaymentWorker {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    results: Arc<dyn ResultPublisher>,
    notifier: CustomerNotifier,
}

impl PaymentWorker {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        results: Arc<dyn ResultPublisher>,
        notifier: CustomerNotifier,
    ) -> Self {
        Self {
            store,
            gateway,
            results,
            notifier,
        }
    }

    async fn publish(&self, record: &PaymentRecord) -> Result<(), HandlerError> {
        self.results
            .publish_result(&result_of(record))
            .await
            .map_err(HandlerError::retryable)
    }

    pub async fn process(&self, event: &PaymentRequested) -> Result<PaymentRecord, HandlerError> {
        let payment = validate(event).map_err(HandlerError::permanent)?;

        let record = self
            .store
            .register(&NewPayment {
                order_id: payment.order_id,
                user_id: payment.user_id,
                method: payment.method.clone(),
                amount: payment.amount,
                status: PaymentStatus::Pending,
                card_number: payment.card_number.clone(),
                external_id: payment.external_id.clone(),
                metadata: payment.metadata.clone(),
            })
            .await
            .map_err(HandlerError::retryable)?;

        if record.status.is_settled() {
            info!(
                order_id = %record.order_id,
                external_id = %record.external_id,
                status = %record.status,
                "payment already settled, re-emitting result"
            );
            self.publish(&record).await?;
            return Ok(record);
        }

        let decision = self
            .gateway
            .authorize(&Authorization {
                method: &payment.method,
                amount: payment.amount,
                card_number: payment.card_number.as_deref(),
            })
            .await;
        let settlement = match decision {
            Decision::Approved => Settlement::approved(),
            Decision::Declined(reason) => Settlement::declined(reason),
        };

        let settled = match self
            .store
            .settle(record.id, &settlement)
            .await
            .map_err(HandlerError::retryable)?
        {
            Some(settled) => settled,
            None => {
                // Another delivery settled it first and owns the notification.
                let current = self
                    .store
                    .find_by_external_id(&record.external_id)
                    .await
                    .map_err(HandlerError::retryable)?
                    .unwrap_or(record);
                self.publish(&current).await?;
                return Ok(current);
            }
        };

        match settled.status {
            PaymentStatus::Approved => {
                info!(order_id = %settled.order_id, amount = settled.amount, "payment approved");
                self.notifier
                    .approved(settled.order_id, settled.user_id, settled.amount)
                    .await;
            }
            _ => {
                warn!(
                    order_id = %settled.order_id,
                    reason = settled.failure_reason.as_deref().unwrap_or_default(),
                    "payment declined"
                );
                self.notifier
                    .declined(settled.order_id, settled.user_id, settled.amount)
                    .await;
            }
        }

        self.publish(&settled).await?;
        Ok(settled)
    }
}

#[async_trait]
impl MessageHandler for PaymentWorker {
    type Message = PaymentRequested;

    fn name(&self) -> &'static str {
        "payment-request"
    }

    async fn handle(&self, event: PaymentRequested) -> Result<(), HandlerError> {
        self.process(&event).await.map(|_| ())
    }
}
