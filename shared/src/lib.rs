use serde::{Deserialize, Serialize};
use uuid::Uuid;
use chrono::{DateTime, Utc};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

pub mod clients;
pub mod kafka;
pub mod money;
pub mod queue;
pub mod retry;
pub mod signal;
pub mod telemetry;

pub use clients::ClientError;
pub use money::{amounts_match, AMOUNT_TOLERANCE};
pub use retry::Backoff;

/// Highest payload version this build understands.
pub const SCHEMA_VERSION: u32 = 1;

fn initial_schema_version() -> u32 {
    1
}

/// Metadata every broker payload carries.
pub trait Envelope {
    fn event_id(&self) -> Uuid;
    fn schema_version(&self) -> u32;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
}

/// What applying a status to an order amounts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Transition {
    Apply,
    Unchanged,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StatusError {
    #[error("unknown order status '{0}'")]
    Unknown(String),
    #[error("order cannot move from {from} to {to}")]
    IllegalTransition { from: OrderStatus, to: OrderStatus },
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 4] = [
        OrderStatus::Pending,
        OrderStatus::Paid,
        OrderStatus::Failed,
        OrderStatus::Cancelled,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "PENDING",
            OrderStatus::Paid => "PAID",
            OrderStatus::Failed => "FAILED",
            OrderStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, OrderStatus::Pending)
    }

    /// Entering this status hands reserved stock back to the catalog.
    pub fn releases_stock(&self) -> bool {
        matches!(self, OrderStatus::Failed | OrderStatus::Cancelled)
    }

    /// Only PENDING orders move forward. Re-applying the current status is a
    /// no-op so redelivered messages are harmless.
    pub fn transition(self, to: OrderStatus) -> Result<Transition, StatusError> {
        if self == to {
            return Ok(Transition::Unchanged);
        }
        match self {
            OrderStatus::Pending => Ok(Transition::Apply),
            from => Err(StatusError::IllegalTransition { from, to }),
        }
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = StatusError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_uppercase();
        OrderStatus::ALL
            .into_iter()
            .find(|status| status.as_str() == wanted)
            .ok_or_else(|| StatusError::Unknown(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderItem {
    pub product_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    pub quantity: i32,
    pub subtotal: f64,
}

/// An order as the order API exposes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderView {
    pub id: Uuid,
    pub user_id: i64,
    pub total: f64,
    pub items: Vec<OrderItem>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentOrder {
    pub id: Uuid,
    pub user_id: i64,
    pub total: f64,
    pub items: Vec<OrderItem>,
}

/// Payment section of a payment request. Every field may be missing on the
/// wire; the payment worker falls back to the order section.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentDetails {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_id: Option<Uuid>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub method: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
}

/// Published by the order service once a PENDING order is persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRequested {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(default = "initial_schema_version")]
    pub schema_version: u32,
    pub order: PaymentOrder,
    pub payment: PaymentDetails,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentOutcome {
    Approved,
    Declined,
}

/// Published by the payment worker once a payment is decided.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentResult {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(default = "initial_schema_version")]
    pub schema_version: u32,
    pub order_id: Uuid,
    pub payment_id: Uuid,
    pub external_id: String,
    pub amount: f64,
    pub outcome: PaymentOutcome,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Work item on the customer notification queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentConfirmed {
    pub event_id: Uuid,
    pub occurred_at: DateTime<Utc>,
    #[serde(default = "initial_schema_version")]
    pub schema_version: u32,
    pub order_id: Uuid,
    pub user_id: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
    pub amount: f64,
}

impl PaymentRequested {
    pub fn new(order: PaymentOrder, payment: PaymentDetails) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            order,
            payment,
        }
    }
}

impl PaymentResult {
    pub fn new(
        order_id: Uuid,
        payment_id: Uuid,
        external_id: String,
        amount: f64,
        outcome: PaymentOutcome,
        reason: Option<String>,
    ) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            order_id,
            payment_id,
            external_id,
            amount,
            outcome,
            reason,
        }
    }
}

impl PaymentConfirmed {
    pub fn new(order_id: Uuid, user_id: i64, amount: f64) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            occurred_at: Utc::now(),
            schema_version: SCHEMA_VERSION,
            order_id,
            user_id,
            user_name: None,
            email: None,
            amount,
        }
    }

    pub fn with_recipient(mut self, user_name: Option<String>, email: Option<String>) -> Self {
        self.user_name = user_name;
        self.email = email;
        self
    }
}

macro_rules! impl_envelope {
    ($($ty:ty),*) => {
        $(impl Envelope for $ty {
            fn event_id(&self) -> Uuid {
                self.event_id
            }

            fn schema_version(&self) -> u32 {
                self.schema_version
            }
        })*
    };
}

impl_envelope!(PaymentRequested, PaymentResult, PaymentConfirmed);
