use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde::Serialize;
use shared::money::{from_decimal, to_decimal};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    Pending,
    Approved,
    Declined,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "PENDING",
            PaymentStatus::Approved => "APPROVED",
            PaymentStatus::Declined => "DECLINED",
        }
    }

    pub fn is_settled(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "PENDING" => Ok(PaymentStatus::Pending),
            "APPROVED" => Ok(PaymentStatus::Approved),
            "DECLINED" => Ok(PaymentStatus::Declined),
            other => Err(format!("unknown payment status '{other}'")),
        }
    }
}

/// A payment as stored and as the payment API returns it.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentRecord {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: i64,
    pub method: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub card_number: Option<String>,
    pub external_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A payment to be registered. The card number is masked before storage.
#[derive(Debug, Clone, PartialEq)]
pub struct NewPayment {
    pub order_id: Uuid,
    pub user_id: i64,
    pub method: String,
    pub amount: f64,
    pub status: PaymentStatus,
    pub card_number: Option<String>,
    pub external_id: String,
    pub metadata: Option<serde_json::Value>,
}

/// Final state written once the gateway has decided.
#[derive(Debug, Clone, PartialEq)]
pub struct Settlement {
    pub status: PaymentStatus,
    pub failure_reason: Option<String>,
}

impl Settlement {
    pub fn approved() -> Self {
        Self {
            status: PaymentStatus::Approved,
            failure_reason: None,
        }
    }

    pub fn declined(reason: impl Into<String>) -> Self {
        Self {
            status: PaymentStatus::Declined,
            failure_reason: Some(reason.into()),
        }
    }
}

/// Keeps the last four digits.
pub fn mask_card(number: &str) -> String {
    let digits: Vec<char> = number.chars().filter(char::is_ascii_digit).collect();
    let visible = digits.len().saturating_sub(4);
    digits
        .iter()
        .enumerate()
        .map(|(i, d)| if i < visible { '*' } else { *d })
        .collect()
}

#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = crate::schema::payments)]
pub struct PaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: i64,
    pub method: String,
    pub amount: BigDecimal,
    pub status: String,
    pub success: bool,
    pub card_number: Option<String>,
    pub external_id: String,
    pub metadata: Option<serde_json::Value>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = crate::schema::payments)]
pub struct NewPaymentRow {
    pub id: Uuid,
    pub order_id: Uuid,
    pub user_id: i64,
    pub method: String,
    pub amount: BigDecimal,
    pub status: String,
    pub success: bool,
    pub card_number: Option<String>,
    pub external_id: String,
    pub metadata: Option<serde_json::Value>,
}

impl TryFrom<&NewPayment> for NewPaymentRow {
    type Error = StoreError;

    fn try_from(payment: &NewPayment) -> Result<Self, Self::Error> {
        let amount = to_decimal(payment.amount).ok_or_else(|| {
            StoreError::Corrupt(format!("payment amount {} is not finite", payment.amount))
        })?;
        Ok(Self {
            id: Uuid::new_v4(),
            order_id: payment.order_id,
            user_id: payment.user_id,
            method: payment.method.clone(),
            amount,
            status: payment.status.as_str().to_string(),
            success: payment.status == PaymentStatus::Approved,
            card_number: payment.card_number.as_deref().map(mask_card),
            external_id: payment.external_id.clone(),
            metadata: payment.metadata.clone(),
        })
    }
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = StoreError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<PaymentStatus>()
            .map_err(|e| StoreError::Corrupt(format!("payment {}: {e}", row.id)))?;
        let amount = from_decimal(&row.amount)
            .ok_or_else(|| StoreError::Corrupt(format!("payment {}: amount out of range", row.id)))?;
        Ok(PaymentRecord {
            id: row.id,
            order_id: row.order_id,
            user_id: row.user_id,
            method: row.method,
            amount,
            status,
            success: row.success,
            card_number: row.card_number,
            external_id: row.external_id,
            metadata: row.metadata,
            failure_reason: row.failure_reason,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}
