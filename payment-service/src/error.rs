use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shared::{ClientError, OrderStatus};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum PaymentError {
    #[error("{0}")]
    Validation(String),

    #[error("invalid payment method: {0}")]
    InvalidMethod(String),

    #[error("order {0} not found")]
    OrderNotFound(Uuid),

    #[error("order {0} is already paid")]
    AlreadyPaid(Uuid),

    #[error("order {id} is {status} and cannot receive payments")]
    OrderClosed { id: Uuid, status: OrderStatus },

    #[error("order {0} has an invalid total")]
    InvalidOrderTotal(Uuid),

    #[error("informed amount differs from the order total")]
    AmountMismatch { expected: f64, informed: f64 },

    #[error(transparent)]
    Upstream(#[from] ClientError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl PaymentError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            PaymentError::Validation(_)
            | PaymentError::InvalidMethod(_)
            | PaymentError::AlreadyPaid(_)
            | PaymentError::OrderClosed { .. }
            | PaymentError::AmountMismatch { .. } => StatusCode::BAD_REQUEST,
            PaymentError::OrderNotFound(_) => StatusCode::NOT_FOUND,
            PaymentError::InvalidOrderTotal(_) | PaymentError::Store(_) => {
                StatusCode::INTERNAL_SERVER_ERROR
            }
            PaymentError::Upstream(e) => match e.status() {
                Some(status) if (400..500).contains(&status) => {
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                _ => StatusCode::BAD_GATEWAY,
            },
        }
    }
}

impl IntoResponse for PaymentError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            PaymentError::AmountMismatch { expected, informed } => json!({
                "message": self.to_string(),
                "expected": expected,
                "informed": informed,
            }),
            PaymentError::Upstream(ClientError::Rejected { message, .. }) if status.is_client_error() => {
                json!({ "message": message })
            }
            PaymentError::Store(e) => {
                error!(error = %e, "payment store failure");
                json!({ "message": "internal error" })
            }
            other => json!({ "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}
