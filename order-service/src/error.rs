use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use shared::kafka::PublishError;
use shared::{ClientError, StatusError};
use thiserror::Error;
use tracing::error;
use uuid::Uuid;

use crate::store::StoreError;

#[derive(Debug, Error)]
pub enum OrderError {
    #[error("{0}")]
    Validation(String),

    #[error("user {0} not found")]
    UserNotFound(i64),

    #[error("product {0} not found")]
    ProductNotFound(i64),

    #[error("insufficient stock for product {name}")]
    InsufficientStock {
        product_id: i64,
        name: String,
        available: i64,
        requested: i32,
    },

    #[error("order {0} not found")]
    NotFound(Uuid),

    #[error(transparent)]
    Status(#[from] StatusError),

    #[error(transparent)]
    Upstream(#[from] ClientError),

    #[error("payment request could not be published: {0}")]
    PaymentUnavailable(#[source] PublishError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl OrderError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            OrderError::Validation(_)
            | OrderError::InsufficientStock { .. }
            | OrderError::Status(StatusError::Unknown(_)) => StatusCode::BAD_REQUEST,
            OrderError::UserNotFound(_) | OrderError::ProductNotFound(_) | OrderError::NotFound(_) => {
                StatusCode::NOT_FOUND
            }
            OrderError::Status(StatusError::IllegalTransition { .. }) => StatusCode::CONFLICT,
            OrderError::Upstream(e) => match e.status() {
                Some(status) if (400..500).contains(&status) => {
                    StatusCode::from_u16(status).unwrap_or(StatusCode::BAD_GATEWAY)
                }
                _ => StatusCode::BAD_GATEWAY,
            },
            OrderError::PaymentUnavailable(_) => StatusCode::SERVICE_UNAVAILABLE,
            OrderError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether a consumer should try the same message again.
    pub fn is_transient(&self) -> bool {
        match self {
            OrderError::Store(StoreError::Corrupt(_)) => false,
            OrderError::Store(_) | OrderError::PaymentUnavailable(_) => true,
            OrderError::Upstream(e) => e.status().map_or(true, |status| status >= 500),
            _ => false,
        }
    }
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = match &self {
            OrderError::InsufficientStock {
                product_id,
                name,
                available,
                requested,
            } => json!({
                "message": format!("insufficient stock for product {name}"),
                "productId": product_id,
                "available": available,
                "requested": requested,
            }),
            OrderError::Upstream(ClientError::Rejected { message, .. }) if status.is_client_error() => {
                json!({ "message": message })
            }
            OrderError::Store(e) => {
                error!(error = %e, "order store failure");
                json!({ "message": "internal error" })
            }
            other => json!({ "message": other.to_string() }),
        };
        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::OrderStatus;

    #[test]
    fn errors_map_to_http_statuses() {
        assert_eq!(
            OrderError::Validation("items must not be empty".into()).status_code(),
            StatusCode::BAD_REQUEST
        );
        assert_eq!(OrderError::UserNotFound(3).status_code(), StatusCode::NOT_FOUND);
        assert_eq!(
            OrderError::Status(StatusError::IllegalTransition {
                from: OrderStatus::Paid,
                to: OrderStatus::Cancelled
            })
            .status_code(),
            StatusCode::CONFLICT
        );
        assert_eq!(
            OrderError::Status(StatusError::Unknown("SHIPPED".into())).status_code(),
            StatusCode::BAD_REQUEST
        );
    }

    #[test]
    fn collaborator_client_errors_are_forwarded() {
        let rejected = OrderError::Upstream(ClientError::Rejected {
            service: "products-service",
            status: 422,
            message: "quantity must be positive".into(),
        });
        assert_eq!(rejected.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!rejected.is_transient());

        let broken = OrderError::Upstream(ClientError::Rejected {
            service: "products-service",
            status: 500,
            message: "boom".into(),
        });
        assert_eq!(broken.status_code(), StatusCode::BAD_GATEWAY);
        assert!(broken.is_transient());
    }

    #[tokio::test]
    async fn store_failures_are_not_leaked() {
        let response =
            OrderError::Store(StoreError::Corrupt("order abc: bad status".into())).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(body["message"], "internal error");
    }
}
