use axum::extract::rejection::JsonRejection;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::clients::PaymentLine;
use std::sync::Arc;
use thiserror::Error;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::error;

use crate::email::{EmailTemplates, LowStock, MailError, Mailer, OutgoingEmail};

#[derive(Clone)]
pub struct AppState {
    pub mailer: Arc<dyn Mailer>,
    pub templates: Arc<EmailTemplates>,
}

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    Validation(String),
    #[error(transparent)]
    Mail(#[from] MailError),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        match self {
            ApiError::Validation(message) => {
                (StatusCode::BAD_REQUEST, Json(json!({ "message": message }))).into_response()
            }
            ApiError::Mail(e) => {
                error!(error = %e, "failed to send email");
                (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "message": "failed to send email" })),
                )
                    .into_response()
            }
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfirmationRequest {
    to: Option<String>,
    order_id: Option<String>,
    amount: Option<f64>,
    #[serde(default)]
    payments: Vec<PaymentLine>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CancellationRequest {
    to: Option<String>,
    order_id: Option<String>,
    amount: Option<f64>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LowStockRequest {
    to: Option<String>,
    product_id: Option<i64>,
    product_name: Option<String>,
    current_stock: Option<i64>,
    threshold: Option<i64>,
}

fn required(value: Option<String>) -> Option<String> {
    value.map(|v| v.trim().to_string()).filter(|v| !v.is_empty())
}

fn parse<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, ApiError> {
    payload
        .map(|Json(body)| body)
        .map_err(|rejection| ApiError::Validation(rejection.body_text()))
}

async fn accept(
    state: &AppState,
    email: OutgoingEmail,
    message: &str,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let message_id = state.mailer.send(email).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(json!({ "message": message, "messageId": message_id })),
    ))
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/emails/payment/confirmation", post(payment_confirmation))
        .route("/emails/payment/cancellation", post(payment_cancellation))
        .route("/emails/stock/low", post(low_stock))
        .route("/health", get(health_check))
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
}

pub async fn payment_confirmation(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = parse(payload)?;
    let (Some(to), Some(order_id), Some(amount)) =
        (required(request.to), required(request.order_id), request.amount)
    else {
        return Err(ApiError::Validation("to, orderId and amount are required".into()));
    };
    if !amount.is_finite() {
        return Err(ApiError::Validation("amount must be a number".into()));
    }
    let email = state
        .templates
        .confirmation(&to, &order_id, amount, &request.payments)?;
    accept(&state, email, "confirmation email sent").await
}

pub async fn payment_cancellation(
    State(state): State<AppState>,
    payload: Result<Json<CancellationRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = parse(payload)?;
    let (Some(to), Some(order_id)) = (required(request.to), required(request.order_id)) else {
        return Err(ApiError::Validation("to and orderId are required".into()));
    };
    let email = state.templates.cancellation(&to, &order_id, request.amount)?;
    accept(&state, email, "cancellation email sent").await
}

pub async fn low_stock(
    State(state): State<AppState>,
    payload: Result<Json<LowStockRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<Value>), ApiError> {
    let request = parse(payload)?;
    let (Some(product_id), Some(product_name), Some(current_stock)) =
        (request.product_id, required(request.product_name), request.current_stock)
    else {
        return Err(ApiError::Validation(
            "productId, productName and currentStock are required".into(),
        ));
    };
    let alert = LowStock {
        to: request.to,
        product_id,
        product_name,
        current_stock,
        threshold: request.threshold,
    };
    let email = state.templates.low_stock(&alert)?;
    accept(&state, email, "low stock email sent").await
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
