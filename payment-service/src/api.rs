use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::response::Json;
use axum::routing::{get, post};
use axum::Router;
use serde_json::{json, Value};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::confirm::{ConfirmPayments, ConfirmationReceipt, PaymentConfirmation};
use crate::error::PaymentError;
use crate::gateway::PaymentMethod;
use crate::models::PaymentRecord;

#[derive(Clone)]
pub struct AppState {
    pub confirmation: Arc<PaymentConfirmation>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/payments/confirm", post(confirm_payment))
        .route("/payments/methods", get(list_methods))
        .route("/payments/order/:order_id", get(order_payments))
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

pub async fn confirm_payment(
    State(state): State<AppState>,
    payload: Result<Json<ConfirmPayments>, JsonRejection>,
) -> Result<Json<ConfirmationReceipt>, PaymentError> {
    let Json(request) = payload.map_err(|rejection| PaymentError::Validation(rejection.body_text()))?;
    Ok(Json(state.confirmation.confirm(request).await?))
}

pub async fn list_methods() -> Json<[PaymentMethod; 3]> {
    Json(PaymentMethod::ACCEPTED)
}

pub async fn order_payments(
    State(state): State<AppState>,
    Path(order_id): Path<String>,
) -> Result<Json<Vec<PaymentRecord>>, PaymentError> {
    let order_id: Uuid = order_id
        .parse()
        .map_err(|_| PaymentError::Validation(format!("invalid orderId '{order_id}'")))?;
    Ok(Json(state.confirmation.store().for_order(order_id).await?))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}
