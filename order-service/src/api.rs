use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::Json;
use axum::routing::{get, patch, post};
use axum::Router;
use serde::Deserialize;
use serde_json::{json, Value};
use shared::{OrderStatus, OrderView};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use uuid::Uuid;

use crate::error::OrderError;
use crate::saga::{OrderSaga, PlaceOrder};

#[derive(Clone)]
pub struct AppState {
    pub saga: Arc<OrderSaga>,
}

#[derive(Debug, Deserialize)]
pub struct StatusUpdate {
    pub status: Option<String>,
}

pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/orders", post(create_order).get(list_orders))
        .route("/orders/user/:user_id", get(list_user_orders))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/status", patch(update_status))
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

fn body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, OrderError> {
    payload
        .map(|Json(value)| value)
        .map_err(|rejection| OrderError::Validation(rejection.body_text()))
}

fn order_id(raw: &str) -> Result<Uuid, OrderError> {
    raw.parse()
        .map_err(|_| OrderError::Validation(format!("invalid order id '{raw}'")))
}

pub async fn create_order(
    State(state): State<AppState>,
    payload: Result<Json<PlaceOrder>, JsonRejection>,
) -> Result<(StatusCode, Json<OrderView>), OrderError> {
    let order = state.saga.place_order(body(payload)?).await?;
    Ok((StatusCode::CREATED, Json(order)))
}

pub async fn list_orders(State(state): State<AppState>) -> Result<Json<Vec<OrderView>>, OrderError> {
    Ok(Json(state.saga.store().list().await?))
}

pub async fn get_order(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<OrderView>, OrderError> {
    let id = order_id(&id)?;
    let order = state.saga.store().find(id).await?.ok_or(OrderError::NotFound(id))?;
    Ok(Json(order))
}

pub async fn list_user_orders(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<Vec<OrderView>>, OrderError> {
    let user_id: i64 = user_id
        .parse()
        .map_err(|_| OrderError::Validation(format!("invalid userId '{user_id}'")))?;
    Ok(Json(state.saga.store().list_for_user(user_id).await?))
}

pub async fn update_status(
    State(state): State<AppState>,
    Path(id): Path<String>,
    payload: Result<Json<StatusUpdate>, JsonRejection>,
) -> Result<Json<OrderView>, OrderError> {
    let id = order_id(&id)?;
    let status: OrderStatus = body(payload)?
        .status
        .ok_or_else(|| OrderError::Validation("status is required".into()))?
        .parse()?;
    let change = state.saga.apply_status(id, status).await?;
    Ok(Json(change.order))
}

pub async fn health_check() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{product, Fakes};
    use axum::body::Body;
    use axum::http::Request;
    use tower::ServiceExt;

    fn app(fakes: &Fakes) -> Router {
        create_router(AppState {
            saga: Arc::new(fakes.saga()),
        })
    }

    async fn send(app: Router, method: &str, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let request = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body.map_or_else(Body::empty, |b| Body::from(b.to_string())))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    #[tokio::test]
    async fn orders_are_created_and_listed() {
        let fakes = Fakes::new(vec![product(1, "Keyboard", 150.0, 10)]);
        let app = app(&fakes);

        let (status, created) = send(
            app.clone(),
            "POST",
            "/orders",
            Some(json!({ "userId": 1, "items": [{ "productId": 1, "quantity": 2 }], "payment": { "method": "PIX" } })),
        )
        .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["status"], "PENDING");
        assert_eq!(created["total"], 300.0);

        let id = created["id"].as_str().unwrap().to_string();
        let (status, found) = send(app.clone(), "GET", &format!("/orders/{id}"), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(found["id"], created["id"]);

        let (status, mine) = send(app.clone(), "GET", "/orders/user/1", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(mine.as_array().unwrap().len(), 1);

        let (status, _) = send(app, "GET", "/orders/user/abc", None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn malformed_bodies_are_bad_requests() {
        let fakes = Fakes::new(vec![]);
        let (status, body) = send(app(&fakes), "POST", "/orders", Some(json!({ "items": [] }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert!(body["message"].is_string());
    }

    #[tokio::test]
    async fn status_updates_follow_the_status_machine() {
        let fakes = Fakes::new(vec![product(1, "Keyboard", 150.0, 10)]);
        let app = app(&fakes);
        let (_, created) = send(
            app.clone(),
            "POST",
            "/orders",
            Some(json!({ "userId": 1, "items": [{ "productId": 1, "quantity": 1 }] })),
        )
        .await;
        let uri = format!("/orders/{}/status", created["id"].as_str().unwrap());

        let (status, _) = send(app.clone(), "PATCH", &uri, Some(json!({ "status": "SHIPPED" }))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, paid) = send(app.clone(), "PATCH", &uri, Some(json!({ "status": "PAID" }))).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(paid["status"], "PAID");

        let (status, _) = send(app.clone(), "PATCH", &uri, Some(json!({ "status": "CANCELLED" }))).await;
        assert_eq!(status, StatusCode::CONFLICT);

        let missing = format!("/orders/{}/status", Uuid::new_v4());
        let (status, _) = send(app, "PATCH", &missing, Some(json!({ "status": "PAID" }))).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn health_reports_ok() {
        let fakes = Fakes::new(vec![]);
        let (status, body) = send(app(&fakes), "GET", "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({ "status": "ok" }));
    }
}
