//! HTTP adapter over [`OrderCoordinator`]. Handlers only translate between
//! JSON and the engine's operations.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::domain::aggregates::Order;
use crate::domain::value_objects::{BookingId, Money};
use crate::engine::coordinator::{CancelConfirmation, CreateOrderParams, OrderCoordinator, OrderResult, UpdateOrderParams};
use crate::engine::lines::LineRequest;
use crate::store::Store;
use crate::{ErrorKind, OrderError};

type Shared<S> = Arc<OrderCoordinator<S>>;

pub fn router<S: Store>(coordinator: Shared<S>) -> Router {
    Router::new()
        .route("/health", get(|| async { Json(serde_json::json!({"status": "healthy", "service": "order-engine"})) }))
        .route("/api/v1/users/:username/orders", get(list_orders::<S>).post(place_order::<S>))
        .route("/api/v1/users/:username/orders/:booking_id", get(order_detail::<S>).put(amend_order::<S>))
        .route("/api/v1/users/:username/orders/:booking_id/cancel", put(cancel_order::<S>))
        .route("/api/v1/admin/orders/:booking_id/confirm", put(confirm_order::<S>))
        .route("/api/v1/admin/income", get(total_income::<S>))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(coordinator)
}

impl IntoResponse for OrderError {
    fn into_response(self) -> Response {
        let (status, kind) = match self.kind() {
            ErrorKind::Validation => (StatusCode::BAD_REQUEST, "validation"),
            ErrorKind::NotFound => (StatusCode::NOT_FOUND, "not_found"),
            ErrorKind::InsufficientStock => (StatusCode::CONFLICT, "insufficient_stock"),
            ErrorKind::ExpiredPromotion => (StatusCode::UNPROCESSABLE_ENTITY, "expired_promotion"),
            ErrorKind::Unauthorized => (StatusCode::UNAUTHORIZED, "unauthorized"),
            ErrorKind::Persistence => (StatusCode::INTERNAL_SERVER_ERROR, "persistence"),
        };
        (status, Json(serde_json::json!({"error": kind, "message": self.to_string()}))).into_response()
    }
}

#[derive(Debug, Deserialize)]
pub struct PlaceOrderRequest {
    #[serde(default)]
    pub promotion_code: Option<String>,
    pub address: String,
    pub province: String,
    pub payment_method: String,
    #[serde(flatten)]
    pub lines: LineRequest,
}

#[derive(Debug, Deserialize)]
pub struct AmendOrderRequest {
    pub address: String,
    pub province: String,
    #[serde(flatten)]
    pub lines: LineRequest,
}

#[derive(Debug, Deserialize)]
pub struct IncomeParams {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct IncomeResponse {
    pub from: DateTime<Utc>,
    pub to: DateTime<Utc>,
    pub income: Money,
}

async fn place_order<S: Store>(
    State(c): State<Shared<S>>,
    Path(username): Path<String>,
    Json(r): Json<PlaceOrderRequest>,
) -> Result<(StatusCode, Json<OrderResult>), OrderError> {
    let params = CreateOrderParams {
        username,
        promotion_code: r.promotion_code,
        address: r.address,
        province: r.province,
        payment_method: r.payment_method,
        lines: r.lines,
    };
    Ok((StatusCode::CREATED, Json(c.create_order(params).await?)))
}

async fn list_orders<S: Store>(State(c): State<Shared<S>>, Path(username): Path<String>) -> Result<Json<Vec<Order>>, OrderError> {
    Ok(Json(c.orders_for_user(&username).await?))
}

async fn order_detail<S: Store>(
    State(c): State<Shared<S>>,
    Path((username, booking_id)): Path<(String, String)>,
) -> Result<Json<OrderResult>, OrderError> {
    Ok(Json(c.order_detail(&BookingId::from(booking_id), &username).await?))
}

async fn amend_order<S: Store>(
    State(c): State<Shared<S>>,
    Path((username, booking_id)): Path<(String, String)>,
    Json(r): Json<AmendOrderRequest>,
) -> Result<Json<OrderResult>, OrderError> {
    let params = UpdateOrderParams {
        username,
        booking_id: BookingId::from(booking_id),
        address: r.address,
        province: r.province,
        lines: r.lines,
    };
    Ok(Json(c.update_order(params).await?))
}

async fn cancel_order<S: Store>(
    State(c): State<Shared<S>>,
    Path((username, booking_id)): Path<(String, String)>,
) -> Result<Json<CancelConfirmation>, OrderError> {
    Ok(Json(c.cancel_order(&BookingId::from(booking_id), &username).await?))
}

async fn confirm_order<S: Store>(State(c): State<Shared<S>>, Path(booking_id): Path<String>) -> Result<Json<Order>, OrderError> {
    Ok(Json(c.confirm_order(&BookingId::from(booking_id)).await?))
}

async fn total_income<S: Store>(State(c): State<Shared<S>>, Query(p): Query<IncomeParams>) -> Result<Json<IncomeResponse>, OrderError> {
    let from = p.from.unwrap_or_default();
    let to = p.to.unwrap_or_else(Utc::now);
    let income = c.total_income(from, to).await?;
    Ok(Json(IncomeResponse { from, to, income }))
}
