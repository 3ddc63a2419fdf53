use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::AppError;
use crate::models::order::{Order, PaymentMethod, ShippingAddress};
use crate::models::status::OrderStatus;
use crate::models::tracking::TrackingEntry;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/orders", post(create_order))
        .route("/orders/:id", get(get_order))
        .route("/orders/:id/tracking", get(get_tracking))
}

#[derive(Deserialize)]
pub struct CreateOrderRequest {
    pub payment_method: PaymentMethod,
    pub total_amount: f64,
    pub item_count: u32,
    pub shipping: ShippingAddress,
}

#[derive(Serialize)]
pub struct TrackingResponse {
    pub order_id: i64,
    pub tracking_id: Option<String>,
    pub status: OrderStatus,
    pub courier_status: Option<String>,
    pub entries: Vec<TrackingEntry>,
}

/// Checkout hands a placed order over here; it starts out `pending` and
/// unpaid until the payment verdict arrives.
async fn create_order(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateOrderRequest>,
) -> Result<(StatusCode, Json<Order>), AppError> {
    if payload.shipping.recipient_name.trim().is_empty() {
        return Err(AppError::BadRequest("recipient name cannot be empty".to_string()));
    }
    if payload.shipping.phone.trim().is_empty() {
        return Err(AppError::BadRequest("recipient phone cannot be empty".to_string()));
    }
    if payload.shipping.address.trim().is_empty() {
        return Err(AppError::BadRequest("shipping address cannot be empty".to_string()));
    }
    if payload.item_count == 0 {
        return Err(AppError::BadRequest("item_count must be > 0".to_string()));
    }
    if !payload.total_amount.is_finite() || payload.total_amount < 0.0 {
        return Err(AppError::BadRequest("total_amount must be >= 0".to_string()));
    }

    let order = state.orders.insert_with(|id| {
        Order::new(
            id,
            payload.payment_method,
            payload.total_amount,
            payload.item_count,
            payload.shipping,
        )
    });
    info!(order_id = order.id, "order created");

    Ok((StatusCode::CREATED, Json(order)))
}

async fn get_order(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<Order>, AppError> {
    state
        .orders
        .get(id)
        .map(Json)
        .ok_or(AppError::OrderNotFound(id))
}

async fn get_tracking(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<TrackingResponse>, AppError> {
    let order = state.orders.get(id).ok_or(AppError::OrderNotFound(id))?;

    Ok(Json(TrackingResponse {
        order_id: order.id,
        entries: state.ledger.list_for_order(order.id),
        tracking_id: order.courier_tracking_id,
        status: order.status,
        courier_status: order.courier_status,
    }))
}
