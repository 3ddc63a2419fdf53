use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, post};
use axum::Json;
use axum::Router;
use serde::Deserialize;

use crate::couriers::CourierEvent;
use crate::engine::ingest::{ingest_event, IngestOutcome};
use crate::engine::normalize::normalize;
use crate::engine::otp::{self, OtpStatus};
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::status::OrderStatus;
use crate::notify::EventSource;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/delivery/orders/:id/otp/send", post(send_otp))
        .route("/delivery/orders/:id/otp/resend", post(resend_otp))
        .route("/delivery/orders/:id/otp/verify", post(verify_otp))
        .route("/delivery/orders/:id/otp/status", get(otp_status))
        .route("/delivery/orders/:id/status", post(report_status))
}

#[derive(Deserialize)]
pub struct VerifyOtpRequest {
    pub otp: String,
}

#[derive(Deserialize)]
pub struct StatusReportRequest {
    pub status: String,
    pub delivery_person_id: i64,
    #[serde(default)]
    pub details: Option<String>,
    #[serde(default)]
    pub location: Option<String>,
}

async fn send_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<OtpStatus>, AppError> {
    otp::issue(&state, id).map(Json)
}

async fn resend_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<OtpStatus>, AppError> {
    otp::resend(&state, id).map(Json)
}

async fn verify_otp(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<VerifyOtpRequest>,
) -> Result<Json<Order>, AppError> {
    otp::verify(&state, id, &payload.otp).map(Json)
}

async fn otp_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<OtpStatus>, AppError> {
    otp::check_status(&state, id).map(Json)
}

/// Progress reported by the assigned rider. Delivery itself is only
/// confirmed through the customer's OTP, and cancellation goes through the
/// admin override.
async fn report_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<StatusReportRequest>,
) -> Result<Json<IngestOutcome>, AppError> {
    let order = state.orders.get(id).ok_or(AppError::OrderNotFound(id))?;

    let Some(assigned) = order.delivery_person_id else {
        return Err(AppError::Conflict(format!(
            "order {id} has no delivery person assigned"
        )));
    };
    let reporter = payload.delivery_person_id;
    if reporter != assigned {
        return Err(AppError::Forbidden(format!(
            "order {id} is not assigned to delivery person {reporter}"
        )));
    }
    let Some(tracking_id) = order.courier_tracking_id.clone() else {
        return Err(AppError::Conflict(format!("order {id} has not been dispatched")));
    };

    let raw = payload.status.trim();
    if raw.is_empty() {
        return Err(AppError::BadRequest("status cannot be empty".to_string()));
    }
    match normalize(raw, Some(&order.status)) {
        OrderStatus::Delivered => {
            return Err(AppError::Conflict(
                "delivery must be confirmed with the customer's OTP".to_string(),
            ));
        }
        OrderStatus::Cancelled => {
            return Err(AppError::Conflict(
                "cancellation requires an administrative override".to_string(),
            ));
        }
        _ => {}
    }

    let outcome = ingest_event(
        &state,
        CourierEvent {
            order_id: Some(id),
            tracking_id,
            raw_status: Some(raw.to_string()),
            details: payload.details,
            location: payload.location,
            timestamp: None,
            is_tracking_only: false,
        },
        EventSource::Staff,
        None,
    )?;

    Ok(Json(outcome))
}
