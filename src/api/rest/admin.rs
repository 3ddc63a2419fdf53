use std::collections::BTreeMap;
use std::sync::Arc;

use axum::extract::{Path, State};
use axum::routing::{get, patch, post, put};
use axum::Json;
use axum::Router;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::engine::assignment::assign_delivery_person;
use crate::engine::dispatch::{dispatch_order, DispatchOutcome, DispatchTrigger};
use crate::engine::ingest::{refresh_tracking, RefreshResult};
use crate::engine::projection::admin_override;
use crate::error::AppError;
use crate::models::assignment::DeliveryAssignment;
use crate::models::order::Order;
use crate::models::status::OrderStatus;
use crate::settings::{DispatchSettings, AUTO_CREATE_COURIER_ORDER, DEFAULT_COURIER_ID};
use crate::state::AppState;

/// Operator routes; `rest::router` wraps them in the admin-token check.
pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/admin/orders/:id/dispatch", post(dispatch))
        .route("/admin/orders/:id/status", patch(override_status))
        .route("/admin/orders/:id/delivery-person", put(assign))
        .route("/admin/settings", get(list_settings))
        .route("/admin/settings/:key", put(update_setting))
        .route("/orders/:id/refresh-tracking", post(refresh))
}

#[derive(Deserialize, Default)]
pub struct DispatchRequest {
    #[serde(default)]
    pub courier_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct OverrideStatusRequest {
    pub status: String,
    #[serde(default)]
    pub note: Option<String>,
}

#[derive(Deserialize)]
pub struct AssignRequest {
    #[serde(default)]
    pub delivery_person_id: Option<i64>,
}

#[derive(Deserialize)]
pub struct SettingRequest {
    pub value: String,
}

#[derive(Serialize)]
pub struct SettingsResponse {
    pub values: BTreeMap<String, String>,
    pub dispatch: DispatchSettings,
}

async fn dispatch(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    payload: Option<Json<DispatchRequest>>,
) -> Result<Json<DispatchOutcome>, AppError> {
    let request = payload.map(|Json(request)| request).unwrap_or_default();
    let settings = state.settings.dispatch_snapshot();

    dispatch_order(&state, id, &settings, DispatchTrigger::Operator, request.courier_id)
        .await
        .map(Json)
}

async fn override_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<OverrideStatusRequest>,
) -> Result<Json<Order>, AppError> {
    let raw = payload.status.trim();
    if raw.is_empty() {
        return Err(AppError::BadRequest("status cannot be empty".to_string()));
    }

    admin_override(&state, id, OrderStatus::parse(raw), payload.note).map(Json)
}

async fn assign(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<AssignRequest>,
) -> Result<Json<DeliveryAssignment>, AppError> {
    assign_delivery_person(&state, id, payload.delivery_person_id).map(Json)
}

async fn refresh(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<RefreshResult>, AppError> {
    refresh_tracking(&state, id).await.map(Json)
}

fn settings_response(state: &AppState) -> SettingsResponse {
    SettingsResponse {
        values: state.settings.all().into_iter().collect(),
        dispatch: state.settings.dispatch_snapshot(),
    }
}

async fn list_settings(State(state): State<Arc<AppState>>) -> Json<SettingsResponse> {
    Json(settings_response(&state))
}

async fn update_setting(
    State(state): State<Arc<AppState>>,
    Path(key): Path<String>,
    Json(payload): Json<SettingRequest>,
) -> Result<Json<SettingsResponse>, AppError> {
    let value = payload.value.trim();

    match key.as_str() {
        AUTO_CREATE_COURIER_ORDER => {
            if !matches!(
                value.to_ascii_lowercase().as_str(),
                "true" | "false" | "1" | "0" | "yes" | "no" | "on" | "off"
            ) {
                return Err(AppError::BadRequest(format!("{key} expects a boolean")));
            }
        }
        DEFAULT_COURIER_ID => {
            if value.is_empty() {
                state.settings.remove(DEFAULT_COURIER_ID);
                info!(key = %key, "setting cleared");
                return Ok(Json(settings_response(&state)));
            }
            let courier_id: i64 = value
                .parse()
                .map_err(|_| AppError::BadRequest(format!("{key} expects a courier id")))?;
            if !state.couriers.contains_key(&courier_id) {
                return Err(AppError::NotFound(format!("courier {courier_id} not found")));
            }
        }
        _ => {}
    }

    state.settings.set(&key, value);
    info!(key = %key, value, "setting updated");
    Ok(Json(settings_response(&state)))
}
