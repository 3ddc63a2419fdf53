use std::sync::Arc;

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::routing::{patch, post};
use axum::Json;
use axum::Router;
use chrono::Utc;
use serde::Deserialize;

use crate::error::AppError;
use crate::models::courier::{Courier, CourierProvider};
use crate::models::delivery_person::{DeliveryPerson, DeliveryPersonStatus};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/couriers", post(create_courier).get(list_couriers))
        .route("/couriers/:id/status", patch(update_courier_status))
        .route(
            "/delivery-persons",
            post(create_delivery_person).get(list_delivery_persons),
        )
        .route(
            "/delivery-persons/:id/status",
            patch(update_delivery_person_status),
        )
}

#[derive(Deserialize)]
pub struct CreateCourierRequest {
    pub name: String,
    pub provider: String,
}

#[derive(Deserialize)]
pub struct UpdateCourierStatusRequest {
    pub is_active: bool,
}

#[derive(Deserialize)]
pub struct CreateDeliveryPersonRequest {
    pub name: String,
    pub phone: String,
    #[serde(default = "default_rating")]
    pub rating: f64,
}

fn default_rating() -> f64 {
    5.0
}

#[derive(Deserialize)]
pub struct UpdateDeliveryPersonStatusRequest {
    pub status: DeliveryPersonStatus,
}

async fn create_courier(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateCourierRequest>,
) -> Result<(StatusCode, Json<Courier>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }

    let provider = CourierProvider::parse(&payload.provider).ok_or_else(|| {
        AppError::BadRequest(format!("unknown courier provider {}", payload.provider))
    })?;
    if !state.adapters.contains(provider) {
        return Err(AppError::BadRequest(format!(
            "{} integration is not configured",
            provider.as_str()
        )));
    }

    let courier = Courier {
        id: state.courier_ids.next(),
        name: payload.name.trim().to_string(),
        provider,
        courier_type: provider.courier_type(),
        is_active: true,
        updated_at: Utc::now(),
    };

    state.couriers.insert(courier.id, courier.clone());
    Ok((StatusCode::CREATED, Json(courier)))
}

async fn list_couriers(State(state): State<Arc<AppState>>) -> Json<Vec<Courier>> {
    let mut couriers: Vec<Courier> = state
        .couriers
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    couriers.sort_by_key(|courier| courier.id);
    Json(couriers)
}

async fn update_courier_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateCourierStatusRequest>,
) -> Result<Json<Courier>, AppError> {
    let mut courier = state
        .couriers
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("courier {id} not found")))?;

    courier.is_active = payload.is_active;
    courier.updated_at = Utc::now();

    Ok(Json(courier.clone()))
}

async fn create_delivery_person(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<CreateDeliveryPersonRequest>,
) -> Result<(StatusCode, Json<DeliveryPerson>), AppError> {
    if payload.name.trim().is_empty() {
        return Err(AppError::BadRequest("name cannot be empty".to_string()));
    }
    if payload.phone.trim().is_empty() {
        return Err(AppError::BadRequest("phone cannot be empty".to_string()));
    }

    let person = DeliveryPerson {
        id: state.delivery_person_ids.next(),
        name: payload.name.trim().to_string(),
        phone: payload.phone.trim().to_string(),
        status: DeliveryPersonStatus::Active,
        current_orders: 0,
        total_orders: 0,
        rating: payload.rating.clamp(0.0, 5.0),
        updated_at: Utc::now(),
    };

    state.delivery_persons.insert(person.id, person.clone());
    Ok((StatusCode::CREATED, Json(person)))
}

async fn list_delivery_persons(State(state): State<Arc<AppState>>) -> Json<Vec<DeliveryPerson>> {
    let mut persons: Vec<DeliveryPerson> = state
        .delivery_persons
        .iter()
        .map(|entry| entry.value().clone())
        .collect();
    persons.sort_by_key(|person| person.id);
    Json(persons)
}

async fn update_delivery_person_status(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(payload): Json<UpdateDeliveryPersonStatusRequest>,
) -> Result<Json<DeliveryPerson>, AppError> {
    let mut person = state
        .delivery_persons
        .get_mut(&id)
        .ok_or_else(|| AppError::NotFound(format!("delivery person {id} not found")))?;

    person.status = payload.status;
    person.updated_at = Utc::now();

    Ok(Json(person.clone()))
}
