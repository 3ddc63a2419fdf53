pub mod admin;
pub mod couriers;
pub mod delivery;
pub mod orders;
pub mod payments;
pub mod webhooks;
pub mod ws;

use std::sync::Arc;

use axum::body::Body;
use axum::extract::State;
use axum::http::{Request, StatusCode};
use axum::middleware::{from_fn_with_state, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Json;
use axum::Router;
use serde::Serialize;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::warn;

use crate::couriers::secrets_match;
use crate::error::AppError;
use crate::state::AppState;

pub const ADMIN_TOKEN_HEADER: &str = "x-admin-token";

pub fn router(state: Arc<AppState>) -> Router {
    let admin = admin::router().route_layer(from_fn_with_state(state.clone(), require_admin));

    Router::new()
        .merge(orders::router())
        .merge(payments::router())
        .merge(webhooks::router())
        .merge(couriers::router())
        .merge(delivery::router())
        .merge(admin)
        .route("/health", get(health))
        .route("/metrics", get(metrics))
        .route("/ws", get(ws::ws_handler))
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    orders: usize,
    couriers: usize,
    delivery_persons: usize,
}

async fn health(State(state): State<Arc<AppState>>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        orders: state.orders.len(),
        couriers: state.couriers.len(),
        delivery_persons: state.delivery_persons.len(),
    })
}

async fn metrics(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    match state.metrics.encode() {
        Ok(body) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4; charset=utf-8")],
            body,
        )
            .into_response(),
        Err(err) => (StatusCode::INTERNAL_SERVER_ERROR, err).into_response(),
    }
}

/// Operator routes. With no `ADMIN_TOKEN` configured they are closed entirely.
async fn require_admin(
    State(state): State<Arc<AppState>>,
    req: Request<Body>,
    next: Next,
) -> Response {
    let Some(expected) = state.config.admin_token.as_deref() else {
        return AppError::Forbidden("admin api is disabled".to_string()).into_response();
    };

    let provided = req
        .headers()
        .get(ADMIN_TOKEN_HEADER)
        .and_then(|value| value.to_str().ok());

    match provided {
        Some(token) if secrets_match(expected, token) => next.run(req).await,
        _ => {
            warn!(path = %req.uri().path(), "admin request rejected");
            AppError::Unauthorized.into_response()
        }
    }
}
