use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::{Path, State};
use axum::http::{HeaderMap, HeaderName, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::Json;
use axum::Router;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::couriers::{CourierAdapter, WebhookAck};
use crate::engine::ingest::ingest_event;
use crate::error::AppError;
use crate::models::courier::CourierProvider;
use crate::notify::EventSource;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/webhooks/:provider", post(receive_webhook))
}

/// Once the caller is verified the vendor always gets its normal
/// acknowledgement; anything that goes wrong afterwards is logged and counted
/// but never bounced back, since vendors retry non-2xx deliveries.
async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(provider): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Response, AppError> {
    let provider = CourierProvider::parse(&provider)
        .ok_or_else(|| AppError::NotFound(format!("unknown courier provider {provider}")))?;
    let adapter = state
        .adapters
        .get(provider)
        .map_err(|_| AppError::NotFound(format!("{} integration is not configured", provider.as_str())))?;

    let count = |outcome: &str| {
        state
            .metrics
            .webhook_events_total
            .with_label_values(&[provider.as_str(), outcome])
            .inc();
    };

    if let Err(err) = adapter.verify_webhook(&headers) {
        count("unauthorized");
        warn!(provider = provider.as_str(), error = %err, "webhook failed verification");
        if adapter.ack_unauthorized() {
            return Ok(ack(adapter.as_ref()));
        }
        return Err(AppError::Unauthorized);
    }

    let payload: Value = match serde_json::from_slice(&body) {
        Ok(payload) => payload,
        Err(err) => {
            count("malformed");
            warn!(provider = provider.as_str(), error = %err, "webhook body is not json");
            return Ok(ack(adapter.as_ref()));
        }
    };

    let Some(event) = adapter.parse_webhook_event(&payload) else {
        count("ignored");
        info!(provider = provider.as_str(), "webhook carried no tracking event");
        return Ok(ack(adapter.as_ref()));
    };

    let tracking_id = event.tracking_id.clone();
    match ingest_event(&state, event, EventSource::Webhook, Some(provider)) {
        Ok(outcome) => {
            count(if outcome.transition.is_some() { "applied" } else { "recorded" });
        }
        Err(AppError::TrackingNotFound(_)) => {
            count("unknown_tracking");
            warn!(provider = provider.as_str(), tracking_id = %tracking_id, "webhook for unknown tracking id");
        }
        Err(err) => {
            count("failed");
            error!(provider = provider.as_str(), tracking_id = %tracking_id, error = %err, "webhook processing failed");
        }
    }

    Ok(ack(adapter.as_ref()))
}

fn ack(adapter: &dyn CourierAdapter) -> Response {
    let WebhookAck {
        status,
        headers,
        body,
    } = adapter.webhook_ack();

    let mut response = (
        StatusCode::from_u16(status).unwrap_or(StatusCode::OK),
        Json(body),
    )
        .into_response();

    for (name, value) in headers {
        match (HeaderName::from_bytes(name.as_bytes()), HeaderValue::from_str(&value)) {
            (Ok(name), Ok(value)) => {
                response.headers_mut().insert(name, value);
            }
            _ => warn!(header = name, "skipping invalid ack header"),
        }
    }

    response
}
