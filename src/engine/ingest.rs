use std::time::Instant;

use chrono::Utc;
use serde::Serialize;
use tracing::{error, warn};

use crate::couriers::{CourierError, CourierEvent};
use crate::engine::normalize::normalize;
use crate::engine::projection::{apply_event, StatusEvent, Transition};
use crate::error::AppError;
use crate::models::courier::CourierProvider;
use crate::models::status::OrderStatus;
use crate::models::tracking::{NewTrackingEntry, TrackingEntry};
use crate::notify::EventSource;
use crate::state::AppState;

#[derive(Debug, Clone, Serialize)]
pub struct IngestOutcome {
    pub order_id: i64,
    pub entry_id: i64,
    pub status: OrderStatus,
    /// `None` when the event never reached the projection (narrative-only,
    /// addressed to a superseded tracking id, or sent by another courier).
    pub transition: Option<Transition>,
}

#[derive(Debug, Clone, Serialize)]
pub struct RefreshResult {
    pub order_id: i64,
    pub status: OrderStatus,
    pub courier_status: Option<String>,
    pub entries: Vec<TrackingEntry>,
}

/// normalize -> append -> update. Webhooks, polling and staff reports all go
/// through here so the paths cannot drift apart.
///
/// `provider` names the vendor the event came from; an event from a vendor
/// other than the order's courier is recorded but never moves the status.
/// Staff reports pass `None`.
pub fn ingest_event(
    state: &AppState,
    event: CourierEvent,
    source: EventSource,
    provider: Option<CourierProvider>,
) -> Result<IngestOutcome, AppError> {
    let order_id = state
        .orders
        .find_by_tracking_id(&event.tracking_id)
        .or(event.order_id)
        .ok_or_else(|| AppError::TrackingNotFound(event.tracking_id.clone()))?;

    let order = state
        .orders
        .get(order_id)
        .ok_or(AppError::OrderNotFound(order_id))?;

    let is_current_tracking = order.courier_tracking_id.as_deref() == Some(event.tracking_id.as_str());
    let order_provider = order
        .courier_id
        .and_then(|id| state.couriers.get(&id).map(|courier| courier.provider));
    let from_order_courier = provider.is_none_or(|provider| order_provider == Some(provider));
    let raw_status = event
        .raw_status
        .as_deref()
        .map(str::trim)
        .filter(|raw| !raw.is_empty());

    let normalized = match raw_status {
        Some(raw) if !event.is_tracking_only => Some(normalize(raw, Some(&order.status))),
        _ => None,
    };

    let entry_id = state.ledger.append(NewTrackingEntry {
        order_id,
        tracking_id: event.tracking_id.clone(),
        status: normalized
            .as_ref()
            .map(ToString::to_string)
            .or_else(|| raw_status.map(str::to_string))
            .unwrap_or_else(|| order.status.to_string()),
        details: event.details.clone(),
        location: event.location.clone(),
        timestamp: event.timestamp.unwrap_or_else(Utc::now),
    });

    if !is_current_tracking {
        warn!(
            order_id,
            tracking_id = %event.tracking_id,
            "event for superseded tracking id recorded without status change"
        );
    }
    if !from_order_courier {
        warn!(
            order_id,
            tracking_id = %event.tracking_id,
            reported_by = ?provider,
            courier = ?order_provider,
            "event from another courier recorded without status change"
        );
    }

    let transition = match normalized {
        Some(status) if is_current_tracking && from_order_courier => Some(
            apply_event(
                state,
                order_id,
                StatusEvent {
                    status,
                    raw_status: raw_status.map(str::to_string),
                    source,
                    event_at: event.timestamp,
                },
            )?
            .transition,
        ),
        _ => None,
    };

    let status = state
        .orders
        .get(order_id)
        .map(|order| order.status)
        .unwrap_or(order.status);

    Ok(IngestOutcome {
        order_id,
        entry_id,
        status,
        transition,
    })
}

/// Admin-triggered poll of the order's courier.
pub async fn refresh_tracking(state: &AppState, order_id: i64) -> Result<RefreshResult, AppError> {
    let order = state
        .orders
        .get(order_id)
        .ok_or(AppError::OrderNotFound(order_id))?;

    let (Some(courier_id), Some(tracking_id)) = (order.courier_id, order.courier_tracking_id.clone())
    else {
        return Err(AppError::BadRequest(format!(
            "order {order_id} has not been dispatched to a courier"
        )));
    };

    let provider = state
        .couriers
        .get(&courier_id)
        .map(|courier| courier.provider)
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
    let adapter = state.adapters.get(provider)?;

    let started = Instant::now();
    let tracked = adapter.track_order(&tracking_id).await;
    state.metrics.observe_vendor_call(
        provider.as_str(),
        "track_order",
        tracked.is_ok(),
        started.elapsed().as_secs_f64(),
    );

    match tracked {
        Ok(snapshot) => {
            ingest_event(
                state,
                CourierEvent::from_snapshot(order_id, &tracking_id, snapshot),
                EventSource::Poll,
                Some(provider),
            )?;
        }
        Err(CourierError::Unsupported(_)) => {}
        Err(err) => {
            error!(
                order_id,
                tracking_id = %tracking_id,
                provider = provider.as_str(),
                error = %err,
                "tracking refresh failed"
            );
            return Err(err.into());
        }
    }

    let order = state
        .orders
        .get(order_id)
        .ok_or(AppError::OrderNotFound(order_id))?;

    Ok(RefreshResult {
        order_id,
        status: order.status,
        courier_status: order.courier_status,
        entries: state.ledger.list_for(order_id, &tracking_id),
    })
}
