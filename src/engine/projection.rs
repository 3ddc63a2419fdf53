use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use crate::error::AppError;
use crate::models::order::Order;
use crate::models::status::OrderStatus;
use crate::models::tracking::NewTrackingEntry;
use crate::notify::{spawn_status_change, EventSource, StatusChange};
use crate::state::AppState;
use crate::store::{StoreError, MAX_CAS_ATTEMPTS};

/// A normalized status headed for the order projection.
#[derive(Debug, Clone)]
pub struct StatusEvent {
    pub status: OrderStatus,
    pub raw_status: Option<String>,
    pub source: EventSource,
    /// Vendor-reported event time; `None` for locally originated events.
    pub event_at: Option<DateTime<Utc>>,
}

impl StatusEvent {
    pub fn local(status: OrderStatus, source: EventSource) -> Self {
        Self {
            status,
            raw_status: None,
            source,
            event_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum Transition {
    Applied { from: OrderStatus, to: OrderStatus },
    /// Replay of the status the order already has.
    Unchanged,
    /// Delivered/cancelled only move through an administrative override.
    TerminalRetained,
    DowngradeRefused,
    /// A same-rank move older than the last applied vendor event.
    StaleEvent,
}

impl Transition {
    fn label(&self) -> &'static str {
        match self {
            Transition::Applied { .. } => "applied",
            Transition::Unchanged => "unchanged",
            Transition::TerminalRetained => "terminal_retained",
            Transition::DowngradeRefused => "downgrade_refused",
            Transition::StaleEvent => "stale",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOutcome {
    pub order: Order,
    pub transition: Transition,
}

fn decide(order: &Order, event: &StatusEvent) -> Transition {
    let current = &order.status;

    if &event.status == current {
        return Transition::Unchanged;
    }
    if current.is_terminal() {
        return Transition::TerminalRetained;
    }
    // Only lateral moves are time-ordered; a higher rank always lands.
    if event.status.rank() <= current.rank() {
        if let (Some(event_at), Some(last)) = (event.event_at, order.last_event_at) {
            if event_at < last {
                return Transition::StaleEvent;
            }
        }
    }
    if event.status.rank() < current.rank() {
        return Transition::DowngradeRefused;
    }

    Transition::Applied {
        from: current.clone(),
        to: event.status.clone(),
    }
}

/// Applies a courier/local event to `Order.status`.
///
/// The decision is taken against a snapshot and written with compare-and-set;
/// losing a version race re-reads and decides again. Only an `Applied`
/// transition emits notifications, so replays stay silent. The raw vendor
/// status and `updated_at` are refreshed on every call for audit.
pub fn apply_event(
    state: &AppState,
    order_id: i64,
    event: StatusEvent,
) -> Result<ApplyOutcome, AppError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = state
            .orders
            .get(order_id)
            .ok_or(AppError::OrderNotFound(order_id))?;

        let transition = decide(&snapshot, &event);
        let applied = matches!(transition, Transition::Applied { .. });

        let result = state
            .orders
            .compare_and_set(order_id, snapshot.version, |order| {
                if let Some(raw) = &event.raw_status {
                    order.courier_status = Some(raw.clone());
                }
                if applied {
                    order.status = event.status.clone();
                    if let Some(event_at) = event.event_at {
                        order.last_event_at = Some(
                            order
                                .last_event_at
                                .map_or(event_at, |last| last.max(event_at)),
                        );
                    }
                }
            });

        match result {
            Ok(order) => {
                if let Transition::Applied { from, .. } = &transition {
                    announce_applied(state, order_id, from.clone(), &event);
                } else {
                    state
                        .metrics
                        .status_transitions_total
                        .with_label_values(&[transition.label()])
                        .inc();
                    debug!(order_id, outcome = transition.label(), status = %event.status, "order status kept");
                }

                return Ok(ApplyOutcome { order, transition });
            }
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    Err(AppError::Conflict(format!(
        "order {order_id} kept changing; gave up after {MAX_CAS_ATTEMPTS} attempts"
    )))
}

/// Operator action: sets any status, terminal ones included, and records the
/// override in the ledger under the order's current tracking id.
pub fn admin_override(
    state: &AppState,
    order_id: i64,
    status: OrderStatus,
    note: Option<String>,
) -> Result<Order, AppError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = state
            .orders
            .get(order_id)
            .ok_or(AppError::OrderNotFound(order_id))?;

        let result = state
            .orders
            .compare_and_set(order_id, snapshot.version, |order| {
                order.status = status.clone();
            });

        match result {
            Ok(order) => {
                let tracking_id = order
                    .courier_tracking_id
                    .clone()
                    .unwrap_or_else(|| format!("ORDER-{order_id}"));
                state.ledger.append(NewTrackingEntry {
                    order_id,
                    tracking_id,
                    status: status.to_string(),
                    details: Some(match &note {
                        Some(note) => format!("administrative override: {note}"),
                        None => "administrative override".to_string(),
                    }),
                    location: None,
                    timestamp: Utc::now(),
                });

                info!(order_id, from = %snapshot.status, to = %status, "order status overridden");
                if snapshot.status != status {
                    let event = StatusEvent::local(status.clone(), EventSource::Admin);
                    publish(state, order_id, snapshot.status.clone(), status.clone(), &event);
                }

                return Ok(order);
            }
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    Err(AppError::Conflict(format!("order {order_id} kept changing")))
}

/// Metrics, log line and notifications for a transition already written to
/// the store. Callers that set the status inside their own compare-and-set
/// use this instead of [`apply_event`].
pub(crate) fn announce_applied(state: &AppState, order_id: i64, from: OrderStatus, event: &StatusEvent) {
    state
        .metrics
        .status_transitions_total
        .with_label_values(&["applied"])
        .inc();
    info!(order_id, from = %from, to = %event.status, source = ?event.source, "order status updated");
    publish(state, order_id, from, event.status.clone(), event);
}

fn publish(state: &AppState, order_id: i64, from: OrderStatus, to: OrderStatus, event: &StatusEvent) {
    let change = StatusChange {
        order_id,
        from,
        to,
        raw_status: event.raw_status.clone(),
        source: event.source,
        at: Utc::now(),
    };

    let _ = state.status_events_tx.send(change.clone());
    spawn_status_change(state.notifier.clone(), change);
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::Duration;

    use super::*;
    use crate::engine::test_support::{seed_order, state_with_notifier};
    use crate::notify::RecordingNotifier;

    fn webhook(status: OrderStatus, raw: &str) -> StatusEvent {
        StatusEvent {
            status,
            raw_status: Some(raw.to_string()),
            source: EventSource::Webhook,
            event_at: Some(Utc::now()),
        }
    }

    #[tokio::test]
    async fn applies_forward_transition_and_notifies_once() {
        let notifier = Arc::new(RecordingNotifier::new());
        let state = state_with_notifier(notifier.clone());
        let order = seed_order(&state, OrderStatus::Processing);

        let first = apply_event(&state, order.id, webhook(OrderStatus::Delivered, "delivered")).unwrap();
        let second = apply_event(&state, order.id, webhook(OrderStatus::Delivered, "delivered")).unwrap();

        assert!(matches!(first.transition, Transition::Applied { .. }));
        assert_eq!(second.transition, Transition::Unchanged);
        assert_eq!(second.order.status, OrderStatus::Delivered);
        assert!(second.order.version > first.order.version);

        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(notifier.changes_to(&OrderStatus::Delivered), 1);
    }

    #[tokio::test]
    async fn terminal_status_is_sticky_for_courier_events() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        for terminal in [OrderStatus::Delivered, OrderStatus::Cancelled] {
            let order = seed_order(&state, terminal.clone());
            for incoming in [
                OrderStatus::Processing,
                OrderStatus::Shipped,
                OrderStatus::Label("In Transit".to_string()),
            ] {
                let outcome = apply_event(&state, order.id, webhook(incoming, "x")).unwrap();
                assert_eq!(outcome.transition, Transition::TerminalRetained);
                assert_eq!(outcome.order.status, terminal);
            }
        }
    }

    #[tokio::test]
    async fn refuses_downgrade_from_in_transit() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let order = seed_order(&state, OrderStatus::Label("In Transit".to_string()));

        let outcome = apply_event(&state, order.id, webhook(OrderStatus::Processing, "pending")).unwrap();

        assert_eq!(outcome.transition, Transition::DowngradeRefused);
        assert_eq!(outcome.order.status, OrderStatus::Label("In Transit".to_string()));
        assert_eq!(outcome.order.courier_status.as_deref(), Some("pending"));
    }

    #[tokio::test]
    async fn older_vendor_events_do_not_overwrite_newer_ones() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let order = seed_order(&state, OrderStatus::Processing);
        let now = Utc::now();

        let newer = StatusEvent {
            event_at: Some(now),
            ..webhook(OrderStatus::Label("In Transit".to_string()), "in_transit")
        };
        let older = StatusEvent {
            event_at: Some(now - Duration::minutes(5)),
            ..webhook(OrderStatus::Label("Picked".to_string()), "picked")
        };

        apply_event(&state, order.id, newer).unwrap();
        let outcome = apply_event(&state, order.id, older).unwrap();

        assert_eq!(outcome.transition, Transition::StaleEvent);
        assert_eq!(outcome.order.status, OrderStatus::Label("In Transit".to_string()));
    }

    #[tokio::test]
    async fn terminal_event_lands_even_with_an_older_vendor_clock() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let now = Utc::now();

        for (terminal, raw) in [
            (OrderStatus::Delivered, "delivered"),
            (OrderStatus::Cancelled, "cancelled"),
        ] {
            let order = seed_order(&state, OrderStatus::Processing);
            let in_transit = StatusEvent {
                event_at: Some(now),
                ..webhook(OrderStatus::Label("In Transit".to_string()), "in_transit")
            };
            let closing = StatusEvent {
                event_at: Some(now - Duration::seconds(1)),
                ..webhook(terminal.clone(), raw)
            };

            apply_event(&state, order.id, in_transit).unwrap();
            let outcome = apply_event(&state, order.id, closing).unwrap();

            assert!(matches!(outcome.transition, Transition::Applied { .. }));
            assert_eq!(outcome.order.status, terminal);
            assert_eq!(outcome.order.last_event_at, Some(now));
        }
    }

    #[tokio::test]
    async fn events_without_vendor_time_leave_the_clock_alone() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let order = seed_order(&state, OrderStatus::Processing);
        let vendor_time = Utc::now() - Duration::hours(6);

        let untimed = StatusEvent {
            event_at: None,
            ..webhook(OrderStatus::Label("Picked".to_string()), "picked")
        };
        let timed = StatusEvent {
            event_at: Some(vendor_time),
            ..webhook(OrderStatus::Label("In Transit".to_string()), "in_transit")
        };

        let first = apply_event(&state, order.id, untimed).unwrap();
        assert_eq!(first.order.last_event_at, None);

        let second = apply_event(&state, order.id, timed).unwrap();
        assert!(matches!(second.transition, Transition::Applied { .. }));
        assert_eq!(second.order.last_event_at, Some(vendor_time));
    }

    #[tokio::test]
    async fn unknown_order_is_reported() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let err = apply_event(&state, 404, webhook(OrderStatus::Shipped, "shipped")).unwrap_err();
        assert!(matches!(err, AppError::OrderNotFound(404)));
    }

    #[tokio::test]
    async fn concurrent_duplicates_apply_exactly_once() {
        let notifier = Arc::new(RecordingNotifier::new());
        let state = Arc::new(state_with_notifier(notifier.clone()));
        let order = seed_order(&state, OrderStatus::Shipped);

        let mut handles = Vec::new();
        for _ in 0..16 {
            let state = state.clone();
            handles.push(tokio::spawn(async move {
                apply_event(&state, order.id, webhook(OrderStatus::Delivered, "delivered"))
                    .map(|outcome| outcome.transition)
            }));
        }

        let mut applied = 0;
        for handle in handles {
            if let Ok(Transition::Applied { .. }) = handle.await.unwrap() {
                applied += 1;
            }
        }

        assert_eq!(applied, 1);
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        assert_eq!(notifier.changes_to(&OrderStatus::Delivered), 1);
    }

    #[tokio::test]
    async fn admin_override_reopens_terminal_order() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let order = seed_order(&state, OrderStatus::Cancelled);

        let updated = admin_override(&state, order.id, OrderStatus::Processing, None).unwrap();

        assert_eq!(updated.status, OrderStatus::Processing);
        let entries = state.ledger.list_for_order(order.id);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].details.as_deref(), Some("administrative override"));
    }
}
