use std::time::Instant;

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use serde::Serialize;
use tracing::{error, info, warn};

use crate::couriers::{CourierError, CreatedShipment, DeliveryInfo, ShipmentRequest};
use crate::engine::assignment::assign_delivery_person;
use crate::engine::projection::{apply_event, StatusEvent};
use crate::error::AppError;
use crate::models::courier::{Courier, CourierType};
use crate::models::order::{DispatchState, Order};
use crate::models::status::OrderStatus;
use crate::models::tracking::NewTrackingEntry;
use crate::notify::EventSource;
use crate::settings::DispatchSettings;
use crate::state::AppState;
use crate::store::{StoreError, MAX_CAS_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DispatchTrigger {
    /// Automatic, gated by `auto_create_courier_order`.
    PaymentConfirmed,
    /// Operator-initiated dispatch or retry.
    Operator,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    AutoDispatchDisabled,
    NoDefaultCourier,
    AlreadyDispatched,
    DispatchInProgress,
    OrderClosed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum DispatchOutcome {
    Skipped {
        reason: SkipReason,
    },
    Dispatched {
        courier_id: i64,
        tracking_id: String,
        delivery_person_id: Option<i64>,
    },
    Failed {
        courier_id: i64,
        error: String,
        retryable: bool,
    },
}

/// Hands a paid order to a courier: `NoCourier -> Dispatching -> Dispatched`
/// or `DispatchFailed`.
///
/// The claim on `Dispatching` is a compare-and-set, and an order that already
/// has a tracking id is never dispatched again, so repeated payment callbacks
/// and concurrent retries produce at most one vendor order. Vendor failures
/// are recorded on the order and returned as `Failed`; the order status is
/// left for an operator to sort out.
///
/// Dropping the future mid-call (a disconnected client) releases the claim as
/// a retryable failure, and a claim older than twice the vendor timeout is
/// taken over by the next attempt.
pub async fn dispatch_order(
    state: &AppState,
    order_id: i64,
    settings: &DispatchSettings,
    trigger: DispatchTrigger,
    courier_override: Option<i64>,
) -> Result<DispatchOutcome, AppError> {
    if trigger == DispatchTrigger::PaymentConfirmed && !settings.auto_create_courier_order {
        return Ok(skipped(SkipReason::AutoDispatchDisabled));
    }

    let Some(courier_id) = courier_override.or(settings.default_courier_id) else {
        warn!(order_id, "no courier selected for dispatch");
        return Ok(skipped(SkipReason::NoDefaultCourier));
    };

    let courier = state
        .couriers
        .get(&courier_id)
        .map(|entry| entry.value().clone())
        .ok_or_else(|| AppError::NotFound(format!("courier {courier_id} not found")))?;
    if !courier.is_active {
        return Err(AppError::BadRequest(format!("courier {courier_id} is inactive")));
    }

    let (order, since) = match claim(state, order_id)? {
        Claim::Claimed { order, since } => (order, since),
        Claim::Skip(reason) => {
            info!(order_id, reason = ?reason, "dispatch skipped");
            return Ok(skipped(reason));
        }
    };

    let guard = ClaimGuard::new(state, order_id, since);
    let result = create_vendor_order(state, &courier, &order).await;
    guard.disarm();

    match result {
        Ok(created) => complete(state, &courier, order_id, created),
        Err(err) => fail(state, &courier, order_id, err),
    }
}

fn skipped(reason: SkipReason) -> DispatchOutcome {
    DispatchOutcome::Skipped { reason }
}

enum Claim {
    Claimed { order: Order, since: DateTime<Utc> },
    Skip(SkipReason),
}

/// How long a `Dispatching` claim holds. The vendor call is cut off at
/// `vendor_timeout`, so a claim this old has no live owner.
fn claim_lifetime(state: &AppState) -> ChronoDuration {
    ChronoDuration::from_std(state.config.vendor_timeout * 2)
        .unwrap_or_else(|_| ChronoDuration::minutes(5))
}

fn claim(state: &AppState, order_id: i64) -> Result<Claim, AppError> {
    let lifetime = claim_lifetime(state);

    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = state
            .orders
            .get(order_id)
            .ok_or(AppError::OrderNotFound(order_id))?;

        if snapshot.courier_tracking_id.is_some() {
            return Ok(Claim::Skip(SkipReason::AlreadyDispatched));
        }
        if let DispatchState::Dispatching { since } = &snapshot.dispatch {
            if Utc::now() - *since < lifetime {
                return Ok(Claim::Skip(SkipReason::DispatchInProgress));
            }
            warn!(order_id, claimed_at = %since, "taking over abandoned dispatch claim");
        }
        if snapshot.status.is_terminal() {
            return Ok(Claim::Skip(SkipReason::OrderClosed));
        }

        let since = Utc::now();
        match state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.dispatch = DispatchState::Dispatching { since };
        }) {
            Ok(order) => return Ok(Claim::Claimed { order, since }),
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    Err(AppError::Conflict(format!("order {order_id} kept changing")))
}

/// Releases a claim whose dispatch future was dropped before the vendor
/// answered. The vendor may still have created the order, so the release is
/// logged loudly for an operator to reconcile before retrying.
struct ClaimGuard<'a> {
    state: &'a AppState,
    order_id: i64,
    since: DateTime<Utc>,
    armed: bool,
}

impl<'a> ClaimGuard<'a> {
    fn new(state: &'a AppState, order_id: i64, since: DateTime<Utc>) -> Self {
        Self {
            state,
            order_id,
            since,
            armed: true,
        }
    }

    fn disarm(mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard<'_> {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }

        let claimed = DispatchState::Dispatching { since: self.since };
        for _ in 0..MAX_CAS_ATTEMPTS {
            let Some(snapshot) = self.state.orders.get(self.order_id) else {
                return;
            };
            // Someone else took the claim over; it is theirs to settle.
            if snapshot.dispatch != claimed {
                return;
            }

            match self.state.orders.compare_and_set(self.order_id, snapshot.version, |order| {
                order.dispatch = DispatchState::DispatchFailed {
                    reason: "dispatch interrupted before the courier answered".to_string(),
                    retryable: true,
                };
            }) {
                Ok(_) => {
                    self.state
                        .metrics
                        .dispatch_total
                        .with_label_values(&["interrupted"])
                        .inc();
                    error!(
                        order_id = self.order_id,
                        "dispatch interrupted mid-call; courier may hold an orphan order"
                    );
                    return;
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(StoreError::NotFound(_)) => return,
            }
        }

        warn!(order_id = self.order_id, "could not release interrupted dispatch claim");
    }
}

async fn create_vendor_order(
    state: &AppState,
    courier: &Courier,
    order: &Order,
) -> Result<CreatedShipment, CourierError> {
    let adapter = state.adapters.get(courier.provider)?;
    let shipment = ShipmentRequest {
        order_id: order.id,
        recipient_name: order.shipping.recipient_name.clone(),
        recipient_phone: order.shipping.phone.clone(),
        recipient_address: order.shipping.address.clone(),
        recipient_city: order.shipping.city.clone(),
        recipient_zone: order.shipping.zone.clone(),
        amount_to_collect: order.amount_to_collect(),
        item_count: order.item_count,
        note: None,
    };

    let started = Instant::now();
    let result = match tokio::time::timeout(
        state.config.vendor_timeout,
        adapter.create_order(&shipment, &state.store_info(), &DeliveryInfo::default()),
    )
    .await
    {
        Ok(result) => result,
        Err(_) => Err(CourierError::VendorUnavailable(format!(
            "create_order timed out after {:?}",
            state.config.vendor_timeout
        ))),
    };

    state.metrics.observe_vendor_call(
        courier.provider.as_str(),
        "create_order",
        result.is_ok(),
        started.elapsed().as_secs_f64(),
    );
    result
}

fn complete(
    state: &AppState,
    courier: &Courier,
    order_id: i64,
    created: CreatedShipment,
) -> Result<DispatchOutcome, AppError> {
    let mut persisted = false;
    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = state
            .orders
            .get(order_id)
            .ok_or(AppError::OrderNotFound(order_id))?;

        match state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.courier_id = Some(courier.id);
            order.courier_tracking_id = Some(created.tracking_id.clone());
            order.courier_status = created.vendor_status.clone();
            order.dispatch = DispatchState::Dispatched;
        }) {
            Ok(_) => {
                persisted = true;
                break;
            }
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    if !persisted {
        error!(
            order_id,
            tracking_id = %created.tracking_id,
            "vendor order created but tracking id could not be stored"
        );
        return Err(AppError::Conflict(format!(
            "order {order_id} kept changing while storing tracking id {}",
            created.tracking_id
        )));
    }

    state.ledger.append(NewTrackingEntry {
        order_id,
        tracking_id: created.tracking_id.clone(),
        status: OrderStatus::Pending.to_string(),
        details: Some(format!(
            "{} order {} created",
            courier.name, created.vendor_order_id
        )),
        location: None,
        timestamp: Utc::now(),
    });

    apply_event(
        state,
        order_id,
        StatusEvent::local(OrderStatus::Processing, EventSource::Dispatch),
    )?;

    let delivery_person_id = if courier.courier_type == CourierType::Internal {
        match assign_delivery_person(state, order_id, None) {
            Ok(assignment) => Some(assignment.delivery_person_id),
            Err(err) => {
                warn!(order_id, error = %err, "internal dispatch without delivery person");
                None
            }
        }
    } else {
        None
    };

    state.metrics.dispatch_total.with_label_values(&["dispatched"]).inc();
    info!(
        order_id,
        courier_id = courier.id,
        tracking_id = %created.tracking_id,
        "order dispatched"
    );

    Ok(DispatchOutcome::Dispatched {
        courier_id: courier.id,
        tracking_id: created.tracking_id,
        delivery_person_id,
    })
}

fn fail(
    state: &AppState,
    courier: &Courier,
    order_id: i64,
    err: CourierError,
) -> Result<DispatchOutcome, AppError> {
    let retryable = err.is_retryable();
    let reason = err.to_string();

    for _ in 0..MAX_CAS_ATTEMPTS {
        let Some(snapshot) = state.orders.get(order_id) else {
            return Err(AppError::OrderNotFound(order_id));
        };

        match state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.dispatch = DispatchState::DispatchFailed {
                reason: reason.clone(),
                retryable,
            };
        }) {
            Ok(_) => break,
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    let outcome = if retryable { "failed_retryable" } else { "failed" };
    state.metrics.dispatch_total.with_label_values(&[outcome]).inc();

    match &err {
        CourierError::Auth(_) | CourierError::NotConfigured(_) => error!(
            order_id,
            provider = courier.provider.as_str(),
            error = %err,
            "courier credentials rejected; operator attention required"
        ),
        _ => error!(
            order_id,
            provider = courier.provider.as_str(),
            retryable,
            error = %err,
            "courier dispatch failed"
        ),
    }

    Ok(DispatchOutcome::Failed {
        courier_id: courier.id,
        error: reason,
        retryable,
    })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::couriers::internal::InternalCourier;
    use crate::couriers::mock::MockCourier;
    use crate::couriers::AdapterRegistry;
    use crate::engine::test_support::{seed_order, seed_person, state_with_registry};
    use crate::models::courier::CourierProvider;
    use crate::models::delivery_person::DeliveryPersonStatus;
    use crate::notify::RecordingNotifier;

    fn setup() -> (AppState, Arc<MockCourier>, DispatchSettings) {
        let mock = Arc::new(MockCourier::new(CourierProvider::Steadfast));
        let registry = AdapterRegistry::new()
            .with(mock.clone())
            .with(Arc::new(InternalCourier::new()));
        let state = state_with_registry(registry, Arc::new(RecordingNotifier::new()));
        let courier_id = state.courier_for(CourierProvider::Steadfast).unwrap().id;
        let settings = DispatchSettings {
            auto_create_courier_order: true,
            default_courier_id: Some(courier_id),
        };
        (state, mock, settings)
    }

    #[tokio::test]
    async fn successful_dispatch_persists_tracking_and_ledger() {
        let (state, mock, settings) = setup();
        let order = seed_order(&state, OrderStatus::Processing);

        let outcome = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();

        let expected_tracking = format!("MOCK-{}", order.id);
        assert!(matches!(
            &outcome,
            DispatchOutcome::Dispatched { tracking_id, .. } if *tracking_id == expected_tracking
        ));
        assert_eq!(mock.create_calls(), 1);

        let stored = state.orders.get(order.id).unwrap();
        assert_eq!(stored.courier_id, settings.default_courier_id);
        assert_eq!(stored.courier_tracking_id.as_deref(), Some(expected_tracking.as_str()));
        assert_eq!(stored.dispatch, DispatchState::Dispatched);
        assert_eq!(stored.status, OrderStatus::Processing);
        assert_eq!(state.orders.find_by_tracking_id(&expected_tracking), Some(order.id));

        let entries = state.ledger.list_for(order.id, &expected_tracking);
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].status, "pending");
    }

    #[tokio::test]
    async fn duplicate_payment_callback_dispatches_once() {
        let (state, mock, settings) = setup();
        let order = seed_order(&state, OrderStatus::Processing);

        dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();
        let second = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();

        assert_eq!(
            second,
            DispatchOutcome::Skipped {
                reason: SkipReason::AlreadyDispatched
            }
        );
        assert_eq!(mock.create_calls(), 1);
        assert_eq!(state.ledger.count_for(order.id), 1);
    }

    #[tokio::test]
    async fn concurrent_dispatches_create_one_vendor_order() {
        let (state, mock, settings) = setup();
        mock.set_create_delay(Duration::from_millis(50));
        let state = Arc::new(state);
        let order = seed_order(&state, OrderStatus::Processing);

        let a = {
            let (state, settings) = (state.clone(), settings.clone());
            tokio::spawn(async move {
                dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None).await
            })
        };
        let b = {
            let (state, settings) = (state.clone(), settings.clone());
            tokio::spawn(async move {
                dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None).await
            })
        };

        let outcomes = [a.await.unwrap().unwrap(), b.await.unwrap().unwrap()];
        let dispatched = outcomes
            .iter()
            .filter(|o| matches!(o, DispatchOutcome::Dispatched { .. }))
            .count();

        assert_eq!(dispatched, 1);
        assert_eq!(mock.create_calls(), 1);
    }

    #[tokio::test]
    async fn disabled_setting_skips_auto_dispatch_but_not_operator() {
        let (state, mock, mut settings) = setup();
        settings.auto_create_courier_order = false;
        let order = seed_order(&state, OrderStatus::Processing);

        let auto = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();
        assert_eq!(
            auto,
            DispatchOutcome::Skipped {
                reason: SkipReason::AutoDispatchDisabled
            }
        );
        assert_eq!(mock.create_calls(), 0);

        let manual = dispatch_order(&state, order.id, &settings, DispatchTrigger::Operator, None)
            .await
            .unwrap();
        assert!(matches!(manual, DispatchOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn vendor_rejection_is_recorded_and_left_for_operator() {
        let (state, mock, settings) = setup();
        mock.push_create_result(Err(CourierError::VendorRejected("unsupported zone".to_string())));
        let order = seed_order(&state, OrderStatus::Processing);

        let outcome = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Failed { retryable: false, .. }));
        let stored = state.orders.get(order.id).unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);
        assert!(stored.courier_tracking_id.is_none());
        assert!(matches!(
            stored.dispatch,
            DispatchState::DispatchFailed { retryable: false, .. }
        ));
        assert_eq!(state.ledger.count_for(order.id), 0);
    }

    #[tokio::test]
    async fn unavailable_vendor_can_be_retried() {
        let (state, mock, settings) = setup();
        mock.push_create_result(Err(CourierError::VendorUnavailable("503".to_string())));
        let order = seed_order(&state, OrderStatus::Processing);

        let first = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();
        assert!(matches!(first, DispatchOutcome::Failed { retryable: true, .. }));

        let retry = dispatch_order(&state, order.id, &settings, DispatchTrigger::Operator, None)
            .await
            .unwrap();
        assert!(matches!(retry, DispatchOutcome::Dispatched { .. }));
        assert_eq!(mock.create_calls(), 2);
    }

    #[tokio::test]
    async fn slow_vendor_times_out_as_unavailable() {
        let (state, mock, settings) = setup();
        mock.set_create_delay(state.config.vendor_timeout + Duration::from_millis(200));
        let order = seed_order(&state, OrderStatus::Processing);

        let outcome = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();

        assert!(matches!(outcome, DispatchOutcome::Failed { retryable: true, .. }));
    }

    #[tokio::test]
    async fn internal_dispatch_assigns_delivery_person() {
        let (state, _mock, _settings) = setup();
        let rider = seed_person(&state, 0, 4.7, DeliveryPersonStatus::Active);
        let internal = state.courier_for(CourierProvider::Internal).unwrap();
        let order = seed_order(&state, OrderStatus::Processing);

        let outcome = dispatch_order(
            &state,
            order.id,
            &DispatchSettings::default(),
            DispatchTrigger::Operator,
            Some(internal.id),
        )
        .await
        .unwrap();

        assert!(matches!(
            outcome,
            DispatchOutcome::Dispatched { delivery_person_id: Some(id), .. } if id == rider.id
        ));
        assert_eq!(
            state.orders.get(order.id).unwrap().delivery_person_id,
            Some(rider.id)
        );
    }

    #[tokio::test]
    async fn interrupted_dispatch_can_be_retried() {
        let (state, mock, settings) = setup();
        mock.set_create_delay(Duration::from_millis(300));
        let state = Arc::new(state);
        let order = seed_order(&state, OrderStatus::Processing);

        let in_flight = {
            let (state, settings) = (state.clone(), settings.clone());
            tokio::spawn(async move {
                dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None).await
            })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        in_flight.abort();
        assert!(in_flight.await.unwrap_err().is_cancelled());

        assert!(matches!(
            state.orders.get(order.id).unwrap().dispatch,
            DispatchState::DispatchFailed { retryable: true, .. }
        ));

        mock.set_create_delay(Duration::ZERO);
        let retry = dispatch_order(&state, order.id, &settings, DispatchTrigger::Operator, None)
            .await
            .unwrap();
        assert!(matches!(retry, DispatchOutcome::Dispatched { .. }));
    }

    #[tokio::test]
    async fn fresh_claim_blocks_but_stale_claim_is_taken_over() {
        let (state, mock, settings) = setup();
        let order = seed_order(&state, OrderStatus::Processing);
        let claim_at = |since: DateTime<Utc>| {
            let current = state.orders.get(order.id).unwrap();
            state
                .orders
                .compare_and_set(order.id, current.version, |o| {
                    o.dispatch = DispatchState::Dispatching { since };
                })
                .unwrap();
        };

        claim_at(Utc::now());
        let blocked = dispatch_order(&state, order.id, &settings, DispatchTrigger::Operator, None)
            .await
            .unwrap();
        assert_eq!(
            blocked,
            DispatchOutcome::Skipped {
                reason: SkipReason::DispatchInProgress
            }
        );
        assert_eq!(mock.create_calls(), 0);

        claim_at(Utc::now() - ChronoDuration::hours(1));
        let taken_over = dispatch_order(&state, order.id, &settings, DispatchTrigger::Operator, None)
            .await
            .unwrap();
        assert!(matches!(taken_over, DispatchOutcome::Dispatched { .. }));
        assert_eq!(mock.create_calls(), 1);
    }

    #[tokio::test]
    async fn missing_default_courier_skips() {
        let (state, mock, mut settings) = setup();
        settings.default_courier_id = None;
        let order = seed_order(&state, OrderStatus::Processing);

        let outcome = dispatch_order(&state, order.id, &settings, DispatchTrigger::PaymentConfirmed, None)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            DispatchOutcome::Skipped {
                reason: SkipReason::NoDefaultCourier
            }
        );
        assert_eq!(mock.create_calls(), 0);
    }
}
