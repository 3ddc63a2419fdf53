use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::engine::dispatch::{dispatch_order, DispatchOutcome, DispatchTrigger};
use crate::engine::projection::{apply_event, StatusEvent};
use crate::error::AppError;
use crate::models::order::{Order, PaymentStatus};
use crate::models::status::OrderStatus;
use crate::notify::EventSource;
use crate::state::AppState;
use crate::store::{StoreError, MAX_CAS_ATTEMPTS};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verdict {
    Valid,
    Invalid,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentConfirmation {
    pub order_id: i64,
    pub verdict: Verdict,
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResult {
    pub order: Order,
    pub dispatch: Option<DispatchOutcome>,
}

/// Entry point for the payment gateway's verdict. Gateways redeliver their
/// callbacks, so a repeated VALID is harmless: the dispatch guard turns it
/// into a skip.
pub async fn confirm_payment(
    state: &AppState,
    confirmation: PaymentConfirmation,
) -> Result<PaymentResult, AppError> {
    let order_id = confirmation.order_id;

    match confirmation.verdict {
        Verdict::Valid => {
            set_payment_status(state, order_id, PaymentStatus::Paid)?;
            apply_event(
                state,
                order_id,
                StatusEvent::local(OrderStatus::Processing, EventSource::Payment),
            )?;
            info!(order_id, "payment confirmed");

            let settings = state.settings.dispatch_snapshot();
            let outcome =
                dispatch_order(state, order_id, &settings, DispatchTrigger::PaymentConfirmed, None)
                    .await?;

            let order = state
                .orders
                .get(order_id)
                .ok_or(AppError::OrderNotFound(order_id))?;
            Ok(PaymentResult {
                order,
                dispatch: Some(outcome),
            })
        }
        Verdict::Invalid => {
            let current = state
                .orders
                .get(order_id)
                .ok_or(AppError::OrderNotFound(order_id))?;
            if current.payment_status == PaymentStatus::Paid {
                warn!(order_id, "invalid verdict for an order already paid; ignored");
                return Ok(PaymentResult {
                    order: current,
                    dispatch: None,
                });
            }

            let order = set_payment_status(state, order_id, PaymentStatus::Failed)?;
            warn!(order_id, "payment rejected by gateway");
            Ok(PaymentResult {
                order,
                dispatch: None,
            })
        }
    }
}

fn set_payment_status(
    state: &AppState,
    order_id: i64,
    payment_status: PaymentStatus,
) -> Result<Order, AppError> {
    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = state
            .orders
            .get(order_id)
            .ok_or(AppError::OrderNotFound(order_id))?;
        if snapshot.payment_status == payment_status {
            return Ok(snapshot);
        }

        match state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.payment_status = payment_status;
        }) {
            Ok(order) => return Ok(order),
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    Err(AppError::Conflict(format!("order {order_id} kept changing")))
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::couriers::mock::MockCourier;
    use crate::couriers::AdapterRegistry;
    use crate::engine::dispatch::SkipReason;
    use crate::engine::test_support::{seed_order, state_with_registry};
    use crate::models::courier::CourierProvider;
    use crate::notify::RecordingNotifier;
    use crate::settings::{AUTO_CREATE_COURIER_ORDER, DEFAULT_COURIER_ID};

    fn setup(auto_dispatch: bool) -> (AppState, Arc<MockCourier>) {
        let mock = Arc::new(MockCourier::new(CourierProvider::Pathao));
        let state = state_with_registry(
            AdapterRegistry::new().with(mock.clone()),
            Arc::new(RecordingNotifier::new()),
        );
        let courier = state.courier_for(CourierProvider::Pathao).unwrap();
        state.settings.set(AUTO_CREATE_COURIER_ORDER, auto_dispatch.to_string());
        state.settings.set(DEFAULT_COURIER_ID, courier.id.to_string());
        (state, mock)
    }

    #[tokio::test]
    async fn valid_payment_moves_to_processing_and_dispatches() {
        let (state, mock) = setup(true);
        let order = seed_order(&state, OrderStatus::Pending);

        let result = confirm_payment(
            &state,
            PaymentConfirmation {
                order_id: order.id,
                verdict: Verdict::Valid,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.order.status, OrderStatus::Processing);
        assert_eq!(result.order.payment_status, PaymentStatus::Paid);
        assert_eq!(result.order.amount_to_collect(), 0.0);
        assert!(matches!(result.dispatch, Some(DispatchOutcome::Dispatched { .. })));
        assert_eq!(mock.create_calls(), 1);
    }

    #[tokio::test]
    async fn repeated_callback_creates_one_vendor_order() {
        let (state, mock) = setup(true);
        let order = seed_order(&state, OrderStatus::Pending);
        let confirmation = PaymentConfirmation {
            order_id: order.id,
            verdict: Verdict::Valid,
        };

        confirm_payment(&state, confirmation.clone()).await.unwrap();
        let second = confirm_payment(&state, confirmation).await.unwrap();

        assert_eq!(
            second.dispatch,
            Some(DispatchOutcome::Skipped {
                reason: SkipReason::AlreadyDispatched
            })
        );
        assert_eq!(mock.create_calls(), 1);
    }

    #[tokio::test]
    async fn setting_change_applies_without_restart() {
        let (state, mock) = setup(false);
        let first = seed_order(&state, OrderStatus::Pending);
        let second = seed_order(&state, OrderStatus::Pending);

        let skipped = confirm_payment(
            &state,
            PaymentConfirmation {
                order_id: first.id,
                verdict: Verdict::Valid,
            },
        )
        .await
        .unwrap();
        assert_eq!(skipped.order.status, OrderStatus::Processing);
        assert_eq!(mock.create_calls(), 0);

        state.settings.set(AUTO_CREATE_COURIER_ORDER, "true");
        confirm_payment(
            &state,
            PaymentConfirmation {
                order_id: second.id,
                verdict: Verdict::Valid,
            },
        )
        .await
        .unwrap();
        assert_eq!(mock.create_calls(), 1);
    }

    #[tokio::test]
    async fn invalid_payment_marks_failure_without_dispatch() {
        let (state, mock) = setup(true);
        let order = seed_order(&state, OrderStatus::Pending);

        let result = confirm_payment(
            &state,
            PaymentConfirmation {
                order_id: order.id,
                verdict: Verdict::Invalid,
            },
        )
        .await
        .unwrap();

        assert_eq!(result.order.payment_status, PaymentStatus::Failed);
        assert_eq!(result.order.status, OrderStatus::Pending);
        assert!(result.dispatch.is_none());
        assert_eq!(mock.create_calls(), 0);
    }

    #[test]
    fn verdict_reads_uppercase() {
        let parsed: PaymentConfirmation =
            serde_json::from_str(r#"{"order_id": 7, "verdict": "VALID"}"#).unwrap();
        assert_eq!(parsed.verdict, Verdict::Valid);
    }
}
