use chrono::Utc;
use tracing::{info, warn};

use crate::engine::scoring::compute_score;
use crate::error::AppError;
use crate::models::assignment::DeliveryAssignment;
use crate::models::delivery_person::{DeliveryPerson, DeliveryPersonStatus};
use crate::state::AppState;
use crate::store::{StoreError, MAX_CAS_ATTEMPTS};

/// Attaches internal delivery staff to an order.
///
/// With `preferred` set, that person must exist and be active; otherwise the
/// best-scoring active person wins (ties go to the lowest id). Re-assigning
/// releases the previous person's load and starts a fresh OTP cycle.
pub fn assign_delivery_person(
    state: &AppState,
    order_id: i64,
    preferred: Option<i64>,
) -> Result<DeliveryAssignment, AppError> {
    let (person, score, breakdown) = match preferred {
        Some(person_id) => {
            let person = state
                .delivery_persons
                .get(&person_id)
                .map(|entry| entry.value().clone())
                .ok_or_else(|| AppError::NotFound(format!("delivery person {person_id} not found")))?;
            if person.status != DeliveryPersonStatus::Active {
                return Err(AppError::BadRequest(format!(
                    "delivery person {person_id} is inactive"
                )));
            }
            let (score, breakdown) = compute_score(&person);
            (person, score, breakdown)
        }
        None => best_candidate(state).ok_or(AppError::NoAvailableStaff)?,
    };

    let mut previous = None;
    let mut assigned = false;
    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = state
            .orders
            .get(order_id)
            .ok_or(AppError::OrderNotFound(order_id))?;

        if snapshot.delivery_otp_verified {
            return Err(AppError::Conflict(format!(
                "order {order_id} delivery already confirmed"
            )));
        }

        match state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.delivery_person_id = Some(person.id);
            order.delivery_otp = None;
            order.delivery_otp_sent_at = None;
            order.delivery_otp_failed_attempts = 0;
        }) {
            Ok(_) => {
                previous = snapshot.delivery_person_id;
                assigned = true;
                break;
            }
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(StoreError::NotFound(id)) => return Err(AppError::OrderNotFound(id)),
        }
    }

    if !assigned {
        return Err(AppError::Conflict(format!("order {order_id} kept changing")));
    }

    if previous != Some(person.id) {
        if let Some(previous_id) = previous {
            release_delivery_person(state, previous_id);
        }

        if let Some(mut entry) = state.delivery_persons.get_mut(&person.id) {
            entry.current_orders = entry.current_orders.saturating_add(1);
            entry.total_orders = entry.total_orders.saturating_add(1);
            entry.updated_at = Utc::now();
        }
    }

    info!(
        order_id,
        delivery_person_id = person.id,
        score,
        "delivery person assigned"
    );

    Ok(DeliveryAssignment {
        order_id,
        delivery_person_id: person.id,
        score,
        score_breakdown: breakdown,
        assigned_at: Utc::now(),
    })
}

/// Drops one in-flight order from the person's load.
pub fn release_delivery_person(state: &AppState, person_id: i64) {
    match state.delivery_persons.get_mut(&person_id) {
        Some(mut entry) => {
            entry.current_orders = entry.current_orders.saturating_sub(1);
            entry.updated_at = Utc::now();
        }
        None => warn!(delivery_person_id = person_id, "released unknown delivery person"),
    }
}

fn best_candidate(
    state: &AppState,
) -> Option<(DeliveryPerson, f64, crate::models::assignment::ScoreBreakdown)> {
    let mut candidates: Vec<DeliveryPerson> = state
        .delivery_persons
        .iter()
        .filter(|entry| entry.value().status == DeliveryPersonStatus::Active)
        .map(|entry| entry.value().clone())
        .collect();
    candidates.sort_by_key(|person| person.id);

    candidates
        .into_iter()
        .map(|person| {
            let (score, breakdown) = compute_score(&person);
            (person, score, breakdown)
        })
        .fold(None, |best, candidate| match best {
            Some(current) if current.1 >= candidate.1 => Some(current),
            _ => Some(candidate),
        })
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::engine::test_support::{seed_order, seed_person, state_with_notifier};
    use crate::models::status::OrderStatus;
    use crate::notify::RecordingNotifier;

    #[test]
    fn picks_least_loaded_active_person() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let busy = seed_person(&state, 3, 4.8, DeliveryPersonStatus::Active);
        let idle = seed_person(&state, 0, 4.8, DeliveryPersonStatus::Active);
        seed_person(&state, 0, 5.0, DeliveryPersonStatus::Inactive);
        let order = seed_order(&state, OrderStatus::Processing);

        let assignment = assign_delivery_person(&state, order.id, None).unwrap();

        assert_eq!(assignment.delivery_person_id, idle.id);
        assert_eq!(
            state.orders.get(order.id).unwrap().delivery_person_id,
            Some(idle.id)
        );
        let idle_after = state.delivery_persons.get(&idle.id).unwrap().clone();
        assert_eq!(idle_after.current_orders, 1);
        assert_eq!(idle_after.total_orders, idle.total_orders + 1);
        assert_eq!(state.delivery_persons.get(&busy.id).unwrap().current_orders, 3);
    }

    #[test]
    fn ties_go_to_lowest_id() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let first = seed_person(&state, 1, 4.0, DeliveryPersonStatus::Active);
        seed_person(&state, 1, 4.0, DeliveryPersonStatus::Active);
        let order = seed_order(&state, OrderStatus::Processing);

        let assignment = assign_delivery_person(&state, order.id, None).unwrap();
        assert_eq!(assignment.delivery_person_id, first.id);
    }

    #[test]
    fn reassignment_moves_load() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        let a = seed_person(&state, 0, 4.0, DeliveryPersonStatus::Active);
        let b = seed_person(&state, 0, 4.0, DeliveryPersonStatus::Active);
        let order = seed_order(&state, OrderStatus::Processing);

        assign_delivery_person(&state, order.id, Some(a.id)).unwrap();
        assign_delivery_person(&state, order.id, Some(b.id)).unwrap();

        assert_eq!(state.delivery_persons.get(&a.id).unwrap().current_orders, 0);
        assert_eq!(state.delivery_persons.get(&b.id).unwrap().current_orders, 1);
    }

    #[test]
    fn no_active_staff_is_an_error() {
        let state = state_with_notifier(Arc::new(RecordingNotifier::new()));
        seed_person(&state, 0, 4.0, DeliveryPersonStatus::Inactive);
        let order = seed_order(&state, OrderStatus::Processing);

        assert!(matches!(
            assign_delivery_person(&state, order.id, None),
            Err(AppError::NoAvailableStaff)
        ));
    }
}
