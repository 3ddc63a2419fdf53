use crate::models::assignment::ScoreBreakdown;
use crate::models::delivery_person::DeliveryPerson;

const LOAD_WEIGHT: f64 = 0.60;
const RATING_WEIGHT: f64 = 0.40;

pub fn compute_score(person: &DeliveryPerson) -> (f64, ScoreBreakdown) {
    let breakdown = ScoreBreakdown {
        load_score: load_score(person.current_orders),
        rating_score: rating_score(person.rating),
    };

    let score = weighted_score(&breakdown);
    (score, breakdown)
}

pub fn weighted_score(breakdown: &ScoreBreakdown) -> f64 {
    (breakdown.load_score * LOAD_WEIGHT) + (breakdown.rating_score * RATING_WEIGHT)
}

fn load_score(current_orders: u32) -> f64 {
    1.0 / (1.0 + current_orders as f64)
}

fn rating_score(rating: f64) -> f64 {
    (rating / 5.0).clamp(0.0, 1.0)
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::compute_score;
    use crate::models::delivery_person::{DeliveryPerson, DeliveryPersonStatus};

    fn person(id: i64, current_orders: u32, rating: f64) -> DeliveryPerson {
        DeliveryPerson {
            id,
            name: "rider".to_string(),
            phone: "01800000000".to_string(),
            status: DeliveryPersonStatus::Active,
            current_orders,
            total_orders: 10,
            rating,
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn idle_rider_beats_busy_rider_with_same_rating() {
        let (idle, _) = compute_score(&person(1, 0, 4.5));
        let (busy, _) = compute_score(&person(2, 3, 4.5));

        assert!(idle > busy);
    }

    #[test]
    fn rating_breaks_equal_load() {
        let (good, _) = compute_score(&person(1, 1, 4.9));
        let (poor, _) = compute_score(&person(2, 1, 2.0));

        assert!(good > poor);
    }

    #[test]
    fn out_of_range_rating_is_clamped() {
        let (_, breakdown) = compute_score(&person(1, 0, 9.0));
        assert_eq!(breakdown.rating_score, 1.0);

        let (_, breakdown) = compute_score(&person(1, 0, -1.0));
        assert_eq!(breakdown.rating_score, 0.0);
    }
}
