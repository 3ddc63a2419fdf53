use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub load_score: f64,
    pub rating_score: f64,
}

/// Internal delivery staff assigned to an order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryAssignment {
    pub order_id: i64,
    pub delivery_person_id: i64,
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
    pub assigned_at: DateTime<Utc>,
}
