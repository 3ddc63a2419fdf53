use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum DeliveryPersonStatus {
    Active,
    Inactive,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryPerson {
    pub id: i64,
    pub name: String,
    pub phone: String,
    pub status: DeliveryPersonStatus,
    pub current_orders: u32,
    pub total_orders: u32,
    pub rating: f64,
    pub updated_at: DateTime<Utc>,
}
