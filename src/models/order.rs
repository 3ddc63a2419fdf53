use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::status::OrderStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentMethod {
    CashOnDelivery,
    Online,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Unpaid,
    Paid,
    Failed,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum DispatchState {
    NoCourier,
    /// Claimed at `since`; the claim lapses once the vendor call must have ended.
    Dispatching { since: DateTime<Utc> },
    Dispatched,
    DispatchFailed { reason: String, retryable: bool },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ShippingAddress {
    pub recipient_name: String,
    pub phone: String,
    pub address: String,
    pub city: String,
    #[serde(default)]
    pub zone: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: i64,
    pub status: OrderStatus,
    pub payment_method: PaymentMethod,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub item_count: u32,
    pub shipping: ShippingAddress,
    pub courier_id: Option<i64>,
    pub courier_tracking_id: Option<String>,
    pub courier_status: Option<String>,
    pub dispatch: DispatchState,
    pub delivery_person_id: Option<i64>,
    #[serde(skip_serializing)]
    pub delivery_otp: Option<String>,
    pub delivery_otp_sent_at: Option<DateTime<Utc>>,
    pub delivery_otp_verified: bool,
    #[serde(skip_serializing)]
    pub delivery_otp_failed_attempts: u32,
    pub last_event_at: Option<DateTime<Utc>>,
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Order {
    pub fn new(
        id: i64,
        payment_method: PaymentMethod,
        total_amount: f64,
        item_count: u32,
        shipping: ShippingAddress,
    ) -> Self {
        let now = Utc::now();
        Self {
            id,
            status: OrderStatus::Pending,
            payment_method,
            payment_status: PaymentStatus::Unpaid,
            total_amount,
            item_count,
            shipping,
            courier_id: None,
            courier_tracking_id: None,
            courier_status: None,
            dispatch: DispatchState::NoCourier,
            delivery_person_id: None,
            delivery_otp: None,
            delivery_otp_sent_at: None,
            delivery_otp_verified: false,
            delivery_otp_failed_attempts: 0,
            last_event_at: None,
            version: 0,
            created_at: now,
            updated_at: now,
        }
    }

    /// Amount the courier collects at the door.
    pub fn amount_to_collect(&self) -> f64 {
        match (&self.payment_method, &self.payment_status) {
            (PaymentMethod::CashOnDelivery, PaymentStatus::Unpaid) => self.total_amount,
            _ => 0.0,
        }
    }
}
