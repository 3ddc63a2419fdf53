//! Scriptable courier adapter for testing.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{json, Value};

use crate::couriers::{
    integer_field, parse_vendor_timestamp, string_field, CourierAdapter, CourierError,
    CourierEvent, CreatedShipment, DeliveryInfo, ShipmentRequest, StoreInfo, TrackingSnapshot,
    WebhookAck,
};
use crate::models::courier::CourierProvider;

pub const MOCK_SECRET_HEADER: &str = "x-mock-secret";
pub const MOCK_SECRET: &str = "mock-secret";

/// Stands in for any provider. Webhook payloads use a flat shape:
/// `{"tracking_id", "status", "order_id", "details", "location", "timestamp", "tracking_only"}`.
pub struct MockCourier {
    provider: CourierProvider,
    create_calls: AtomicUsize,
    track_calls: AtomicUsize,
    create_results: Mutex<VecDeque<Result<CreatedShipment, CourierError>>>,
    track_results: Mutex<VecDeque<Result<TrackingSnapshot, CourierError>>>,
    create_delay: Mutex<Option<Duration>>,
    ack_unauthorized: bool,
}

impl MockCourier {
    pub fn new(provider: CourierProvider) -> Self {
        Self {
            provider,
            create_calls: AtomicUsize::new(0),
            track_calls: AtomicUsize::new(0),
            create_results: Mutex::new(VecDeque::new()),
            track_results: Mutex::new(VecDeque::new()),
            create_delay: Mutex::new(None),
            ack_unauthorized: false,
        }
    }

    pub fn acking_unauthorized(mut self) -> Self {
        self.ack_unauthorized = true;
        self
    }

    /// Queue the outcome of the next `create_order`; an empty queue succeeds
    /// with `MOCK-<order id>`.
    pub fn push_create_result(&self, result: Result<CreatedShipment, CourierError>) {
        self.create_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn push_track_result(&self, result: Result<TrackingSnapshot, CourierError>) {
        self.track_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(result);
    }

    pub fn set_create_delay(&self, delay: Duration) {
        *self.create_delay.lock().unwrap_or_else(PoisonError::into_inner) = Some(delay);
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    pub fn track_calls(&self) -> usize {
        self.track_calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl CourierAdapter for MockCourier {
    fn provider(&self) -> CourierProvider {
        self.provider
    }

    async fn create_order(
        &self,
        shipment: &ShipmentRequest,
        _store: &StoreInfo,
        _delivery: &DeliveryInfo,
    ) -> Result<CreatedShipment, CourierError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);

        let delay = *self.create_delay.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let scripted = self
            .create_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();

        scripted.unwrap_or_else(|| {
            Ok(CreatedShipment {
                tracking_id: format!("MOCK-{}", shipment.order_id),
                vendor_order_id: shipment.order_id.to_string(),
                vendor_status: Some("pending".to_string()),
            })
        })
    }

    async fn track_order(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError> {
        self.track_calls.fetch_add(1, Ordering::SeqCst);

        self.track_results
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| Err(CourierError::NotFound(tracking_id.to_string())))
    }

    fn verify_webhook(&self, headers: &HeaderMap) -> Result<(), CourierError> {
        match headers.get(MOCK_SECRET_HEADER).and_then(|v| v.to_str().ok()) {
            Some(MOCK_SECRET) => Ok(()),
            _ => Err(CourierError::Unauthorized),
        }
    }

    fn parse_webhook_event(&self, payload: &Value) -> Option<CourierEvent> {
        Some(CourierEvent {
            order_id: integer_field(payload, &["order_id"]),
            tracking_id: string_field(payload, &["tracking_id"])?,
            raw_status: string_field(payload, &["status"]),
            details: string_field(payload, &["details"]),
            location: string_field(payload, &["location"]),
            timestamp: parse_vendor_timestamp(string_field(payload, &["timestamp"]).as_deref()),
            is_tracking_only: payload
                .get("tracking_only")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        })
    }

    fn webhook_ack(&self) -> WebhookAck {
        WebhookAck {
            status: 200,
            headers: vec![("x-mock-ack", "ok".to_string())],
            body: json!({ "received": true }),
        }
    }

    fn ack_unauthorized(&self) -> bool {
        self.ack_unauthorized
    }
}
