use async_trait::async_trait;
use axum::http::HeaderMap;
use serde_json::{json, Value};
use uuid::Uuid;

use crate::couriers::{
    CourierAdapter, CourierError, CourierEvent, CreatedShipment, DeliveryInfo, ShipmentRequest,
    StoreInfo, TrackingSnapshot, WebhookAck,
};
use crate::models::courier::CourierProvider;

/// In-house delivery staff. Nothing crosses the network: the tracking id is
/// minted locally and progress arrives through staff status reports and OTP
/// confirmation instead of webhooks or polling.
#[derive(Debug, Default)]
pub struct InternalCourier;

impl InternalCourier {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl CourierAdapter for InternalCourier {
    fn provider(&self) -> CourierProvider {
        CourierProvider::Internal
    }

    async fn create_order(
        &self,
        shipment: &ShipmentRequest,
        _store: &StoreInfo,
        _delivery: &DeliveryInfo,
    ) -> Result<CreatedShipment, CourierError> {
        let suffix = Uuid::new_v4().simple().to_string();
        let tracking_id = format!("INT-{}-{}", shipment.order_id, &suffix[..8]);

        Ok(CreatedShipment {
            vendor_order_id: tracking_id.clone(),
            tracking_id,
            vendor_status: Some("pending".to_string()),
        })
    }

    async fn track_order(&self, _tracking_id: &str) -> Result<TrackingSnapshot, CourierError> {
        Err(CourierError::Unsupported("internal courier tracking"))
    }

    fn verify_webhook(&self, _headers: &HeaderMap) -> Result<(), CourierError> {
        Err(CourierError::Unauthorized)
    }

    fn parse_webhook_event(&self, _payload: &Value) -> Option<CourierEvent> {
        None
    }

    fn webhook_ack(&self) -> WebhookAck {
        WebhookAck {
            status: 200,
            headers: Vec::new(),
            body: json!({ "status": "ignored" }),
        }
    }
}
