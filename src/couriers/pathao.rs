//! Pathao merchant API.
//!
//! Requests authenticate with a short-lived bearer token obtained from the
//! `issue-token` endpoint; the token is cached until shortly before expiry and
//! dropped whenever the API answers 401. Webhooks carry the shared secret in
//! `X-PATHAO-Signature` and must be answered with 202 plus the integration
//! secret header, otherwise Pathao keeps redelivering.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::PathaoConfig;
use crate::couriers::{
    classify_failure, integer_field, parse_vendor_timestamp, secrets_match, string_field,
    CourierAdapter, CourierError, CourierEvent, CreatedShipment, DeliveryInfo, DeliveryType,
    ShipmentRequest, StoreInfo, TrackingSnapshot, WebhookAck,
};
use crate::models::courier::CourierProvider;

pub const SIGNATURE_HEADER: &str = "x-pathao-signature";
pub const ACK_HEADER: &str = "X-Pathao-Merchant-Webhook-Integration-Secret";

const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);
const ITEM_TYPE_PARCEL: u8 = 2;

/// Events that only add narrative to the ledger.
const TRACKING_ONLY_EVENTS: &[&str] = &["updated", "paid", "paid_return", "delivery_fee_updated"];

pub struct PathaoAdapter {
    client: Client,
    config: PathaoConfig,
    token: Mutex<Option<CachedToken>>,
}

struct CachedToken {
    access_token: String,
    expires_at: Instant,
}

#[derive(Serialize)]
struct IssueTokenRequest<'a> {
    client_id: &'a str,
    client_secret: &'a str,
    username: &'a str,
    password: &'a str,
    grant_type: &'static str,
}

#[derive(Deserialize)]
struct IssueTokenResponse {
    access_token: String,
    #[serde(default = "default_expiry")]
    expires_in: u64,
}

fn default_expiry() -> u64 {
    3600
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    store_id: i64,
    merchant_order_id: String,
    recipient_name: &'a str,
    recipient_phone: &'a str,
    recipient_address: &'a str,
    delivery_type: u8,
    item_type: u8,
    special_instruction: Option<&'a str>,
    item_quantity: u32,
    item_weight: f64,
    amount_to_collect: i64,
    item_description: Option<&'a str>,
}

#[derive(Deserialize)]
struct Envelope<T> {
    data: Option<T>,
    #[serde(default)]
    message: Option<String>,
}

#[derive(Deserialize)]
struct CreatedOrder {
    consignment_id: Value,
    #[serde(default)]
    merchant_order_id: Option<Value>,
    #[serde(default)]
    order_status: Option<String>,
}

#[derive(Deserialize)]
struct OrderInfo {
    #[serde(default)]
    order_status: Option<String>,
    #[serde(default)]
    order_status_slug: Option<String>,
    #[serde(default)]
    updated_at: Option<String>,
}

impl PathaoAdapter {
    pub fn new(config: PathaoConfig, timeout: Duration) -> Result<Self, CourierError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CourierError::NotConfigured(format!("pathao http client: {err}")))?;

        Ok(Self {
            client,
            config,
            token: Mutex::new(None),
        })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/aladdin/api/v1/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    async fn access_token(&self) -> Result<String, CourierError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref() {
            if token.expires_at > Instant::now() {
                return Ok(token.access_token.clone());
            }
        }

        let response = self
            .client
            .post(self.url("issue-token"))
            .json(&IssueTokenRequest {
                client_id: &self.config.client_id,
                client_secret: &self.config.client_secret,
                username: &self.config.username,
                password: &self.config.password,
                grant_type: "password",
            })
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(match classify_failure(status, &body) {
                CourierError::VendorRejected(msg) | CourierError::NotFound(msg) => {
                    CourierError::Auth(msg)
                }
                other => other,
            });
        }

        let issued: IssueTokenResponse = response.json().await?;
        let lifetime = Duration::from_secs(issued.expires_in).saturating_sub(TOKEN_REFRESH_MARGIN);
        debug!(expires_in = issued.expires_in, "pathao access token issued");

        *cached = Some(CachedToken {
            access_token: issued.access_token.clone(),
            expires_at: Instant::now() + lifetime,
        });

        Ok(issued.access_token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }

    async fn read_data<T: serde::de::DeserializeOwned>(
        &self,
        response: reqwest::Response,
    ) -> Result<T, CourierError> {
        let status = response.status();
        let body = response.text().await.map_err(CourierError::from)?;

        if !status.is_success() {
            if status == reqwest::StatusCode::UNAUTHORIZED {
                self.invalidate_token().await;
            }
            return Err(classify_failure(status, &body));
        }

        let envelope: Envelope<T> = serde_json::from_str(&body)
            .map_err(|err| CourierError::InvalidResponse(format!("pathao: {err}")))?;

        envelope.data.ok_or_else(|| {
            CourierError::InvalidResponse(
                envelope
                    .message
                    .unwrap_or_else(|| "pathao response without data".to_string()),
            )
        })
    }
}

#[async_trait]
impl CourierAdapter for PathaoAdapter {
    fn provider(&self) -> CourierProvider {
        CourierProvider::Pathao
    }

    async fn create_order(
        &self,
        shipment: &ShipmentRequest,
        _store: &StoreInfo,
        delivery: &DeliveryInfo,
    ) -> Result<CreatedShipment, CourierError> {
        let token = self.access_token().await?;
        let request = CreateOrderRequest {
            store_id: self.config.store_id,
            merchant_order_id: shipment.order_id.to_string(),
            recipient_name: &shipment.recipient_name,
            recipient_phone: &shipment.recipient_phone,
            recipient_address: &shipment.recipient_address,
            delivery_type: match delivery.delivery_type {
                DeliveryType::Normal => 48,
                DeliveryType::OnDemand => 12,
            },
            item_type: ITEM_TYPE_PARCEL,
            special_instruction: delivery.instructions.as_deref(),
            item_quantity: shipment.item_count.max(1),
            item_weight: delivery.item_weight_kg,
            amount_to_collect: shipment.amount_to_collect.round() as i64,
            item_description: shipment.note.as_deref(),
        };

        let response = self
            .client
            .post(self.url("orders"))
            .bearer_auth(token)
            .json(&request)
            .send()
            .await?;

        let created: CreatedOrder = self.read_data(response).await?;
        let tracking_id = value_to_string(&created.consignment_id)
            .ok_or_else(|| CourierError::InvalidResponse("missing consignment_id".to_string()))?;

        Ok(CreatedShipment {
            vendor_order_id: created
                .merchant_order_id
                .as_ref()
                .and_then(value_to_string)
                .unwrap_or_else(|| tracking_id.clone()),
            tracking_id,
            vendor_status: created.order_status,
        })
    }

    async fn track_order(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError> {
        let token = self.access_token().await?;
        let response = self
            .client
            .get(self.url(&format!("orders/{tracking_id}/info")))
            .bearer_auth(token)
            .send()
            .await?;

        let info: OrderInfo = self.read_data(response).await?;
        let raw_status = info
            .order_status_slug
            .or(info.order_status.clone())
            .unwrap_or_default();

        Ok(TrackingSnapshot {
            raw_status,
            raw_details: info.order_status,
            raw_location: None,
            timestamp: parse_vendor_timestamp(info.updated_at.as_deref()),
        })
    }

    fn verify_webhook(&self, headers: &HeaderMap) -> Result<(), CourierError> {
        let provided = headers
            .get(SIGNATURE_HEADER)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();

        if secrets_match(&self.config.webhook_secret, provided) {
            Ok(())
        } else {
            Err(CourierError::Unauthorized)
        }
    }

    fn parse_webhook_event(&self, payload: &Value) -> Option<CourierEvent> {
        let event = string_field(payload, &["event"])?;
        let status = event_status(&event);
        if status == "webhook_integration" {
            return None;
        }

        let Some(tracking_id) = string_field(payload, &["consignment_id"]) else {
            warn!(event = %event, "pathao webhook without consignment_id");
            return None;
        };

        let is_tracking_only = TRACKING_ONLY_EVENTS.contains(&status.as_str());
        let details = string_field(payload, &["reason", "failed_reason"])
            .map(|reason| format!("{status}: {reason}"))
            .or_else(|| Some(status.replace('_', " ")));

        Some(CourierEvent {
            order_id: integer_field(payload, &["merchant_order_id"]),
            tracking_id,
            raw_status: Some(status),
            details,
            location: None,
            timestamp: parse_vendor_timestamp(
                string_field(payload, &["updated_at", "timestamp"]).as_deref(),
            ),
            is_tracking_only,
        })
    }

    fn webhook_ack(&self) -> WebhookAck {
        WebhookAck {
            status: 202,
            headers: vec![(ACK_HEADER, self.config.webhook_ack_secret.clone())],
            body: json!({ "status": "accepted" }),
        }
    }

    fn ack_unauthorized(&self) -> bool {
        true
    }
}

/// `order.pickup-requested` becomes `pickup_requested`.
fn event_status(event: &str) -> String {
    event
        .trim()
        .strip_prefix("order.")
        .unwrap_or(event.trim())
        .replace(['-', '.'], "_")
        .to_ascii_lowercase()
}

fn value_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn adapter() -> PathaoAdapter {
        PathaoAdapter::new(
            PathaoConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                client_id: "id".to_string(),
                client_secret: "secret".to_string(),
                username: "merchant@example.com".to_string(),
                password: "pw".to_string(),
                store_id: 10,
                webhook_secret: "hook-secret".to_string(),
                webhook_ack_secret: "ack-secret".to_string(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn event_names_become_snake_case_statuses() {
        assert_eq!(event_status("order.pickup-requested"), "pickup_requested");
        assert_eq!(event_status("order.delivered"), "delivered");
        assert_eq!(event_status("order.in-transit"), "in_transit");
    }

    #[test]
    fn parses_status_webhook() {
        let event = adapter()
            .parse_webhook_event(&json!({
                "consignment_id": "DL121224VS8TTJ",
                "merchant_order_id": "42",
                "event": "order.delivered",
                "updated_at": "2024-12-21 16:03:49",
                "store_id": 10
            }))
            .unwrap();

        assert_eq!(event.order_id, Some(42));
        assert_eq!(event.tracking_id, "DL121224VS8TTJ");
        assert_eq!(event.raw_status.as_deref(), Some("delivered"));
        assert!(!event.is_tracking_only);
    }

    #[test]
    fn integration_probe_and_unknown_shapes_are_ignored() {
        let pathao = adapter();
        assert!(pathao
            .parse_webhook_event(&json!({ "event": "webhook_integration" }))
            .is_none());
        assert!(pathao.parse_webhook_event(&json!({ "foo": [1, 2] })).is_none());
        assert!(pathao.parse_webhook_event(&json!("just a string")).is_none());
    }

    #[test]
    fn info_updates_are_tracking_only() {
        let event = adapter()
            .parse_webhook_event(&json!({
                "consignment_id": "C1",
                "event": "order.updated",
                "reason": "recipient phone changed"
            }))
            .unwrap();

        assert!(event.is_tracking_only);
        assert_eq!(event.details.as_deref(), Some("updated: recipient phone changed"));
    }

    #[test]
    fn verifies_signature_header() {
        let pathao = adapter();
        let mut headers = HeaderMap::new();
        assert!(pathao.verify_webhook(&headers).is_err());

        headers.insert(SIGNATURE_HEADER, HeaderValue::from_static("hook-secret"));
        assert!(pathao.verify_webhook(&headers).is_ok());
    }

    #[test]
    fn ack_carries_integration_secret() {
        let ack = adapter().webhook_ack();
        assert_eq!(ack.status, 202);
        assert_eq!(ack.headers, vec![(ACK_HEADER, "ack-secret".to_string())]);
    }
}
