//! Steadfast (Packzy) courier API.
//!
//! Calls authenticate with static `Api-Key`/`Secret-Key` headers. Webhooks
//! carry `Authorization: Bearer <api key>` and come in two flavours:
//! `delivery_status` (status change) and `tracking_update` (narrative only).

use std::time::Duration;

use async_trait::async_trait;
use axum::http::HeaderMap;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::debug;

use crate::config::SteadfastConfig;
use crate::couriers::{
    classify_failure, integer_field, parse_vendor_timestamp, secrets_match, string_field,
    CourierAdapter, CourierError, CourierEvent, CreatedShipment, DeliveryInfo, ShipmentRequest,
    StoreInfo, TrackingSnapshot, WebhookAck,
};
use crate::models::courier::CourierProvider;

pub struct SteadfastAdapter {
    client: Client,
    config: SteadfastConfig,
}

#[derive(Serialize)]
struct CreateOrderRequest<'a> {
    invoice: String,
    recipient_name: &'a str,
    recipient_phone: &'a str,
    recipient_address: String,
    cod_amount: f64,
    note: Option<&'a str>,
}

#[derive(Deserialize)]
struct CreateOrderResponse {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    consignment: Option<Consignment>,
}

#[derive(Deserialize)]
struct Consignment {
    consignment_id: Value,
    #[serde(default)]
    tracking_code: Option<String>,
    #[serde(default)]
    status: Option<String>,
}

#[derive(Deserialize)]
struct StatusResponse {
    #[serde(default)]
    status: Option<u16>,
    #[serde(default)]
    delivery_status: Option<String>,
    #[serde(default)]
    message: Option<String>,
}

impl SteadfastAdapter {
    pub fn new(config: SteadfastConfig, timeout: Duration) -> Result<Self, CourierError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| CourierError::NotConfigured(format!("steadfast http client: {err}")))?;

        Ok(Self { client, config })
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.config.base_url.trim_end_matches('/'), path)
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .header("Api-Key", &self.config.api_key)
            .header("Secret-Key", &self.config.secret_key)
    }

    async fn read_body<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CourierError> {
        let status = response.status();
        let body = response.text().await?;

        if !status.is_success() {
            return Err(classify_failure(status, &body));
        }

        serde_json::from_str(&body)
            .map_err(|err| CourierError::InvalidResponse(format!("steadfast: {err}")))
    }
}

/// Steadfast reports validation failures with HTTP 200 and a body-level status.
fn body_status_failure(status: Option<u16>, message: Option<String>) -> Option<CourierError> {
    let code = status?;
    if code == 200 {
        return None;
    }

    let message = message.unwrap_or_else(|| format!("status {code}"));
    Some(match code {
        401 | 403 => CourierError::Auth(message),
        404 => CourierError::NotFound(message),
        500..=599 => CourierError::VendorUnavailable(message),
        _ => CourierError::VendorRejected(message),
    })
}

#[async_trait]
impl CourierAdapter for SteadfastAdapter {
    fn provider(&self) -> CourierProvider {
        CourierProvider::Steadfast
    }

    async fn create_order(
        &self,
        shipment: &ShipmentRequest,
        _store: &StoreInfo,
        delivery: &DeliveryInfo,
    ) -> Result<CreatedShipment, CourierError> {
        let recipient_address = match &shipment.recipient_zone {
            Some(zone) => format!(
                "{}, {}, {}",
                shipment.recipient_address, zone, shipment.recipient_city
            ),
            None => format!("{}, {}", shipment.recipient_address, shipment.recipient_city),
        };

        let request = CreateOrderRequest {
            invoice: shipment.order_id.to_string(),
            recipient_name: &shipment.recipient_name,
            recipient_phone: &shipment.recipient_phone,
            recipient_address,
            cod_amount: shipment.amount_to_collect,
            note: delivery
                .instructions
                .as_deref()
                .or(shipment.note.as_deref()),
        };

        let response = self
            .authorized(self.client.post(self.url("create_order")))
            .json(&request)
            .send()
            .await?;

        let body: CreateOrderResponse = Self::read_body(response).await?;
        if let Some(err) = body_status_failure(body.status, body.message.clone()) {
            return Err(err);
        }

        let consignment = body.consignment.ok_or_else(|| {
            CourierError::InvalidResponse(
                body.message
                    .unwrap_or_else(|| "steadfast response without consignment".to_string()),
            )
        })?;

        let tracking_id = match &consignment.consignment_id {
            Value::Number(n) => n.to_string(),
            Value::String(s) if !s.is_empty() => s.clone(),
            _ => {
                return Err(CourierError::InvalidResponse(
                    "missing consignment_id".to_string(),
                ))
            }
        };
        debug!(tracking_id = %tracking_id, "steadfast consignment created");

        Ok(CreatedShipment {
            vendor_order_id: consignment
                .tracking_code
                .unwrap_or_else(|| tracking_id.clone()),
            tracking_id,
            vendor_status: consignment.status,
        })
    }

    async fn track_order(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError> {
        let response = self
            .authorized(
                self.client
                    .get(self.url(&format!("status_by_cid/{tracking_id}"))),
            )
            .send()
            .await?;

        let body: StatusResponse = Self::read_body(response).await?;
        if let Some(err) = body_status_failure(body.status, body.message.clone()) {
            return Err(err);
        }

        let raw_status = body
            .delivery_status
            .ok_or_else(|| CourierError::NotFound(tracking_id.to_string()))?;

        Ok(TrackingSnapshot {
            raw_status,
            raw_details: body.message,
            raw_location: None,
            timestamp: None,
        })
    }

    fn verify_webhook(&self, headers: &HeaderMap) -> Result<(), CourierError> {
        let token = headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Bearer "))
            .unwrap_or_default();

        if secrets_match(&self.config.api_key, token.trim()) {
            Ok(())
        } else {
            Err(CourierError::Unauthorized)
        }
    }

    fn parse_webhook_event(&self, payload: &Value) -> Option<CourierEvent> {
        let tracking_id = string_field(payload, &["consignment_id"])?;
        let notification = string_field(payload, &["notification_type"]).unwrap_or_default();
        let is_tracking_only = notification == "tracking_update";

        let raw_status = if is_tracking_only {
            None
        } else {
            string_field(payload, &["status", "delivery_status"])
        };

        if raw_status.is_none() && !is_tracking_only {
            return None;
        }

        Some(CourierEvent {
            order_id: integer_field(payload, &["invoice"]),
            tracking_id,
            raw_status,
            details: string_field(payload, &["tracking_message"]),
            location: None,
            timestamp: parse_vendor_timestamp(string_field(payload, &["updated_at"]).as_deref()),
            is_tracking_only,
        })
    }

    fn webhook_ack(&self) -> WebhookAck {
        WebhookAck {
            status: 200,
            headers: Vec::new(),
            body: json!({
                "status": "success",
                "message": "Webhook received successfully."
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use axum::http::HeaderValue;
    use serde_json::json;

    use super::*;

    fn adapter() -> SteadfastAdapter {
        SteadfastAdapter::new(
            SteadfastConfig {
                base_url: "http://127.0.0.1:9".to_string(),
                api_key: "api-key".to_string(),
                secret_key: "secret-key".to_string(),
            },
            Duration::from_secs(1),
        )
        .unwrap()
    }

    #[test]
    fn parses_delivery_status_notification() {
        let event = adapter()
            .parse_webhook_event(&json!({
                "notification_type": "delivery_status",
                "consignment_id": 12345,
                "invoice": "42",
                "cod_amount": 1500.00,
                "status": "Delivered",
                "delivery_charge": 100.00,
                "tracking_message": "Your package has been delivered successfully.",
                "updated_at": "2025-03-02 12:45:30"
            }))
            .unwrap();

        assert_eq!(event.tracking_id, "12345");
        assert_eq!(event.order_id, Some(42));
        assert_eq!(event.raw_status.as_deref(), Some("Delivered"));
        assert!(!event.is_tracking_only);
    }

    #[test]
    fn tracking_update_carries_no_status() {
        let event = adapter()
            .parse_webhook_event(&json!({
                "notification_type": "tracking_update",
                "consignment_id": 12345,
                "invoice": "INV-67890",
                "tracking_message": "Package arrived at the sorting center.",
                "updated_at": "2025-03-02 13:15:00"
            }))
            .unwrap();

        assert!(event.is_tracking_only);
        assert!(event.raw_status.is_none());
        assert_eq!(event.order_id, None);
        assert_eq!(
            event.details.as_deref(),
            Some("Package arrived at the sorting center.")
        );
    }

    #[test]
    fn status_notification_without_status_is_ignored() {
        assert!(adapter()
            .parse_webhook_event(&json!({
                "notification_type": "delivery_status",
                "consignment_id": 1
            }))
            .is_none());
    }

    #[test]
    fn verifies_bearer_token() {
        let steadfast = adapter();
        let mut headers = HeaderMap::new();
        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer wrong"),
        );
        assert!(steadfast.verify_webhook(&headers).is_err());

        headers.insert(
            axum::http::header::AUTHORIZATION,
            HeaderValue::from_static("Bearer api-key"),
        );
        assert!(steadfast.verify_webhook(&headers).is_ok());
        assert!(!steadfast.ack_unauthorized());
    }

    #[test]
    fn body_level_failures_are_classified() {
        assert!(body_status_failure(Some(200), None).is_none());
        assert!(matches!(
            body_status_failure(Some(400), Some("invalid phone".to_string())),
            Some(CourierError::VendorRejected(_))
        ));
        assert!(body_status_failure(None, None).is_none());
    }
}
