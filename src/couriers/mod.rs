//! Courier vendor integrations.
//!
//! Every vendor implements [`CourierAdapter`]. Adapters only translate between
//! the vendor's wire contract and the canonical types below; they never touch
//! order state. The [`AdapterRegistry`] resolves an adapter by provider at
//! dispatch, refresh and webhook time.

pub mod internal;
pub mod mock;
pub mod pathao;
pub mod steadfast;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use axum::http::HeaderMap;
use chrono::{DateTime, NaiveDateTime, Utc};
use serde_json::Value;
use thiserror::Error;

use crate::config::Config;
use crate::models::courier::CourierProvider;

#[derive(Debug, Error)]
pub enum CourierError {
    #[error("vendor rejected the request: {0}")]
    VendorRejected(String),

    #[error("vendor unavailable: {0}")]
    VendorUnavailable(String),

    #[error("vendor authentication failed: {0}")]
    Auth(String),

    #[error("tracking id not recognised by vendor: {0}")]
    NotFound(String),

    #[error("webhook verification failed")]
    Unauthorized,

    #[error("courier provider not configured: {0}")]
    NotConfigured(String),

    #[error("operation not supported by {0}")]
    Unsupported(&'static str),

    #[error("unexpected vendor response: {0}")]
    InvalidResponse(String),
}

impl CourierError {
    /// Network failures, timeouts and vendor 5xx can be retried; everything else
    /// needs an operator.
    pub fn is_retryable(&self) -> bool {
        matches!(self, CourierError::VendorUnavailable(_))
    }
}

impl From<reqwest::Error> for CourierError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() || err.is_connect() || err.is_request() {
            CourierError::VendorUnavailable(err.to_string())
        } else if err.is_decode() {
            CourierError::InvalidResponse(err.to_string())
        } else {
            CourierError::VendorUnavailable(err.to_string())
        }
    }
}

/// Maps a non-success vendor response onto the adapter error taxonomy.
pub(crate) fn classify_failure(status: reqwest::StatusCode, body: &str) -> CourierError {
    let message = vendor_message(body);
    match status.as_u16() {
        401 | 403 => CourierError::Auth(message),
        404 => CourierError::NotFound(message),
        400 | 409 | 422 => CourierError::VendorRejected(message),
        408 | 429 | 500..=599 => CourierError::VendorUnavailable(format!("HTTP {status}: {message}")),
        _ => CourierError::InvalidResponse(format!("HTTP {status}: {message}")),
    }
}

fn vendor_message(body: &str) -> String {
    serde_json::from_str::<Value>(body)
        .ok()
        .and_then(|value| value.get("message").and_then(Value::as_str).map(str::to_string))
        .unwrap_or_else(|| body.chars().take(200).collect())
}

/// What the storefront knows about the parcel being handed over.
#[derive(Debug, Clone)]
pub struct ShipmentRequest {
    pub order_id: i64,
    pub recipient_name: String,
    pub recipient_phone: String,
    pub recipient_address: String,
    pub recipient_city: String,
    pub recipient_zone: Option<String>,
    pub amount_to_collect: f64,
    pub item_count: u32,
    pub note: Option<String>,
}

/// Pickup side of the shipment.
#[derive(Debug, Clone)]
pub struct StoreInfo {
    pub name: String,
    pub phone: String,
    pub address: String,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DeliveryType {
    Normal,
    OnDemand,
}

#[derive(Debug, Clone)]
pub struct DeliveryInfo {
    pub delivery_type: DeliveryType,
    pub item_weight_kg: f64,
    pub instructions: Option<String>,
}

impl Default for DeliveryInfo {
    fn default() -> Self {
        Self {
            delivery_type: DeliveryType::Normal,
            item_weight_kg: 0.5,
            instructions: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct CreatedShipment {
    pub tracking_id: String,
    pub vendor_order_id: String,
    pub vendor_status: Option<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct TrackingSnapshot {
    pub raw_status: String,
    pub raw_details: Option<String>,
    pub raw_location: Option<String>,
    /// Vendor-reported time; `None` when the vendor gave none.
    pub timestamp: Option<DateTime<Utc>>,
}

/// A vendor report translated into canonical shape.
#[derive(Debug, Clone, PartialEq)]
pub struct CourierEvent {
    pub order_id: Option<i64>,
    pub tracking_id: String,
    pub raw_status: Option<String>,
    pub details: Option<String>,
    pub location: Option<String>,
    pub timestamp: Option<DateTime<Utc>>,
    /// Narrative update: goes to the ledger, never to the order status.
    pub is_tracking_only: bool,
}

impl CourierEvent {
    pub fn from_snapshot(order_id: i64, tracking_id: &str, snapshot: TrackingSnapshot) -> Self {
        Self {
            order_id: Some(order_id),
            tracking_id: tracking_id.to_string(),
            raw_status: Some(snapshot.raw_status),
            details: snapshot.raw_details,
            location: snapshot.raw_location,
            timestamp: snapshot.timestamp,
            is_tracking_only: false,
        }
    }
}

/// Vendor-specific response to a webhook delivery.
#[derive(Debug, Clone)]
pub struct WebhookAck {
    pub status: u16,
    pub headers: Vec<(&'static str, String)>,
    pub body: Value,
}

#[async_trait]
pub trait CourierAdapter: Send + Sync {
    fn provider(&self) -> CourierProvider;

    async fn create_order(
        &self,
        shipment: &ShipmentRequest,
        store: &StoreInfo,
        delivery: &DeliveryInfo,
    ) -> Result<CreatedShipment, CourierError>;

    async fn track_order(&self, tracking_id: &str) -> Result<TrackingSnapshot, CourierError>;

    fn verify_webhook(&self, headers: &HeaderMap) -> Result<(), CourierError>;

    /// Never fails: `None` means the payload carries nothing worth recording.
    fn parse_webhook_event(&self, payload: &Value) -> Option<CourierEvent>;

    fn webhook_ack(&self) -> WebhookAck;

    /// Whether a request that fails verification still gets the success
    /// acknowledgement, for vendors that retry aggressively.
    fn ack_unauthorized(&self) -> bool {
        false
    }
}

#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<CourierProvider, Arc<dyn CourierAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers the internal courier plus every vendor with credentials present.
    pub fn from_config(config: &Config) -> Result<Self, CourierError> {
        let mut registry = Self::new();
        registry.register(Arc::new(internal::InternalCourier::new()));

        if let Some(pathao) = &config.pathao {
            registry.register(Arc::new(pathao::PathaoAdapter::new(
                pathao.clone(),
                config.vendor_timeout,
            )?));
        }

        if let Some(steadfast) = &config.steadfast {
            registry.register(Arc::new(steadfast::SteadfastAdapter::new(
                steadfast.clone(),
                config.vendor_timeout,
            )?));
        }

        Ok(registry)
    }

    pub fn register(&mut self, adapter: Arc<dyn CourierAdapter>) {
        self.adapters.insert(adapter.provider(), adapter);
    }

    pub fn with(mut self, adapter: Arc<dyn CourierAdapter>) -> Self {
        self.register(adapter);
        self
    }

    pub fn get(&self, provider: CourierProvider) -> Result<Arc<dyn CourierAdapter>, CourierError> {
        self.adapters
            .get(&provider)
            .cloned()
            .ok_or_else(|| CourierError::NotConfigured(provider.as_str().to_string()))
    }

    pub fn contains(&self, provider: CourierProvider) -> bool {
        self.adapters.contains_key(&provider)
    }
}

/// Vendor timestamps arrive as RFC 3339 or as naive `YYYY-MM-DD HH:MM:SS`
/// (read as UTC). Missing or unreadable values yield `None`; callers must not
/// substitute server time, since the result feeds the stale-event guard.
pub fn parse_vendor_timestamp(raw: Option<&str>) -> Option<DateTime<Utc>> {
    let raw = raw.map(str::trim).filter(|raw| !raw.is_empty())?;

    if let Ok(parsed) = DateTime::parse_from_rfc3339(raw) {
        return Some(parsed.with_timezone(&Utc));
    }

    ["%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
}

/// Byte comparison that does not short-circuit on the first difference.
pub fn secrets_match(expected: &str, provided: &str) -> bool {
    let expected = expected.as_bytes();
    let provided = provided.as_bytes();
    if expected.is_empty() || expected.len() != provided.len() {
        return false;
    }

    expected
        .iter()
        .zip(provided)
        .fold(0u8, |acc, (a, b)| acc | (a ^ b))
        == 0
}

pub(crate) fn string_field(payload: &Value, keys: &[&str]) -> Option<String> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::String(value) if !value.trim().is_empty() => Some(value.trim().to_string()),
        Value::Number(number) => Some(number.to_string()),
        _ => None,
    })
}

pub(crate) fn integer_field(payload: &Value, keys: &[&str]) -> Option<i64> {
    keys.iter().find_map(|key| match payload.get(*key)? {
        Value::Number(number) => number.as_i64(),
        Value::String(value) => value.trim().parse().ok(),
        _ => None,
    })
}
