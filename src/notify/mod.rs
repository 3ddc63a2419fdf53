//! Outbound customer/operator notifications.
//!
//! Delivery is fire-and-forget: callers hand the message to [`spawn_status_change`]
//! or [`spawn_delivery_otp`] and move on. Failures are logged and never feed
//! back into order state.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use thiserror::Error;
use tracing::{info, warn};

use crate::models::status::OrderStatus;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("notification channel unavailable: {0}")]
    Unavailable(String),
}

#[derive(Debug, Clone, Copy, Serialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    Payment,
    Dispatch,
    Webhook,
    Poll,
    Staff,
    Otp,
    Admin,
}

/// One applied transition of the order projection.
#[derive(Debug, Clone, Serialize)]
pub struct StatusChange {
    pub order_id: i64,
    pub from: OrderStatus,
    pub to: OrderStatus,
    pub raw_status: Option<String>,
    pub source: EventSource,
    pub at: DateTime<Utc>,
}

#[derive(Clone)]
pub struct OtpMessage {
    pub order_id: i64,
    pub recipient_name: String,
    pub phone: String,
    pub code: String,
}

impl std::fmt::Debug for OtpMessage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OtpMessage")
            .field("order_id", &self.order_id)
            .field("phone", &self.phone)
            .field("code", &"******")
            .finish()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn send_delivery_otp(&self, message: &OtpMessage) -> Result<(), NotifyError>;

    async fn order_status_changed(&self, change: &StatusChange) -> Result<(), NotifyError>;
}

/// Default channel: records the intent in the log. The code itself is never logged.
#[derive(Debug, Default)]
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn send_delivery_otp(&self, message: &OtpMessage) -> Result<(), NotifyError> {
        info!(order_id = message.order_id, phone = %message.phone, "delivery otp sent");
        Ok(())
    }

    async fn order_status_changed(&self, change: &StatusChange) -> Result<(), NotifyError> {
        info!(
            order_id = change.order_id,
            from = %change.from,
            to = %change.to,
            "order status notification"
        );
        Ok(())
    }
}

/// Keeps everything it is asked to send; for tests.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    otps: Mutex<Vec<OtpMessage>>,
    changes: Mutex<Vec<StatusChange>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn otps(&self) -> Vec<OtpMessage> {
        self.otps.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    pub fn changes(&self) -> Vec<StatusChange> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn changes_to(&self, status: &OrderStatus) -> usize {
        self.changes()
            .iter()
            .filter(|change| &change.to == status)
            .count()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send_delivery_otp(&self, message: &OtpMessage) -> Result<(), NotifyError> {
        self.otps
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.clone());
        Ok(())
    }

    async fn order_status_changed(&self, change: &StatusChange) -> Result<(), NotifyError> {
        self.changes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(change.clone());
        Ok(())
    }
}

pub fn spawn_status_change(notifier: Arc<dyn Notifier>, change: StatusChange) {
    tokio::spawn(async move {
        if let Err(err) = notifier.order_status_changed(&change).await {
            warn!(order_id = change.order_id, error = %err, "status notification failed");
        }
    });
}

pub fn spawn_delivery_otp(notifier: Arc<dyn Notifier>, message: OtpMessage) {
    tokio::spawn(async move {
        if let Err(err) = notifier.send_delivery_otp(&message).await {
            warn!(order_id = message.order_id, error = %err, "otp notification failed");
        }
    });
}
