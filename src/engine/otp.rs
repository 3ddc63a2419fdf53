//! Delivery confirmation codes for internally delivered orders.
//!
//! `NoOtp -> Sent -> Verified`. Only the most recently sent code verifies;
//! resending replaces it and resets the mismatch counter. The code leaves the
//! process only through the notification channel.

use std::collections::VecDeque;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use rand::rngs::OsRng;
use rand::Rng;
use serde::Serialize;
use thiserror::Error;
use tracing::info;

use crate::couriers::secrets_match;
use crate::engine::assignment::release_delivery_person;
use crate::engine::projection::{announce_applied, StatusEvent};
use crate::error::AppError;
use crate::models::order::Order;
use crate::models::status::OrderStatus;
use crate::models::tracking::NewTrackingEntry;
use crate::notify::{spawn_delivery_otp, EventSource, OtpMessage};
use crate::state::AppState;
use crate::store::{StoreError, MAX_CAS_ATTEMPTS};

pub const OTP_LENGTH: usize = 6;
const OTP_VERIFIED_STATUS: &str = "otp_verified";

#[derive(Debug, Error, PartialEq)]
pub enum OtpError {
    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("order has no internal delivery person")]
    NotInternalDelivery,

    #[error("delivery already verified")]
    AlreadyVerified,

    #[error("otp already sent; use resend")]
    AlreadySent,

    #[error("no otp has been issued for this order")]
    NotFound,

    #[error("otp does not match")]
    Mismatch,

    #[error("too many incorrect attempts; request a new code")]
    TooManyAttempts,

    #[error("order is {0}")]
    OrderClosed(String),

    #[error("order store: {0}")]
    Store(String),
}

pub trait OtpCodeSource: Send + Sync {
    fn next_code(&self) -> String;
}

/// Six independent uniform digits from the operating system CSPRNG.
#[derive(Debug, Default)]
pub struct RandomCodes;

impl OtpCodeSource for RandomCodes {
    fn next_code(&self) -> String {
        let mut rng = OsRng;
        (0..OTP_LENGTH)
            .map(|_| char::from(b'0' + rng.gen_range(0..10u8)))
            .collect()
    }
}

/// Hands out predetermined codes, then falls back to random ones.
#[derive(Debug, Default)]
pub struct SequenceCodes {
    codes: Mutex<VecDeque<String>>,
}

impl SequenceCodes {
    pub fn new<I, S>(codes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            codes: Mutex::new(codes.into_iter().map(Into::into).collect()),
        }
    }
}

impl OtpCodeSource for SequenceCodes {
    fn next_code(&self) -> String {
        self.codes
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front()
            .unwrap_or_else(|| RandomCodes.next_code())
    }
}

/// What read endpoints may reveal about an order's OTP. Never the code.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct OtpStatus {
    pub order_id: i64,
    pub issued: bool,
    pub sent_at: Option<DateTime<Utc>>,
    pub verified: bool,
    pub attempts_remaining: u32,
}

fn status_of(order: &Order, max_attempts: u32) -> OtpStatus {
    OtpStatus {
        order_id: order.id,
        issued: order.delivery_otp.is_some() || order.delivery_otp_verified,
        sent_at: order.delivery_otp_sent_at,
        verified: order.delivery_otp_verified,
        attempts_remaining: max_attempts.saturating_sub(order.delivery_otp_failed_attempts),
    }
}

fn load(state: &AppState, order_id: i64) -> Result<Order, OtpError> {
    let order = state
        .orders
        .get(order_id)
        .ok_or(OtpError::OrderNotFound(order_id))?;

    if order.delivery_person_id.is_none() {
        return Err(OtpError::NotInternalDelivery);
    }
    if order.delivery_otp_verified {
        return Err(OtpError::AlreadyVerified);
    }
    if order.status.is_terminal() {
        return Err(OtpError::OrderClosed(order.status.to_string()));
    }

    Ok(order)
}

fn store_error(err: StoreError) -> OtpError {
    match err {
        StoreError::NotFound(id) => OtpError::OrderNotFound(id),
        other => OtpError::Store(other.to_string()),
    }
}

/// First send. Fails once a code is outstanding; use [`resend`] then.
pub fn issue(state: &AppState, order_id: i64) -> Result<OtpStatus, AppError> {
    send_code(state, order_id, false)
}

/// Replaces any outstanding code with a fresh one.
pub fn resend(state: &AppState, order_id: i64) -> Result<OtpStatus, AppError> {
    send_code(state, order_id, true)
}

fn send_code(state: &AppState, order_id: i64, replace: bool) -> Result<OtpStatus, AppError> {
    let code = state.otp_codes.next_code();

    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = load(state, order_id)?;
        if !replace && snapshot.delivery_otp.is_some() {
            return Err(OtpError::AlreadySent.into());
        }

        let result = state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.delivery_otp = Some(code.clone());
            order.delivery_otp_sent_at = Some(Utc::now());
            order.delivery_otp_failed_attempts = 0;
        });

        match result {
            Ok(order) => {
                let event = if replace { "resent" } else { "issued" };
                state.metrics.otp_events_total.with_label_values(&[event]).inc();
                info!(order_id, event, "delivery otp generated");

                spawn_delivery_otp(
                    state.notifier.clone(),
                    OtpMessage {
                        order_id,
                        recipient_name: order.shipping.recipient_name.clone(),
                        phone: order.shipping.phone.clone(),
                        code,
                    },
                );

                return Ok(status_of(&order, state.config.otp_max_attempts));
            }
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(err) => return Err(store_error(err).into()),
        }
    }

    Err(OtpError::Store(format!("order {order_id} kept changing")).into())
}

/// Checks the submitted code against the latest one sent. On a match the
/// order is marked verified and moved to `delivered` in one write.
pub fn verify(state: &AppState, order_id: i64, submitted: &str) -> Result<Order, AppError> {
    let max_attempts = state.config.otp_max_attempts;
    let mut verified = None;

    for _ in 0..MAX_CAS_ATTEMPTS {
        let snapshot = load(state, order_id)?;
        let expected = snapshot.delivery_otp.clone().ok_or(OtpError::NotFound)?;

        if snapshot.delivery_otp_failed_attempts >= max_attempts {
            return Err(OtpError::TooManyAttempts.into());
        }

        if !secrets_match(&expected, submitted.trim()) {
            match state.orders.compare_and_set(order_id, snapshot.version, |order| {
                order.delivery_otp_failed_attempts += 1;
            }) {
                Ok(_) => {
                    state.metrics.otp_events_total.with_label_values(&["mismatch"]).inc();
                    info!(order_id, "delivery otp mismatch");
                    return Err(OtpError::Mismatch.into());
                }
                Err(StoreError::VersionConflict { .. }) => continue,
                Err(err) => return Err(store_error(err).into()),
            }
        }

        match state.orders.compare_and_set(order_id, snapshot.version, |order| {
            order.delivery_otp_verified = true;
            order.delivery_otp = None;
            order.status = OrderStatus::Delivered;
            order.courier_status = Some(OTP_VERIFIED_STATUS.to_string());
        }) {
            Ok(order) => {
                verified = Some((snapshot.status, order));
                break;
            }
            Err(StoreError::VersionConflict { .. }) => continue,
            Err(err) => return Err(store_error(err).into()),
        }
    }

    let (previous, order) = verified
        .ok_or_else(|| OtpError::Store(format!("order {order_id} kept changing")))?;
    state.metrics.otp_events_total.with_label_values(&["verified"]).inc();

    state.ledger.append(NewTrackingEntry {
        order_id,
        tracking_id: order
            .courier_tracking_id
            .clone()
            .unwrap_or_else(|| format!("ORDER-{order_id}")),
        status: OrderStatus::Delivered.to_string(),
        details: Some("delivery confirmed by OTP".to_string()),
        location: None,
        timestamp: Utc::now(),
    });

    announce_applied(
        state,
        order_id,
        previous,
        &StatusEvent {
            status: OrderStatus::Delivered,
            raw_status: Some(OTP_VERIFIED_STATUS.to_string()),
            source: EventSource::Otp,
            event_at: None,
        },
    );

    if let Some(person_id) = order.delivery_person_id {
        release_delivery_person(state, person_id);
    }

    Ok(order)
}

/// Read-only view; never exposes the code.
pub fn check_status(state: &AppState, order_id: i64) -> Result<OtpStatus, AppError> {
    let order = state
        .orders
        .get(order_id)
        .ok_or(OtpError::OrderNotFound(order_id))?;

    if order.delivery_person_id.is_none() {
        return Err(OtpError::NotInternalDelivery.into());
    }

    Ok(status_of(&order, state.config.otp_max_attempts))
}
