use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;
use thiserror::Error;

use crate::couriers::CourierError;
use crate::engine::otp::OtpError;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("order {0} not found")]
    OrderNotFound(i64),

    #[error("no order for tracking id {0}")]
    TrackingNotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("conflict: {0}")]
    Conflict(String),

    #[error("unauthorized")]
    Unauthorized,

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("no delivery staff available")]
    NoAvailableStaff,

    #[error(transparent)]
    Courier(#[from] CourierError),

    #[error(transparent)]
    Otp(#[from] OtpError),

    #[error("internal error: {0}")]
    Internal(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = match &self {
            AppError::NotFound(_) | AppError::OrderNotFound(_) | AppError::TrackingNotFound(_) => {
                StatusCode::NOT_FOUND
            }
            AppError::BadRequest(_) => StatusCode::BAD_REQUEST,
            AppError::Conflict(_) => StatusCode::CONFLICT,
            AppError::Unauthorized => StatusCode::UNAUTHORIZED,
            AppError::Forbidden(_) => StatusCode::FORBIDDEN,
            AppError::NoAvailableStaff => StatusCode::SERVICE_UNAVAILABLE,
            AppError::Courier(err) => courier_status(err),
            AppError::Otp(err) => otp_status(err),
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let body = Json(json!({
            "error": self.to_string()
        }));

        (status, body).into_response()
    }
}

fn courier_status(err: &CourierError) -> StatusCode {
    match err {
        CourierError::VendorRejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        CourierError::NotFound(_) => StatusCode::NOT_FOUND,
        CourierError::Unauthorized => StatusCode::UNAUTHORIZED,
        CourierError::Unsupported(_) => StatusCode::BAD_REQUEST,
        CourierError::VendorUnavailable(_)
        | CourierError::Auth(_)
        | CourierError::NotConfigured(_)
        | CourierError::InvalidResponse(_) => StatusCode::BAD_GATEWAY,
    }
}

fn otp_status(err: &OtpError) -> StatusCode {
    match err {
        OtpError::OrderNotFound(_) | OtpError::NotFound => StatusCode::NOT_FOUND,
        OtpError::Mismatch => StatusCode::UNPROCESSABLE_ENTITY,
        OtpError::TooManyAttempts => StatusCode::TOO_MANY_REQUESTS,
        OtpError::NotInternalDelivery
        | OtpError::AlreadyVerified
        | OtpError::AlreadySent
        | OtpError::OrderClosed(_) => StatusCode::CONFLICT,
        OtpError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    }
}
