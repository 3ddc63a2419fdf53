use std::sync::Arc;

use axum::extract::State;
use axum::routing::post;
use axum::Json;
use axum::Router;

use crate::engine::payment::{confirm_payment, PaymentConfirmation, PaymentResult};
use crate::error::AppError;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/payments/confirmation", post(payment_confirmation))
}

async fn payment_confirmation(
    State(state): State<Arc<AppState>>,
    Json(payload): Json<PaymentConfirmation>,
) -> Result<Json<PaymentResult>, AppError> {
    confirm_payment(&state, payload).await.map(Json)
}
