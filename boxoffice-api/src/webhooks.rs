use axum::{extract::State, response::Response, routing::post, Json, Router};
use serde::Deserialize;

use crate::error::AppError;
use crate::payments::completion_response;
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PaymentWebhook {
    pub payment_intent_id: String,
    /// Provider event name, logged only. The gateway is asked for the status.
    #[serde(default, rename = "type")]
    pub event_type: Option<String>,
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/webhooks/payments", post(handle_payment_webhook))
}

/// POST /v1/webhooks/payments
/// Drives the same completion as `/v1/payments/complete`.
async fn handle_payment_webhook(
    State(state): State<AppState>,
    Json(payload): Json<PaymentWebhook>,
) -> Result<Response, AppError> {
    tracing::info!(
        "Received webhook: {} for intent {}",
        payload.event_type.as_deref().unwrap_or("unknown"),
        payload.payment_intent_id
    );

    let outcome = state.coordinator.handle_payment_result(&payload.payment_intent_id).await?;
    completion_response(outcome)
}
