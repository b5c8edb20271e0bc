use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use boxoffice_booking::{CompletionOutcome, ReservationState};
use boxoffice_core::UserId;
use serde_json::json;
use tracing::info;

use crate::bookings::BookingResponse;
use crate::error::AppError;
use crate::reservations::{ReservationView, SessionRequest};
use crate::state::AppState;

/// Set by the identity provider in front of the API.
pub const USER_ID_HEADER: &str = "x-user-id";

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/payments/intent", post(create_payment_intent))
        .route("/v1/payments/complete", post(complete_payment))
}

fn user_id(headers: &HeaderMap) -> Result<UserId, AppError> {
    let raw = headers
        .get(USER_ID_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| AppError::AuthenticationError("Missing X-User-Id header".to_string()))?;
    Ok(UserId::parse(raw)?)
}

async fn create_payment_intent(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(req): Json<SessionRequest>,
) -> Result<Response, AppError> {
    let user_id = user_id(&headers)?;
    let (show_id, session_id) = req.parse()?;

    let reservation = state.coordinator.start_payment(&show_id, &session_id, user_id).await?;
    let view = ReservationView::from(reservation);

    Ok(Json(json!({
        "success": true,
        "paymentIntentId": view.payment_intent_id,
        "clientSecret": view.client_secret,
        "amount": view.total_amount,
        "currency": view.currency,
        "reservation": view,
    }))
    .into_response())
}

async fn complete_payment(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Response, AppError> {
    let (show_id, session_id) = req.parse()?;
    let outcome = state.coordinator.complete(&show_id, &session_id).await?;
    completion_response(outcome)
}

/// Maps a settled (or still pending) payment to the HTTP answer shared by
/// every completion endpoint.
pub(crate) fn completion_response(outcome: CompletionOutcome) -> Result<Response, AppError> {
    match outcome {
        CompletionOutcome::Confirmed(booking) => {
            info!(booking_id = %booking.booking_id, "Booking confirmed");
            Ok(Json(BookingResponse::from(booking)).into_response())
        }
        CompletionOutcome::Pending(status) => Ok((
            StatusCode::ACCEPTED,
            Json(json!({
                "success": true,
                "state": ReservationState::AwaitingPayment,
                "paymentStatus": status,
            })),
        )
            .into_response()),
        CompletionOutcome::Released => Err(AppError::PaymentFailed(
            "Payment was not completed, the seats have been released".to_string(),
        )),
    }
}
