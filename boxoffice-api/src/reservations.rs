use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use boxoffice_booking::{Reservation, ReservationState, ReservedSeat};
use boxoffice_core::{PaymentStatus, SessionId, ShowId};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

/// Client view of a reservation. The user id stays server-side.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ReservationView {
    pub reservation_id: Uuid,
    pub show_id: ShowId,
    pub session_id: SessionId,
    pub state: ReservationState,
    pub seats: Vec<ReservedSeat>,
    pub total_amount: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
    pub payment_intent_id: Option<String>,
    pub client_secret: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub booking_id: Option<Uuid>,
}

impl From<Reservation> for ReservationView {
    fn from(r: Reservation) -> Self {
        Self {
            reservation_id: r.id,
            show_id: r.show_id,
            session_id: r.session_id,
            state: r.state,
            seats: r.seats,
            total_amount: r.total_amount,
            currency: r.currency,
            expires_at: r.expires_at,
            payment_intent_id: r.payment_intent_id,
            client_secret: r.client_secret,
            payment_status: r.payment_status,
            booking_id: r.booking.map(|b| b.booking_id),
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ReservationResponse {
    pub success: bool,
    pub reservation: ReservationView,
}

impl From<Reservation> for ReservationResponse {
    fn from(r: Reservation) -> Self {
        Self { success: true, reservation: r.into() }
    }
}

/// Body shared by the session-scoped endpoints.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionRequest {
    pub show_id: String,
    pub session_id: String,
}

impl SessionRequest {
    pub fn parse(&self) -> Result<(ShowId, SessionId), AppError> {
        Ok((ShowId::parse(&self.show_id)?, SessionId::parse(&self.session_id)?))
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/reservations/cancel", post(cancel_reservation))
        .route("/v1/reservations/{show_id}/{session_id}", get(get_reservation))
}

async fn cancel_reservation(
    State(state): State<AppState>,
    Json(req): Json<SessionRequest>,
) -> Result<Json<ReservationResponse>, AppError> {
    let (show_id, session_id) = req.parse()?;
    let reservation = state.coordinator.cancel(&show_id, &session_id).await?;
    Ok(Json(reservation.into()))
}

async fn get_reservation(
    State(state): State<AppState>,
    Path((show_id, session_id)): Path<(String, String)>,
) -> Result<Json<ReservationResponse>, AppError> {
    let show_id = ShowId::parse(&show_id)?;
    let session_id = SessionId::parse(&session_id)?;
    let reservation = state.coordinator.reservation(&show_id, &session_id).await?;
    Ok(Json(reservation.into()))
}
