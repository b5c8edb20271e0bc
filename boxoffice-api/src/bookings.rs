use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use boxoffice_core::{Booking, BookingStatus, PaymentStatus, SeatId, SessionId, ShowId};
use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BookingView {
    pub booking_id: Uuid,
    pub show_id: ShowId,
    pub session_id: SessionId,
    pub seats: Vec<SeatId>,
    pub total_amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl From<Booking> for BookingView {
    fn from(b: Booking) -> Self {
        Self {
            booking_id: b.booking_id,
            show_id: b.show_id,
            session_id: b.session_id,
            seats: b.seats,
            total_amount: b.total_amount,
            currency: b.currency,
            status: b.status,
            payment_status: b.payment_status,
            payment_intent_id: b.payment_intent_id,
            created_at: b.created_at,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct BookingResponse {
    pub success: bool,
    #[serde(flatten)]
    pub booking: BookingView,
}

impl From<Booking> for BookingResponse {
    fn from(b: Booking) -> Self {
        Self { success: true, booking: b.into() }
    }
}

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/bookings/{booking_id}", get(get_booking))
}

async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<BookingResponse>, AppError> {
    let booking = state
        .bookings
        .get(booking_id)
        .await?
        .ok_or_else(|| AppError::NotFoundError(format!("Booking {} not found", booking_id)))?;
    Ok(Json(booking.into()))
}
