use axum::{extract::State, response::Response, routing::post, Json, Router};
use boxoffice_booking::CoordinatorError;
use boxoffice_core::ids::parse_seats;
use boxoffice_core::{SeatId, SessionId, ShowId};
use serde::{Deserialize, Serialize};

use crate::error::AppError;
use crate::payments::completion_response;
use crate::reservations::{ReservationResponse, ReservationView};
use crate::state::AppState;

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LockRequest {
    pub show_id: String,
    pub seats: Vec<String>,
    pub session_id: String,
    #[serde(default)]
    pub ttl_seconds: Option<u64>,
}

impl LockRequest {
    fn parse(&self) -> Result<(ShowId, SessionId, Vec<SeatId>), AppError> {
        Ok((
            ShowId::parse(&self.show_id)?,
            SessionId::parse(&self.session_id)?,
            parse_seats(&self.seats)?,
        ))
    }
}

#[derive(Debug, Serialize)]
pub struct ReleaseResponse {
    pub success: bool,
    pub released: Vec<SeatId>,
    pub reservation: Option<ReservationView>,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/locks/acquire", post(acquire_seats))
        .route("/v1/locks/release", post(release_seats))
        .route("/v1/locks/confirm", post(confirm_seats))
}

async fn acquire_seats(
    State(state): State<AppState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<ReservationResponse>, AppError> {
    let (show_id, session_id, seats) = req.parse()?;

    match state.coordinator.select(&show_id, &session_id, &seats, req.ttl_seconds).await {
        Ok(reservation) => Ok(Json(reservation.into())),
        Err(e) => {
            if matches!(e, CoordinatorError::Conflict(_)) {
                state.metrics.lock_conflicts.inc();
            }
            Err(e.into())
        }
    }
}

/// Releasing seats the session does not hold is not an error; they are
/// simply missing from `released`.
async fn release_seats(
    State(state): State<AppState>,
    Json(req): Json<LockRequest>,
) -> Result<Json<ReleaseResponse>, AppError> {
    let (show_id, session_id, seats) = req.parse()?;
    let outcome = state.coordinator.release_seats(&show_id, &session_id, &seats).await?;

    Ok(Json(ReleaseResponse {
        success: true,
        released: outcome.released,
        reservation: outcome.reservation.map(ReservationView::from),
    }))
}

async fn confirm_seats(
    State(state): State<AppState>,
    Json(req): Json<LockRequest>,
) -> Result<Response, AppError> {
    let (show_id, session_id, seats) = req.parse()?;
    let outcome = state.coordinator.confirm_seats(&show_id, &session_id, &seats).await?;
    completion_response(outcome)
}
