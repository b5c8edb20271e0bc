use axum::{
    extract::{Path, State},
    routing::get,
    Json, Router,
};
use boxoffice_booking::CoordinatorError;
use boxoffice_core::ShowId;
use serde_json::{json, Value};

use crate::error::AppError;
use crate::state::AppState;

pub fn routes() -> Router<AppState> {
    Router::new().route("/v1/shows/{show_id}/seats", get(get_seat_map))
}

/// Booked and live-locked seats of a show; every other seat is free.
async fn get_seat_map(
    State(state): State<AppState>,
    Path(show_id): Path<String>,
) -> Result<Json<Value>, AppError> {
    let show_id = ShowId::parse(&show_id)?;
    let show = state
        .catalog
        .get(&show_id)
        .ok_or_else(|| AppError::NotFoundError(format!("Unknown show: {}", show_id)))?;

    let seat_map = state
        .locks
        .seat_map(&show_id)
        .await
        .map_err(CoordinatorError::from)?;

    Ok(Json(json!({
        "success": true,
        "show": show,
        "seatMap": seat_map,
    })))
}
