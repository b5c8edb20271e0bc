use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use boxoffice_catalog::PriceList;
use boxoffice_core::{SeatCategory, Show, ShowId, ShowLayout};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

use crate::error::AppError;
use crate::state::AppState;

// ============================================================================
// Request/Response Types
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RegisterShowRequest {
    pub id: String,
    pub title: String,
    #[serde(default)]
    pub room: String,
    pub starts_at: Option<DateTime<Utc>>,
    pub rows: u32,
    pub columns: u16,
    /// Row label -> category name. Unlisted rows are standard.
    #[serde(default)]
    pub row_categories: BTreeMap<String, String>,
}

#[derive(Debug, Serialize)]
pub struct ShowResponse {
    pub success: bool,
    pub show: Show,
}

#[derive(Debug, Serialize)]
pub struct PricesResponse {
    pub success: bool,
    pub prices: PriceList,
}

impl RegisterShowRequest {
    fn into_show(self) -> Result<Show, AppError> {
        let mut layout = ShowLayout::new(self.rows, self.columns)?;
        for (row, name) in &self.row_categories {
            let category = SeatCategory::parse(name)
                .ok_or_else(|| AppError::ValidationError(format!("Unknown seat category: {}", name)))?;
            layout = layout.with_category(row, category);
        }
        layout.validate()?;

        Ok(Show {
            id: ShowId::parse(&self.id)?,
            title: self.title,
            room: self.room,
            starts_at: self.starts_at,
            layout,
        })
    }
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/admin/shows", post(register_show))
        .route("/v1/admin/prices", get(get_prices).put(update_prices))
}

// ============================================================================
// Handlers
// ============================================================================

/// POST /v1/admin/shows
/// Registering the same show twice is a no-op; a different layout under an
/// existing id is a conflict.
async fn register_show(
    State(state): State<AppState>,
    Json(req): Json<RegisterShowRequest>,
) -> Result<(StatusCode, Json<ShowResponse>), AppError> {
    let show = req.into_show()?;

    if let Some(existing) = state.catalog.get(&show.id) {
        if existing != show {
            return Err(boxoffice_catalog::CatalogError::DuplicateShow(show.id.to_string()).into());
        }
        return Ok((StatusCode::OK, Json(ShowResponse { success: true, show: existing })));
    }

    if let Some(shows) = &state.shows {
        shows.save_show(&show).await?;
    }
    state.catalog.register(show.clone())?;
    info!(show = %show.id, "Registered show with {} seats", show.layout.capacity());

    Ok((StatusCode::CREATED, Json(ShowResponse { success: true, show })))
}

async fn get_prices(State(state): State<AppState>) -> Json<PricesResponse> {
    Json(PricesResponse { success: true, prices: state.pricing.snapshot() })
}

/// PUT /v1/admin/prices
/// Existing holds keep the price they were locked at.
async fn update_prices(
    State(state): State<AppState>,
    Json(prices): Json<PriceList>,
) -> Result<Json<PricesResponse>, AppError> {
    prices.validate()?;

    if let Some(db) = &state.db {
        let rows: Vec<(String, i64)> = prices
            .prices
            .iter()
            .map(|(category, price)| (category.as_str().to_string(), *price))
            .collect();
        db.save_prices(&rows).await.map_err(AppError::internal)?;
    }
    state.pricing.update(prices)?;

    Ok(Json(PricesResponse { success: true, prices: state.pricing.snapshot() }))
}
