use async_trait::async_trait;
use boxoffice_core::repository::ShowRepository;
use boxoffice_core::{BoxError, SeatCategory, Show, ShowId, ShowLayout};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::collections::BTreeMap;
use tracing::info;

use crate::StoreError;

pub struct PgShowRepository {
    pool: PgPool,
}

impl PgShowRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct ShowRow {
    id: String,
    title: String,
    room: String,
    starts_at: Option<DateTime<Utc>>,
    row_count: i32,
    column_count: i32,
    row_categories: serde_json::Value,
}

impl TryFrom<ShowRow> for Show {
    type Error = StoreError;

    fn try_from(row: ShowRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("show {}: bad {}", row.id, what));

        let row_categories: BTreeMap<String, SeatCategory> =
            serde_json::from_value(row.row_categories.clone()).map_err(|_| corrupt("row categories"))?;
        let layout = ShowLayout {
            rows: u32::try_from(row.row_count).map_err(|_| corrupt("row count"))?,
            columns: u16::try_from(row.column_count).map_err(|_| corrupt("column count"))?,
            row_categories,
        };
        layout.validate().map_err(|_| corrupt("layout"))?;

        Ok(Show {
            id: ShowId::parse(&row.id).map_err(|_| corrupt("id"))?,
            title: row.title,
            room: row.room,
            starts_at: row.starts_at,
            layout,
        })
    }
}

#[async_trait]
impl ShowRepository for PgShowRepository {
    /// Registration is idempotent, so an existing row is left untouched.
    async fn save_show(&self, show: &Show) -> Result<(), BoxError> {
        let categories = serde_json::to_value(&show.layout.row_categories)?;

        sqlx::query(
            r#"
            INSERT INTO shows (id, title, room, starts_at, row_count, column_count, row_categories)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (id) DO NOTHING
            "#,
        )
        .bind(show.id.as_str())
        .bind(&show.title)
        .bind(&show.room)
        .bind(show.starts_at)
        .bind(i32::try_from(show.layout.rows)?)
        .bind(i32::from(show.layout.columns))
        .bind(categories)
        .execute(&self.pool)
        .await?;

        info!(show = %show.id, "Show persisted");
        Ok(())
    }

    async fn load_shows(&self) -> Result<Vec<Show>, BoxError> {
        let rows = sqlx::query_as::<_, ShowRow>(
            "SELECT id, title, room, starts_at, row_count, column_count, row_categories FROM shows ORDER BY id",
        )
        .fetch_all(&self.pool)
        .await?;

        let mut shows = Vec::with_capacity(rows.len());
        for row in rows {
            shows.push(Show::try_from(row)?);
        }
        Ok(shows)
    }
}
