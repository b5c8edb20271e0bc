use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use std::time::Duration;
use tracing::info;

#[derive(Clone)]
pub struct DbClient {
    pub pool: Pool<Postgres>,
}

impl DbClient {
    pub async fn new(connection_string: &str) -> Result<Self, sqlx::Error> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(3))
            .connect(connection_string)
            .await?;

        Ok(Self { pool })
    }

    pub async fn migrate(&self) -> Result<(), sqlx::migrate::MigrateError> {
        info!("Running database migrations...");
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        info!("Migrations completed successfully.");
        Ok(())
    }

    /// Stored price overrides as (category, minor units). Category names are
    /// returned as stored; the caller decides which ones it understands.
    pub async fn fetch_price_overrides(&self) -> Result<Vec<(String, i64)>, sqlx::Error> {
        sqlx::query_as::<_, (String, i64)>("SELECT category, price FROM seat_prices ORDER BY category")
            .fetch_all(&self.pool)
            .await
    }

    pub async fn save_prices(&self, prices: &[(String, i64)]) -> Result<(), sqlx::Error> {
        let mut tx = self.pool.begin().await?;
        for (category, price) in prices {
            sqlx::query(
                r#"
                INSERT INTO seat_prices (category, price, updated_at)
                VALUES ($1, $2, NOW())
                ON CONFLICT (category) DO UPDATE SET price = EXCLUDED.price, updated_at = NOW()
                "#,
            )
            .bind(category)
            .bind(price)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        info!("Persisted {} seat prices", prices.len());
        Ok(())
    }
}
