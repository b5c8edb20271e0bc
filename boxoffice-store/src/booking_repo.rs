use async_trait::async_trait;
use boxoffice_core::repository::BookingRepository;
use boxoffice_core::{
    Booking, BookingStatus, BoxError, PaymentStatus, SeatId, SessionId, ShowId, UserId,
};
use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use crate::StoreError;

pub struct PgBookingRepository {
    pool: PgPool,
}

impl PgBookingRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[derive(sqlx::FromRow)]
struct BookingRow {
    id: Uuid,
    show_id: String,
    user_id: String,
    session_id: String,
    seats: Vec<String>,
    total_amount: i64,
    currency: String,
    status: String,
    payment_status: String,
    payment_intent_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<BookingRow> for Booking {
    type Error = StoreError;

    fn try_from(row: BookingRow) -> Result<Self, Self::Error> {
        let corrupt = |what: &str| StoreError::Corrupt(format!("booking {}: bad {}", row.id, what));

        let seats = row
            .seats
            .iter()
            .map(|s| SeatId::parse(s))
            .collect::<Result<Vec<_>, _>>()
            .map_err(|_| corrupt("seat id"))?;

        Ok(Booking {
            booking_id: row.id,
            show_id: ShowId::parse(&row.show_id).map_err(|_| corrupt("show id"))?,
            user_id: Masked(UserId::parse(&row.user_id).map_err(|_| corrupt("user id"))?),
            session_id: SessionId::parse(&row.session_id).map_err(|_| corrupt("session id"))?,
            seats,
            total_amount: row.total_amount,
            currency: row.currency.trim().to_string(),
            status: BookingStatus::parse(&row.status).ok_or_else(|| corrupt("status"))?,
            payment_status: PaymentStatus::parse(&row.payment_status)
                .ok_or_else(|| corrupt("payment status"))?,
            payment_intent_id: row.payment_intent_id,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

const SELECT_BOOKING: &str = r#"
    SELECT id, show_id, user_id, session_id, seats, total_amount, currency, status,
           payment_status, payment_intent_id, created_at, updated_at
    FROM bookings
"#;

#[async_trait]
impl BookingRepository for PgBookingRepository {
    async fn insert(&self, booking: &Booking) -> Result<(), BoxError> {
        let seats: Vec<String> = booking.seats.iter().map(|s| s.to_string()).collect();
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO bookings (id, show_id, user_id, session_id, seats, total_amount, currency,
                                  status, payment_status, payment_intent_id, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(booking.booking_id)
        .bind(booking.show_id.as_str())
        .bind(booking.user_id.inner().as_str())
        .bind(booking.session_id.as_str())
        .bind(&seats)
        .bind(booking.total_amount)
        .bind(&booking.currency)
        .bind(booking.status.as_str())
        .bind(booking.payment_status.as_str())
        .bind(booking.payment_intent_id.as_deref())
        .bind(booking.created_at)
        .bind(booking.updated_at)
        .execute(&mut *tx)
        .await?;

        // Primary key violation here means the seat was already sold.
        for seat in &seats {
            sqlx::query("INSERT INTO booked_seats (show_id, seat_id, booking_id) VALUES ($1, $2, $3)")
                .bind(booking.show_id.as_str())
                .bind(seat)
                .bind(booking.booking_id)
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> Result<Option<Booking>, BoxError> {
        let row = sqlx::query_as::<_, BookingRow>(&format!("{} WHERE id = $1", SELECT_BOOKING))
            .bind(booking_id)
            .fetch_optional(&self.pool)
            .await?;

        match row {
            Some(row) => Ok(Some(Booking::try_from(row)?)),
            None => Ok(None),
        }
    }

    async fn list_for_show(&self, show_id: &ShowId) -> Result<Vec<Booking>, BoxError> {
        let rows = sqlx::query_as::<_, BookingRow>(&format!(
            "{} WHERE show_id = $1 ORDER BY created_at",
            SELECT_BOOKING
        ))
        .bind(show_id.as_str())
        .fetch_all(&self.pool)
        .await?;

        let mut bookings = Vec::with_capacity(rows.len());
        for row in rows {
            bookings.push(Booking::try_from(row)?);
        }
        Ok(bookings)
    }

    async fn update_payment_status(
        &self,
        booking_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Booking>, BoxError> {
        let Some(mut booking) = self.get(booking_id).await? else {
            return Ok(None);
        };
        booking.update_payment_status(status, Utc::now());

        sqlx::query("UPDATE bookings SET status = $2, payment_status = $3, updated_at = $4 WHERE id = $1")
            .bind(booking_id)
            .bind(booking.status.as_str())
            .bind(booking.payment_status.as_str())
            .bind(booking.updated_at)
            .execute(&self.pool)
            .await?;

        Ok(Some(booking))
    }
}
