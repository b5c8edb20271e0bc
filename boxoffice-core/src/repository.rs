use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::booking::Booking;
use crate::ids::ShowId;
use crate::payment::PaymentStatus;
use crate::show::Show;
use crate::BoxError;

/// Append-only booking store.
///
/// `insert` is called from inside the lock manager's critical section; the
/// ownership check that guards it lives in `LockManager::confirm`.
#[async_trait]
pub trait BookingRepository: Send + Sync {
    async fn insert(&self, booking: &Booking) -> Result<(), BoxError>;

    async fn get(&self, booking_id: Uuid) -> Result<Option<Booking>, BoxError>;

    async fn list_for_show(&self, show_id: &ShowId) -> Result<Vec<Booking>, BoxError>;

    async fn update_payment_status(
        &self,
        booking_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Booking>, BoxError>;
}

/// Durable registry of shows, reloaded into the catalog at startup.
#[async_trait]
pub trait ShowRepository: Send + Sync {
    async fn save_show(&self, show: &Show) -> Result<(), BoxError>;

    async fn load_shows(&self) -> Result<Vec<Show>, BoxError>;
}

/// Process-local booking store for development and tests.
#[derive(Default)]
pub struct InMemoryBookingRepository {
    bookings: RwLock<HashMap<Uuid, Booking>>,
}

impl InMemoryBookingRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.bookings.read().await.len()
    }
}

#[async_trait]
impl BookingRepository for InMemoryBookingRepository {
    async fn insert(&self, booking: &Booking) -> Result<(), BoxError> {
        let mut bookings = self.bookings.write().await;
        if bookings.contains_key(&booking.booking_id) {
            return Err(format!("booking {} already exists", booking.booking_id).into());
        }
        bookings.insert(booking.booking_id, booking.clone());
        Ok(())
    }

    async fn get(&self, booking_id: Uuid) -> Result<Option<Booking>, BoxError> {
        Ok(self.bookings.read().await.get(&booking_id).cloned())
    }

    async fn list_for_show(&self, show_id: &ShowId) -> Result<Vec<Booking>, BoxError> {
        let mut bookings: Vec<Booking> = self
            .bookings
            .read()
            .await
            .values()
            .filter(|b| &b.show_id == show_id)
            .cloned()
            .collect();
        bookings.sort_by_key(|b| b.created_at);
        Ok(bookings)
    }

    async fn update_payment_status(
        &self,
        booking_id: Uuid,
        status: PaymentStatus,
    ) -> Result<Option<Booking>, BoxError> {
        let mut bookings = self.bookings.write().await;
        Ok(bookings.get_mut(&booking_id).map(|booking| {
            booking.update_payment_status(status, Utc::now());
            booking.clone()
        }))
    }
}
