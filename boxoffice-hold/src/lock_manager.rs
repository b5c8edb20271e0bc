use async_trait::async_trait;
use boxoffice_catalog::{PricingEngine, ShowCatalog};
use boxoffice_core::lock::{validate_batch, LAPSE_RETENTION_SECONDS};
use boxoffice_core::repository::BookingRepository;
use boxoffice_core::{
    Booking, BookingDraft, Clock, Grant, GrantedSeat, Lock, LockError, LockManager, SeatConflict,
    SeatId, SeatMap, SessionId, Show, ShowId,
};
use chrono::Duration;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::inventory::SeatInventory;

/// Lock manager over in-process state, one async mutex per show.
///
/// The mutex is held across the booking insert in `confirm`, so no other
/// caller can observe the seats between lock removal and the booked-set
/// update. Nothing else awaits while holding it.
pub struct InMemoryLockManager {
    catalog: Arc<ShowCatalog>,
    pricing: Arc<PricingEngine>,
    inventory: Arc<SeatInventory>,
    bookings: Arc<dyn BookingRepository>,
    clock: Arc<dyn Clock>,
}

impl InMemoryLockManager {
    pub fn new(
        catalog: Arc<ShowCatalog>,
        pricing: Arc<PricingEngine>,
        bookings: Arc<dyn BookingRepository>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            inventory: Arc::new(SeatInventory::new(clock.clone())),
            catalog,
            pricing,
            bookings,
            clock,
        }
    }

    pub fn inventory(&self) -> Arc<SeatInventory> {
        self.inventory.clone()
    }

    /// Seeds the booked set from durable bookings at startup.
    pub async fn restore_booked(&self, show_id: &ShowId, seats: &[SeatId]) {
        let cell = self.inventory.cell(show_id);
        let mut state = cell.lock().await;
        for seat in seats {
            state.locks.remove(seat);
            state.booked.insert(seat.clone());
        }
        debug!(show = %show_id, "Restored {} booked seats", seats.len());
    }

    fn show(&self, show_id: &ShowId) -> Result<Show, LockError> {
        self.catalog
            .get(show_id)
            .ok_or_else(|| LockError::UnknownShow(show_id.clone()))
    }
}

#[async_trait]
impl LockManager for InMemoryLockManager {
    async fn acquire(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
        ttl_seconds: u64,
    ) -> Result<Grant, LockError> {
        let show = self.show(show_id)?;
        validate_batch(&show.layout, seats)?;
        let ttl = i64::try_from(ttl_seconds)
            .ok()
            .filter(|ttl| *ttl > 0)
            .ok_or_else(|| LockError::InvalidInput("ttlSeconds must be positive".to_string()))?;

        let quote = self.pricing.quote(&show.layout, seats);

        let cell = self.inventory.cell(show_id);
        let mut state = cell.lock().await;
        let now = self.clock.now();

        let mut conflict = SeatConflict::default();
        for seat in seats {
            if state.booked.contains(seat) {
                conflict.already_booked.push(seat.clone());
            } else if let Some(lock) = state.live_lock(seat, now) {
                if !lock.is_owned_by(session_id) {
                    conflict.already_locked.push(seat.clone());
                }
            }
        }
        if !conflict.is_empty() {
            debug!(show = %show_id, session = %session_id, "acquire rejected: {}", conflict);
            return Err(LockError::Conflict(conflict));
        }

        let expires_at = now + Duration::seconds(ttl);
        let mut granted = Vec::with_capacity(seats.len());
        for (seat, price) in quote {
            if let Some(held) = state.live_lock(&seat, now).filter(|l| l.is_owned_by(session_id)) {
                granted.push(GrantedSeat {
                    seat_id: seat,
                    price: held.price,
                    expires_at: held.expires_at,
                    newly_locked: false,
                });
                continue;
            }

            let lock = Lock {
                show_id: show_id.clone(),
                seat_id: seat.clone(),
                session_id: session_id.clone(),
                expires_at,
                price,
            };
            if let Some(stale) = state.locks.insert(seat.clone(), lock) {
                if !stale.is_owned_by(session_id) {
                    state.record_lapse(&stale);
                }
            }
            state.lapsed.remove(&(session_id.clone(), seat.clone()));
            granted.push(GrantedSeat { seat_id: seat, price, expires_at, newly_locked: true });
        }

        let grant = Grant {
            show_id: show_id.clone(),
            session_id: session_id.clone(),
            seats: granted,
        };
        info!(
            show = %show_id,
            session = %session_id,
            "Locked {} seats until {}",
            grant.newly_locked().len(),
            expires_at
        );
        Ok(grant)
    }

    async fn release(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
    ) -> Result<Vec<SeatId>, LockError> {
        self.show(show_id)?;

        let cell = self.inventory.cell(show_id);
        let mut state = cell.lock().await;

        let mut released = Vec::new();
        for seat in seats {
            let owned = state
                .locks
                .get(seat)
                .map(|lock| lock.is_owned_by(session_id))
                .unwrap_or(false);
            if owned {
                state.locks.remove(seat);
                released.push(seat.clone());
            }
            state.lapsed.remove(&(session_id.clone(), seat.clone()));
        }

        if !released.is_empty() {
            info!(show = %show_id, session = %session_id, "Released {} seats", released.len());
        }
        Ok(released)
    }

    async fn confirm(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
        draft: BookingDraft,
    ) -> Result<Booking, LockError> {
        let show = self.show(show_id)?;
        validate_batch(&show.layout, seats)?;

        let cell = self.inventory.cell(show_id);
        let mut state = cell.lock().await;
        let now = self.clock.now();

        let mut expired = Vec::new();
        let mut not_owned = Vec::new();
        let mut total = 0;
        for seat in seats {
            match state.locks.get(seat) {
                Some(lock) if lock.is_owned_by(session_id) && lock.is_live(now) => total += lock.price,
                Some(lock) if lock.is_owned_by(session_id) => expired.push(seat.clone()),
                _ if state.has_lapsed(session_id, seat) => expired.push(seat.clone()),
                _ => not_owned.push(seat.clone()),
            }
        }
        if !expired.is_empty() {
            return Err(LockError::Expired { seats: expired });
        }
        if !not_owned.is_empty() {
            return Err(LockError::NotOwner { seats: not_owned });
        }

        let booking = Booking::from_draft(
            draft,
            show_id.clone(),
            session_id.clone(),
            seats.to_vec(),
            total,
            now,
        );

        // Persist first: if the insert fails nothing has moved and the locks stay.
        if let Err(e) = self.bookings.insert(&booking).await {
            error!(show = %show_id, session = %session_id, "Booking insert failed: {}", e);
            return Err(LockError::Storage(e.to_string()));
        }

        for seat in seats {
            state.locks.remove(seat);
            state.booked.insert(seat.clone());
        }

        info!(
            show = %show_id,
            booking_id = %booking.booking_id,
            "Booked {} seats for {} {}",
            seats.len(),
            booking.total_amount,
            booking.currency
        );
        Ok(booking)
    }

    async fn expire(&self, show_id: &ShowId) -> Result<Vec<SeatId>, LockError> {
        let cell = self.inventory.cell(show_id);
        let mut state = cell.lock().await;
        let now = self.clock.now();

        let stale: Vec<SeatId> = state
            .locks
            .values()
            .filter(|lock| !lock.is_live(now))
            .map(|lock| lock.seat_id.clone())
            .collect();

        for seat in &stale {
            if let Some(lock) = state.locks.remove(seat) {
                state.record_lapse(&lock);
            }
        }
        state.prune_lapses(now - Duration::seconds(LAPSE_RETENTION_SECONDS));

        let mut freed = stale;
        freed.sort();
        if !freed.is_empty() {
            info!(show = %show_id, "Expired {} locks", freed.len());
        }
        Ok(freed)
    }

    async fn seat_map(&self, show_id: &ShowId) -> Result<SeatMap, LockError> {
        let show = self.show(show_id)?;
        Ok(self.inventory.seat_map(&show).await)
    }

    async fn shows(&self) -> Result<Vec<ShowId>, LockError> {
        Ok(self.catalog.ids())
    }
}
