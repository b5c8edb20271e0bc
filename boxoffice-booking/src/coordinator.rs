use boxoffice_catalog::PricingEngine;
use boxoffice_core::events::{publish_event, EventPublisher};
use boxoffice_core::lock::DEFAULT_TTL_SECONDS;
use boxoffice_core::{
    Booking, BookingDraft, Clock, CoreError, LockError, LockManager, PaymentStatus, SeatConflict,
    SeatId, SessionId, ShowId, UserId,
};
use boxoffice_shared::models::events::{
    topics, BookingConfirmedEvent, ReleaseReason, SeatsLockedEvent, SeatsReleasedEvent,
};
use boxoffice_shared::Masked;
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;
use tracing::{error, info, warn};

use crate::models::{Reservation, ReservationState};
use crate::orchestrator::PaymentOrchestrator;

type ReservationKey = (ShowId, SessionId);
type ReservationSlot = Arc<Mutex<Option<Reservation>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CoordinatorSettings {
    pub default_ttl_seconds: u64,
    pub max_ttl_seconds: u64,
    pub max_seats_per_request: usize,
}

impl Default for CoordinatorSettings {
    fn default() -> Self {
        Self {
            default_ttl_seconds: DEFAULT_TTL_SECONDS,
            max_ttl_seconds: 900,
            max_seats_per_request: 10,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    Confirmed(Booking),
    /// Payment has not reached a final state yet; the hold stays.
    Pending(PaymentStatus),
    Released,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ReleaseOutcome {
    pub released: Vec<SeatId>,
    pub reservation: Option<Reservation>,
}

/// Drives each session's reservation through selection, payment and booking.
///
/// Every session gets its own slot mutex, so one slow gateway call only
/// blocks its own session. Seat state is never touched here except through
/// the `LockManager`.
pub struct BookingCoordinator {
    locks: Arc<dyn LockManager>,
    payments: Arc<PaymentOrchestrator>,
    pricing: Arc<PricingEngine>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
    settings: CoordinatorSettings,
    reservations: RwLock<HashMap<ReservationKey, ReservationSlot>>,
    intents: RwLock<HashMap<String, ReservationKey>>,
}

impl BookingCoordinator {
    pub fn new(
        locks: Arc<dyn LockManager>,
        payments: Arc<PaymentOrchestrator>,
        pricing: Arc<PricingEngine>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
        settings: CoordinatorSettings,
    ) -> Self {
        Self {
            locks,
            payments,
            pricing,
            publisher,
            clock,
            settings,
            reservations: RwLock::new(HashMap::new()),
            intents: RwLock::new(HashMap::new()),
        }
    }

    pub fn settings(&self) -> CoordinatorSettings {
        self.settings
    }

    fn slot(&self, show_id: &ShowId, session_id: &SessionId) -> Option<ReservationSlot> {
        self.reservations
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(&(show_id.clone(), session_id.clone()))
            .cloned()
    }

    fn slot_or_create(&self, show_id: &ShowId, session_id: &SessionId) -> ReservationSlot {
        if let Some(slot) = self.slot(show_id, session_id) {
            return slot;
        }
        self.reservations
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .entry((show_id.clone(), session_id.clone()))
            .or_default()
            .clone()
    }

    fn existing_slot(&self, show_id: &ShowId, session_id: &SessionId) -> Result<ReservationSlot, CoordinatorError> {
        self.slot(show_id, session_id)
            .ok_or_else(|| CoordinatorError::no_reservation(show_id, session_id))
    }

    fn validate_request(&self, seats: &[SeatId], ttl_seconds: Option<u64>) -> Result<u64, CoordinatorError> {
        if seats.len() > self.settings.max_seats_per_request {
            return Err(CoordinatorError::InvalidInput(format!(
                "at most {} seats per request",
                self.settings.max_seats_per_request
            )));
        }
        let ttl = ttl_seconds.unwrap_or(self.settings.default_ttl_seconds);
        if ttl == 0 || ttl > self.settings.max_ttl_seconds {
            return Err(CoordinatorError::InvalidInput(format!(
                "ttlSeconds must be between 1 and {}",
                self.settings.max_ttl_seconds
            )));
        }
        Ok(ttl)
    }

    /// SelectingSeats → Locked. Re-selecting the held seats is a no-op; a
    /// different set while Locked swaps the hold to the new seats.
    pub async fn select(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
        seats: &[SeatId],
        ttl_seconds: Option<u64>,
    ) -> Result<Reservation, CoordinatorError> {
        let ttl = self.validate_request(seats, ttl_seconds)?;

        let slot = self.slot_or_create(show_id, session_id);
        let mut guard = slot.lock().await;
        let now = self.clock.now();

        if let Some(reservation) = guard.as_mut() {
            self.refresh_hold(reservation, now).await;
            let state = reservation.state;
            match state {
                ReservationState::Locked | ReservationState::AwaitingPayment
                    if reservation.holds_exactly(seats) =>
                {
                    return Ok(reservation.clone());
                }
                ReservationState::Locked => return self.reselect(reservation, seats, ttl).await,
                ReservationState::AwaitingPayment | ReservationState::Confirmed => {
                    return Err(CoordinatorError::InvalidTransition {
                        from: state.as_str().to_string(),
                        to: ReservationState::Locked.as_str().to_string(),
                    });
                }
                _ => {}
            }
        }

        let grant = match self.locks.acquire(show_id, seats, session_id, ttl).await {
            Ok(grant) => grant,
            Err(e) => return Err(self.fail_acquire(show_id, session_id, seats, e).await),
        };

        let mut reservation = Reservation::new(show_id.clone(), session_id.clone(), self.pricing.currency(), now);
        reservation.apply_grant(&grant, now);
        reservation.transition(ReservationState::Locked, now)?;

        info!(
            show = %show_id,
            session = %session_id,
            reservation_id = %reservation.id,
            "Reservation locked {} seats for {} {}",
            reservation.seats.len(),
            reservation.total_amount,
            reservation.currency
        );
        self.publish_locked(&reservation).await;

        if let Some(previous) = guard.as_ref() {
            self.forget_intent(previous);
        }
        *guard = Some(reservation.clone());
        Ok(reservation)
    }

    async fn reselect(
        &self,
        reservation: &mut Reservation,
        seats: &[SeatId],
        ttl: u64,
    ) -> Result<Reservation, CoordinatorError> {
        let show_id = reservation.show_id.clone();
        let session_id = reservation.session_id.clone();

        let grant = match self.locks.acquire(&show_id, seats, &session_id, ttl).await {
            Ok(grant) => grant,
            Err(e) => {
                let err = self.fail_acquire(&show_id, &session_id, seats, e).await;
                if matches!(err, CoordinatorError::UpstreamFailure(_)) {
                    self.compensate(&show_id, &session_id, &reservation.seat_ids()).await;
                    reservation.transition(ReservationState::Released, self.clock.now())?;
                }
                return Err(err);
            }
        };

        let dropped: Vec<SeatId> = reservation
            .seat_ids()
            .into_iter()
            .filter(|seat| !seats.contains(seat))
            .collect();
        if !dropped.is_empty() {
            match self.locks.release(&show_id, &dropped, &session_id).await {
                Ok(freed) => self.publish_released(&show_id, &session_id, &freed, ReleaseReason::Reselected).await,
                Err(e) => warn!(show = %show_id, session = %session_id, "Releasing deselected seats failed: {}", e),
            }
        }

        let now = self.clock.now();
        reservation.apply_grant(&grant, now);
        info!(show = %show_id, session = %session_id, "Reservation now holds {} seats", reservation.seats.len());
        self.publish_locked(reservation).await;
        Ok(reservation.clone())
    }

    /// Maps an acquire failure. A storage failure may have left part of the
    /// batch written, so the batch is released before the error surfaces.
    async fn fail_acquire(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
        seats: &[SeatId],
        e: LockError,
    ) -> CoordinatorError {
        if let LockError::Storage(detail) = &e {
            error!(show = %show_id, session = %session_id, "Acquire failed in storage: {}", detail);
            self.compensate(show_id, session_id, seats).await;
        }
        e.into()
    }

    /// Best-effort release used when a step fails after seats may be held.
    async fn compensate(&self, show_id: &ShowId, session_id: &SessionId, seats: &[SeatId]) {
        match self.locks.release(show_id, seats, session_id).await {
            Ok(freed) => {
                warn!(show = %show_id, session = %session_id, "Compensating release of {} seats", freed.len());
                self.publish_released(show_id, session_id, &freed, ReleaseReason::Compensation).await;
            }
            Err(e) => {
                error!(
                    show = %show_id,
                    session = %session_id,
                    "Compensating release failed, seats free on expiry: {}",
                    e
                );
            }
        }
    }

    /// Locked → AwaitingPayment. The gateway is called with only this
    /// session's slot held; no seat critical section is involved.
    pub async fn start_payment(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
        user_id: UserId,
    ) -> Result<Reservation, CoordinatorError> {
        let slot = self.existing_slot(show_id, session_id)?;
        let mut guard = slot.lock().await;
        let reservation = guard
            .as_mut()
            .ok_or_else(|| CoordinatorError::no_reservation(show_id, session_id))?;

        let now = self.clock.now();
        self.refresh_hold(reservation, now).await;
        match reservation.state {
            ReservationState::AwaitingPayment => return Ok(reservation.clone()),
            ReservationState::Expired => {
                return Err(CoordinatorError::Expired { seats: reservation.seat_ids() });
            }
            ReservationState::Locked => {}
            other => {
                return Err(CoordinatorError::InvalidTransition {
                    from: other.as_str().to_string(),
                    to: ReservationState::AwaitingPayment.as_str().to_string(),
                });
            }
        }

        let metadata = serde_json::json!({
            "showId": show_id.as_str(),
            "sessionId": session_id.as_str(),
            "seats": reservation.seat_ids().iter().map(|s| s.to_string()).collect::<Vec<_>>(),
        });
        let intent = match self
            .payments
            .initialize_payment(reservation.id, reservation.total_amount, &reservation.currency, metadata)
            .await
        {
            Ok(intent) => intent,
            Err(e) => {
                error!(show = %show_id, session = %session_id, "Payment intent creation failed: {}", e);
                self.compensate(show_id, session_id, &reservation.seat_ids()).await;
                reservation.transition(ReservationState::Released, self.clock.now())?;
                return Err(CoordinatorError::UpstreamFailure(
                    "payment provider unavailable, please retry".to_string(),
                ));
            }
        };

        reservation.payment_intent_id = Some(intent.payment_intent_id.clone());
        reservation.client_secret = intent.client_secret.clone();
        reservation.payment_status = Some(intent.status);
        reservation.user_id = Some(Masked(user_id));
        reservation.transition(ReservationState::AwaitingPayment, self.clock.now())?;

        self.intents
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(intent.payment_intent_id.clone(), (show_id.clone(), session_id.clone()));

        info!(
            show = %show_id,
            session = %session_id,
            payment_intent_id = %intent.payment_intent_id,
            "Awaiting payment of {} {}",
            reservation.total_amount,
            reservation.currency
        );
        Ok(reservation.clone())
    }

    /// Settles a reservation against the gateway's view of its payment.
    pub async fn complete(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
    ) -> Result<CompletionOutcome, CoordinatorError> {
        let slot = self.existing_slot(show_id, session_id)?;
        let mut guard = slot.lock().await;
        let reservation = guard
            .as_mut()
            .ok_or_else(|| CoordinatorError::no_reservation(show_id, session_id))?;
        self.complete_reservation(reservation).await
    }

    /// Like `complete`, but only for the exact seats the session reserved.
    pub async fn confirm_seats(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
        seats: &[SeatId],
    ) -> Result<CompletionOutcome, CoordinatorError> {
        let slot = self.existing_slot(show_id, session_id)?;
        let mut guard = slot.lock().await;
        let reservation = guard
            .as_mut()
            .ok_or_else(|| CoordinatorError::no_reservation(show_id, session_id))?;

        let held = reservation.seat_ids();
        let foreign: Vec<SeatId> = seats.iter().filter(|s| !held.contains(s)).cloned().collect();
        if !foreign.is_empty() {
            return Err(CoordinatorError::NotOwner { seats: foreign });
        }
        if !reservation.holds_exactly(seats) {
            return Err(CoordinatorError::InvalidInput(
                "confirm must name every reserved seat".to_string(),
            ));
        }
        self.complete_reservation(reservation).await
    }

    /// Entry point for gateway callbacks.
    pub async fn handle_payment_result(
        &self,
        payment_intent_id: &str,
    ) -> Result<CompletionOutcome, CoordinatorError> {
        let key = self
            .intents
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .get(payment_intent_id)
            .cloned();
        let Some((show_id, session_id)) = key else {
            return Err(CoordinatorError::NoReservation(format!(
                "no reservation for payment intent {}",
                payment_intent_id
            )));
        };
        let slot = self.existing_slot(&show_id, &session_id)?;
        let mut guard = slot.lock().await;
        match guard.as_mut() {
            Some(reservation) if reservation.payment_intent_id.as_deref() == Some(payment_intent_id) => {
                self.complete_reservation(reservation).await
            }
            _ => Err(CoordinatorError::NoReservation(format!(
                "payment intent {} no longer matches a reservation",
                payment_intent_id
            ))),
        }
    }

    async fn complete_reservation(
        &self,
        reservation: &mut Reservation,
    ) -> Result<CompletionOutcome, CoordinatorError> {
        let now = self.clock.now();
        self.refresh_hold(reservation, now).await;

        let intent_id = match reservation.state {
            ReservationState::Confirmed => {
                if let Some(booking) = &reservation.booking {
                    return Ok(CompletionOutcome::Confirmed(booking.clone()));
                }
                return Err(CoordinatorError::UpstreamFailure("booking record missing".to_string()));
            }
            ReservationState::Released => return Ok(CompletionOutcome::Released),
            ReservationState::Expired => {
                return Err(CoordinatorError::Expired { seats: reservation.seat_ids() });
            }
            ReservationState::SelectingSeats | ReservationState::Locked => {
                return Err(CoordinatorError::InvalidTransition {
                    from: reservation.state.as_str().to_string(),
                    to: ReservationState::Confirmed.as_str().to_string(),
                });
            }
            ReservationState::AwaitingPayment => match &reservation.payment_intent_id {
                Some(id) => id.clone(),
                None => return Err(CoordinatorError::UpstreamFailure("payment intent missing".to_string())),
            },
        };

        let status = match self.payments.payment_status(&intent_id).await {
            Ok(status) => status,
            Err(e) => {
                error!(payment_intent_id = %intent_id, "Payment status query failed: {}", e);
                return Err(CoordinatorError::UpstreamFailure(
                    "payment provider unavailable, please retry".to_string(),
                ));
            }
        };
        reservation.payment_status = Some(status);

        match status {
            PaymentStatus::Succeeded => self.finalize(reservation, intent_id).await,
            PaymentStatus::Failed | PaymentStatus::Canceled | PaymentStatus::Refunded => {
                let seats = reservation.seat_ids();
                match self.locks.release(&reservation.show_id, &seats, &reservation.session_id).await {
                    Ok(freed) => {
                        self.publish_released(
                            &reservation.show_id,
                            &reservation.session_id,
                            &freed,
                            ReleaseReason::PaymentFailed,
                        )
                        .await
                    }
                    Err(e) => warn!("Release after failed payment {} failed: {}", intent_id, e),
                }
                reservation.transition(ReservationState::Released, self.clock.now())?;
                info!(payment_intent_id = %intent_id, "Payment {}, seats released", status.as_str());
                Ok(CompletionOutcome::Released)
            }
            pending => Ok(CompletionOutcome::Pending(pending)),
        }
    }

    /// AwaitingPayment → Confirmed once the gateway reports success.
    async fn finalize(
        &self,
        reservation: &mut Reservation,
        intent_id: String,
    ) -> Result<CompletionOutcome, CoordinatorError> {
        let Some(user_id) = reservation.user_id.clone() else {
            return Err(CoordinatorError::InvalidInput("user id missing on reservation".to_string()));
        };
        let seats = reservation.seat_ids();
        let draft = BookingDraft {
            user_id: user_id.into_inner(),
            currency: reservation.currency.clone(),
            payment_intent_id: Some(intent_id.clone()),
            payment_status: PaymentStatus::Succeeded,
        };

        match self
            .locks
            .confirm(&reservation.show_id, &seats, &reservation.session_id, draft)
            .await
        {
            Ok(booking) => {
                reservation.booking = Some(booking.clone());
                reservation.transition(ReservationState::Confirmed, self.clock.now())?;
                info!(
                    booking_id = %booking.booking_id,
                    payment_intent_id = %intent_id,
                    "Reservation confirmed"
                );
                let event = BookingConfirmedEvent {
                    booking_id: booking.booking_id,
                    show_id: booking.show_id.to_string(),
                    seats: booking.seats.iter().map(|s| s.to_string()).collect(),
                    total_amount: booking.total_amount,
                    currency: booking.currency.clone(),
                    confirmed_at: booking.created_at.timestamp(),
                };
                publish_event(
                    self.publisher.as_ref(),
                    topics::BOOKING_CONFIRMED,
                    &booking.booking_id.to_string(),
                    &event,
                )
                .await;
                Ok(CompletionOutcome::Confirmed(booking))
            }
            Err(LockError::Expired { seats }) | Err(LockError::NotOwner { seats }) => {
                reservation.state = ReservationState::Expired;
                reservation.updated_at = self.clock.now();
                self.release_lapsed(reservation).await;
                warn!(
                    payment_intent_id = %intent_id,
                    "Payment captured after hold lapsed; refund required"
                );
                Err(CoordinatorError::Expired { seats })
            }
            Err(LockError::Storage(detail)) => {
                error!(payment_intent_id = %intent_id, "Booking could not be stored: {}", detail);
                self.compensate(&reservation.show_id, &reservation.session_id, &seats).await;
                reservation.transition(ReservationState::Released, self.clock.now())?;
                warn!(payment_intent_id = %intent_id, "Payment captured without booking; refund required");
                Err(CoordinatorError::UpstreamFailure(
                    "booking could not be stored, please retry".to_string(),
                ))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Releases seats on behalf of the session. While awaiting payment the
    /// whole reservation is given up, since the payment covers every seat.
    pub async fn release_seats(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
        seats: &[SeatId],
    ) -> Result<ReleaseOutcome, CoordinatorError> {
        let Some(slot) = self.slot(show_id, session_id) else {
            let released = self.locks.release(show_id, seats, session_id).await?;
            self.publish_released(show_id, session_id, &released, ReleaseReason::Cancelled).await;
            return Ok(ReleaseOutcome { released, reservation: None });
        };

        let mut guard = slot.lock().await;
        let Some(reservation) = guard.as_mut() else {
            let released = self.locks.release(show_id, seats, session_id).await?;
            self.publish_released(show_id, session_id, &released, ReleaseReason::Cancelled).await;
            return Ok(ReleaseOutcome { released, reservation: None });
        };

        let now = self.clock.now();
        self.refresh_hold(reservation, now).await;
        let target = match reservation.state {
            ReservationState::AwaitingPayment => reservation.seat_ids(),
            _ => seats.to_vec(),
        };

        let released = self.locks.release(show_id, &target, session_id).await?;
        self.publish_released(show_id, session_id, &released, ReleaseReason::Cancelled).await;

        if reservation.state.holds_seats() {
            reservation.drop_seats(&target, now);
            if reservation.state == ReservationState::AwaitingPayment || reservation.seats.is_empty() {
                reservation.transition(ReservationState::Released, now)?;
            }
        }

        Ok(ReleaseOutcome { released, reservation: Some(reservation.clone()) })
    }

    /// Any non-terminal state → Released. Terminal reservations are returned as-is.
    pub async fn cancel(&self, show_id: &ShowId, session_id: &SessionId) -> Result<Reservation, CoordinatorError> {
        let slot = self.existing_slot(show_id, session_id)?;
        let mut guard = slot.lock().await;
        let reservation = guard
            .as_mut()
            .ok_or_else(|| CoordinatorError::no_reservation(show_id, session_id))?;

        let now = self.clock.now();
        reservation.refresh(now);
        if reservation.state == ReservationState::Expired {
            // Seats selected after the first one may still be live.
            self.release_lapsed(reservation).await;
        }
        if reservation.state.is_terminal() {
            return Ok(reservation.clone());
        }

        match self.locks.release(show_id, &reservation.seat_ids(), session_id).await {
            Ok(freed) => self.publish_released(show_id, session_id, &freed, ReleaseReason::Cancelled).await,
            Err(e) => warn!(show = %show_id, session = %session_id, "Cancel could not release seats: {}", e),
        }
        reservation.transition(ReservationState::Released, now)?;
        info!(show = %show_id, session = %session_id, "Reservation cancelled");
        Ok(reservation.clone())
    }

    pub async fn reservation(&self, show_id: &ShowId, session_id: &SessionId) -> Result<Reservation, CoordinatorError> {
        let slot = self.existing_slot(show_id, session_id)?;
        let mut guard = slot.lock().await;
        let reservation = guard
            .as_mut()
            .ok_or_else(|| CoordinatorError::no_reservation(show_id, session_id))?;
        self.refresh_hold(reservation, self.clock.now()).await;
        Ok(reservation.clone())
    }

    /// Forgets terminal reservations older than `retention`. Slots currently
    /// in use are left for the next pass.
    pub fn prune_finished(&self, retention: Duration) -> usize {
        let now = self.clock.now();
        let horizon = now - retention;
        let mut reservations = self.reservations.write().unwrap_or_else(|p| p.into_inner());
        let mut intents = self.intents.write().unwrap_or_else(|p| p.into_inner());

        let before = reservations.len();
        reservations.retain(|_, slot| {
            // Someone outside the map still holds the slot.
            if Arc::strong_count(slot) > 1 {
                return true;
            }
            let Ok(guard) = slot.try_lock() else {
                return true;
            };
            let Some(reservation) = guard.as_ref() else {
                return false;
            };
            let keep = !(reservation.state.is_terminal() && reservation.updated_at < horizon);
            if !keep {
                if let Some(intent_id) = &reservation.payment_intent_id {
                    intents.remove(intent_id);
                }
            }
            keep
        });
        before - reservations.len()
    }

    /// Expires reservations whose hold lapsed without the session coming
    /// back and lets go of the seats they still hold. Busy slots are skipped.
    pub async fn settle_lapsed(&self) -> usize {
        let slots: Vec<ReservationSlot> = self
            .reservations
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .values()
            .cloned()
            .collect();
        let now = self.clock.now();

        let mut settled = 0;
        for slot in slots {
            let Ok(mut guard) = slot.try_lock() else {
                continue;
            };
            if let Some(reservation) = guard.as_mut() {
                if reservation.refresh(now) {
                    self.release_lapsed(reservation).await;
                    settled += 1;
                }
            }
        }
        settled
    }

    pub fn reservation_count(&self) -> usize {
        self.reservations.read().unwrap_or_else(|p| p.into_inner()).len()
    }

    /// Checks the hold against the clock. Once its earliest seat lapses the
    /// reservation is expired and any seats still held are let go.
    async fn refresh_hold(&self, reservation: &mut Reservation, now: DateTime<Utc>) {
        if reservation.refresh(now) {
            self.release_lapsed(reservation).await;
        }
    }

    async fn release_lapsed(&self, reservation: &Reservation) {
        let show_id = &reservation.show_id;
        let session_id = &reservation.session_id;
        match self.locks.release(show_id, &reservation.seat_ids(), session_id).await {
            Ok(freed) => self.publish_released(show_id, session_id, &freed, ReleaseReason::Lapsed).await,
            Err(e) => warn!(show = %show_id, session = %session_id, "Releasing lapsed hold failed: {}", e),
        }
    }

    fn forget_intent(&self, reservation: &Reservation) {
        if let Some(intent_id) = &reservation.payment_intent_id {
            self.intents.write().unwrap_or_else(|p| p.into_inner()).remove(intent_id);
        }
    }

    async fn publish_locked(&self, reservation: &Reservation) {
        let event = SeatsLockedEvent {
            show_id: reservation.show_id.to_string(),
            session_id: reservation.session_id.to_string(),
            seats: reservation.seat_ids().iter().map(|s| s.to_string()).collect(),
            total_amount: reservation.total_amount,
            expires_at: reservation.expires_at.timestamp(),
            locked_at: self.clock.now().timestamp(),
        };
        publish_event(self.publisher.as_ref(), topics::SEATS_LOCKED, reservation.show_id.as_str(), &event).await;
    }

    async fn publish_released(
        &self,
        show_id: &ShowId,
        session_id: &SessionId,
        seats: &[SeatId],
        reason: ReleaseReason,
    ) {
        if seats.is_empty() {
            return;
        }
        let event = SeatsReleasedEvent {
            show_id: show_id.to_string(),
            session_id: session_id.to_string(),
            seats: seats.iter().map(|s| s.to_string()).collect(),
            reason,
            released_at: self.clock.now().timestamp(),
        };
        publish_event(self.publisher.as_ref(), topics::SEATS_RELEASED, show_id.as_str(), &event).await;
    }
}

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum CoordinatorError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown show: {0}")]
    UnknownShow(ShowId),

    #[error("Seats unavailable: {0}")]
    Conflict(SeatConflict),

    #[error("Seats not held by this session: {}", join(.seats))]
    NotOwner { seats: Vec<SeatId> },

    #[error("Hold expired for seats: {}. Please select seats again", join(.seats))]
    Expired { seats: Vec<SeatId> },

    #[error("Upstream failure: {0}")]
    UpstreamFailure(String),

    #[error("{0}")]
    NoReservation(String),

    #[error("Invalid state transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl CoordinatorError {
    fn no_reservation(show_id: &ShowId, session_id: &SessionId) -> Self {
        CoordinatorError::NoReservation(format!(
            "no reservation for session {} on show {}",
            session_id, show_id
        ))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            CoordinatorError::InvalidInput(_) => "INVALID_INPUT",
            CoordinatorError::UnknownShow(_) => "UNKNOWN_SHOW",
            CoordinatorError::Conflict(_) => "CONFLICT",
            CoordinatorError::NotOwner { .. } => "NOT_OWNER",
            CoordinatorError::Expired { .. } => "EXPIRED",
            CoordinatorError::UpstreamFailure(_) => "UPSTREAM_FAILURE",
            CoordinatorError::NoReservation(_) => "NO_RESERVATION",
            CoordinatorError::InvalidTransition { .. } => "INVALID_TRANSITION",
        }
    }
}

fn join(seats: &[SeatId]) -> String {
    seats.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

impl From<LockError> for CoordinatorError {
    fn from(e: LockError) -> Self {
        match e {
            LockError::InvalidInput(msg) => CoordinatorError::InvalidInput(msg),
            LockError::UnknownShow(id) => CoordinatorError::UnknownShow(id),
            LockError::Conflict(conflict) => CoordinatorError::Conflict(conflict),
            LockError::Expired { seats } => CoordinatorError::Expired { seats },
            LockError::NotOwner { seats } => CoordinatorError::NotOwner { seats },
            LockError::Storage(_) => {
                CoordinatorError::UpstreamFailure("seat storage unavailable, please retry".to_string())
            }
        }
    }
}

impl From<CoreError> for CoordinatorError {
    fn from(e: CoreError) -> Self {
        match e {
            CoreError::ValidationError(msg) => CoordinatorError::InvalidInput(msg),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::orchestrator::MockPaymentGateway;
    use async_trait::async_trait;
    use boxoffice_catalog::{PriceList, ShowCatalog};
    use boxoffice_core::events::LogEventPublisher;
    use boxoffice_core::repository::InMemoryBookingRepository;
    use boxoffice_core::{Grant, ManualClock, SeatCategory, SeatMap, Show, ShowLayout};
    use boxoffice_hold::InMemoryLockManager;

    struct Fixture {
        coordinator: Arc<BookingCoordinator>,
        locks: Arc<InMemoryLockManager>,
        gateway: Arc<MockPaymentGateway>,
        pricing: Arc<PricingEngine>,
        clock: Arc<ManualClock>,
        bookings: Arc<InMemoryBookingRepository>,
        show_id: ShowId,
    }

    fn fixture() -> Fixture {
        let clock = Arc::new(ManualClock::at_epoch());
        let catalog = Arc::new(ShowCatalog::new());
        let show_id = ShowId::parse("SH1").unwrap();
        catalog
            .register(Show {
                id: show_id.clone(),
                title: "Stalker".to_string(),
                room: "Room 3".to_string(),
                starts_at: None,
                layout: ShowLayout::new(6, 12).unwrap().with_category("F", SeatCategory::Premium),
            })
            .unwrap();
        let pricing = Arc::new(PricingEngine::default());
        let bookings = Arc::new(InMemoryBookingRepository::new());
        let locks = Arc::new(InMemoryLockManager::new(catalog, pricing.clone(), bookings.clone(), clock.clone()));
        let gateway = Arc::new(MockPaymentGateway::new());
        let coordinator = Arc::new(BookingCoordinator::new(
            locks.clone(),
            Arc::new(PaymentOrchestrator::new(gateway.clone())),
            pricing.clone(),
            Arc::new(LogEventPublisher),
            clock.clone(),
            CoordinatorSettings::default(),
        ));
        Fixture { coordinator, locks, gateway, pricing, clock, bookings, show_id }
    }

    fn seats(labels: &[&str]) -> Vec<SeatId> {
        labels.iter().map(|s| SeatId::parse(s).unwrap()).collect()
    }

    fn session(s: &str) -> SessionId {
        SessionId::parse(s).unwrap()
    }

    fn user() -> UserId {
        UserId::parse("user-42").unwrap()
    }

    #[tokio::test]
    async fn test_happy_path_books_seats() {
        let f = fixture();
        let s1 = session("S1");

        let r = f.coordinator.select(&f.show_id, &s1, &seats(&["D5", "D6"]), Some(300)).await.unwrap();
        assert_eq!(r.state, ReservationState::Locked);
        assert_eq!(r.total_amount, 1800);

        let r = f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();
        assert_eq!(r.state, ReservationState::AwaitingPayment);
        assert!(r.payment_intent_id.is_some());

        let outcome = f.coordinator.complete(&f.show_id, &s1).await.unwrap();
        let CompletionOutcome::Confirmed(booking) = outcome else {
            panic!("expected booking, got {:?}", outcome);
        };
        assert_eq!(booking.seats, seats(&["D5", "D6"]));
        assert_eq!(booking.total_amount, 1800);
        assert_eq!(f.locks.inventory().booked_seats(&f.show_id).await, seats(&["D5", "D6"]));

        // Redelivered callback returns the same booking.
        let again = f.coordinator.complete(&f.show_id, &s1).await.unwrap();
        assert_eq!(again, CompletionOutcome::Confirmed(booking));
        assert_eq!(f.bookings.count().await, 1);
    }

    #[tokio::test]
    async fn test_select_same_seats_is_idempotent() {
        let f = fixture();
        let first = f.coordinator.select(&f.show_id, &session("S1"), &seats(&["A1", "A2"]), None).await.unwrap();
        f.clock.advance(Duration::seconds(10));
        let second = f.coordinator.select(&f.show_id, &session("S1"), &seats(&["A2", "A1"]), None).await.unwrap();

        assert_eq!(first.id, second.id);
        assert_eq!(first.expires_at, second.expires_at);
    }

    #[tokio::test]
    async fn test_reselect_swaps_hold() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["A1", "A2"]), None).await.unwrap();

        let r = f.coordinator.select(&f.show_id, &s1, &seats(&["A2", "A3"]), None).await.unwrap();
        assert_eq!(r.seat_ids(), seats(&["A2", "A3"]));
        assert!(!f.locks.inventory().is_locked(&f.show_id, &seats(&["A1"])[0]).await);
        assert!(f.locks.inventory().is_locked(&f.show_id, &seats(&["A3"])[0]).await);
    }

    #[tokio::test]
    async fn test_conflict_surfaces_partitioned_seats() {
        let f = fixture();
        f.coordinator.select(&f.show_id, &session("S1"), &seats(&["D5", "D6"]), None).await.unwrap();

        let err = f
            .coordinator
            .select(&f.show_id, &session("S2"), &seats(&["D5", "D7"]), None)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "CONFLICT");
        assert_eq!(
            err,
            CoordinatorError::Conflict(SeatConflict { already_booked: vec![], already_locked: seats(&["D5"]) })
        );
        assert!(f.coordinator.reservation(&f.show_id, &session("S2")).await.is_err());
    }

    #[tokio::test]
    async fn test_request_limits() {
        let f = fixture();
        let many: Vec<SeatId> = (1..=11).map(|c| SeatId::parse(&format!("B{}", c)).unwrap()).collect();

        assert!(matches!(
            f.coordinator.select(&f.show_id, &session("S1"), &many, None).await,
            Err(CoordinatorError::InvalidInput(_))
        ));
        assert!(matches!(
            f.coordinator.select(&f.show_id, &session("S1"), &seats(&["B1"]), Some(901)).await,
            Err(CoordinatorError::InvalidInput(_))
        ));
        assert!(matches!(
            f.coordinator.select(&f.show_id, &session("S1"), &seats(&["B1"]), Some(0)).await,
            Err(CoordinatorError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_requires_action_keeps_awaiting_payment() {
        let f = fixture();
        let s1 = session("S1");
        f.gateway.set_default_status(PaymentStatus::RequiresAction);
        f.coordinator.select(&f.show_id, &s1, &seats(&["C1"]), None).await.unwrap();
        let r = f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        let outcome = f.coordinator.complete(&f.show_id, &s1).await.unwrap();
        assert_eq!(outcome, CompletionOutcome::Pending(PaymentStatus::RequiresAction));
        assert_eq!(
            f.coordinator.reservation(&f.show_id, &s1).await.unwrap().state,
            ReservationState::AwaitingPayment
        );

        let intent_id = r.payment_intent_id.unwrap();
        f.gateway.set_status(&intent_id, PaymentStatus::Succeeded);
        assert!(matches!(
            f.coordinator.handle_payment_result(&intent_id).await.unwrap(),
            CompletionOutcome::Confirmed(_)
        ));
    }

    #[tokio::test]
    async fn test_failed_payment_releases_seats() {
        let f = fixture();
        let s1 = session("S1");
        f.gateway.set_default_status(PaymentStatus::Failed);
        f.coordinator.select(&f.show_id, &s1, &seats(&["C2", "C3"]), None).await.unwrap();
        f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        assert_eq!(f.coordinator.complete(&f.show_id, &s1).await.unwrap(), CompletionOutcome::Released);
        assert!(f.locks.inventory().active_locks(&f.show_id).await.is_empty());
        f.coordinator.select(&f.show_id, &session("S2"), &seats(&["C2"]), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_intent_failure_compensates() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["E1"]), None).await.unwrap();
        f.gateway.fail_next_create();

        let err = f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap_err();
        assert_eq!(err.kind(), "UPSTREAM_FAILURE");
        assert!(!f.locks.inventory().is_locked(&f.show_id, &seats(&["E1"])[0]).await);
        assert_eq!(
            f.coordinator.reservation(&f.show_id, &s1).await.unwrap().state,
            ReservationState::Released
        );
    }

    #[tokio::test]
    async fn test_result_query_failure_keeps_hold() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["E2"]), None).await.unwrap();
        f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();
        f.gateway.fail_result_queries(true);

        let err = f.coordinator.complete(&f.show_id, &s1).await.unwrap_err();
        assert_eq!(err.kind(), "UPSTREAM_FAILURE");
        assert!(f.locks.inventory().is_locked(&f.show_id, &seats(&["E2"])[0]).await);

        f.gateway.fail_result_queries(false);
        assert!(matches!(
            f.coordinator.complete(&f.show_id, &s1).await.unwrap(),
            CompletionOutcome::Confirmed(_)
        ));
    }

    #[tokio::test]
    async fn test_expired_hold_is_hard_failure_and_never_relocks() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["B1"]), Some(1)).await.unwrap();
        f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        f.clock.advance(Duration::seconds(2));
        f.locks.expire(&f.show_id).await.unwrap();
        f.coordinator.select(&f.show_id, &session("S2"), &seats(&["B1"]), None).await.unwrap();

        let err = f.coordinator.complete(&f.show_id, &s1).await.unwrap_err();
        assert_eq!(err, CoordinatorError::Expired { seats: seats(&["B1"]) });
        assert_eq!(
            f.locks.inventory().lock_holder(&f.show_id, &seats(&["B1"])[0]).await.unwrap().session_id,
            session("S2")
        );
    }

    #[tokio::test]
    async fn test_price_fixed_at_selection() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["F1", "A1"]), None).await.unwrap();
        f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        let mut pricier = PriceList::default();
        pricier.prices.insert(SeatCategory::Premium, 4000);
        f.pricing.update(pricier).unwrap();

        let CompletionOutcome::Confirmed(booking) = f.coordinator.complete(&f.show_id, &s1).await.unwrap() else {
            panic!("expected booking");
        };
        assert_eq!(booking.total_amount, 1200 + 900);
    }

    #[tokio::test]
    async fn test_release_and_cancel() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["A4", "A5"]), None).await.unwrap();

        let outcome = f.coordinator.release_seats(&f.show_id, &s1, &seats(&["A4"])).await.unwrap();
        assert_eq!(outcome.released, seats(&["A4"]));
        let r = outcome.reservation.unwrap();
        assert_eq!(r.state, ReservationState::Locked);
        assert_eq!(r.seat_ids(), seats(&["A5"]));

        let again = f.coordinator.release_seats(&f.show_id, &s1, &seats(&["A4"])).await.unwrap();
        assert!(again.released.is_empty());

        let cancelled = f.coordinator.cancel(&f.show_id, &s1).await.unwrap();
        assert_eq!(cancelled.state, ReservationState::Released);
        assert!(f.locks.inventory().active_locks(&f.show_id).await.is_empty());
        assert_eq!(f.coordinator.cancel(&f.show_id, &s1).await.unwrap().state, ReservationState::Released);

        let unknown = f.coordinator.release_seats(&f.show_id, &session("S9"), &seats(&["A6"])).await.unwrap();
        assert!(unknown.released.is_empty());
    }

    #[tokio::test]
    async fn test_confirm_seats_must_match_reservation() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["D1", "D2"]), None).await.unwrap();
        f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        assert!(matches!(
            f.coordinator.confirm_seats(&f.show_id, &s1, &seats(&["D1", "D3"])).await,
            Err(CoordinatorError::NotOwner { .. })
        ));
        assert!(matches!(
            f.coordinator.confirm_seats(&f.show_id, &s1, &seats(&["D1"])).await,
            Err(CoordinatorError::InvalidInput(_))
        ));
        assert!(matches!(
            f.coordinator.confirm_seats(&f.show_id, &s1, &seats(&["D2", "D1"])).await,
            Ok(CompletionOutcome::Confirmed(_))
        ));
    }

    #[tokio::test]
    async fn test_confirm_without_payment_is_rejected() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["D9"]), None).await.unwrap();

        let err = f.coordinator.complete(&f.show_id, &s1).await.unwrap_err();
        assert_eq!(err.kind(), "INVALID_TRANSITION");
    }

    #[tokio::test]
    async fn test_prune_finished_drops_old_terminal_reservations() {
        let f = fixture();
        f.coordinator.select(&f.show_id, &session("S1"), &seats(&["A7"]), None).await.unwrap();
        f.coordinator.cancel(&f.show_id, &session("S1")).await.unwrap();
        f.coordinator.select(&f.show_id, &session("S2"), &seats(&["A8"]), Some(900)).await.unwrap();

        assert_eq!(f.coordinator.prune_finished(Duration::minutes(10)), 0);
        f.clock.advance(Duration::minutes(11));
        assert_eq!(f.coordinator.prune_finished(Duration::minutes(10)), 1);
        assert_eq!(f.coordinator.reservation_count(), 1);
    }

    /// Lock manager whose confirm always hits a storage failure.
    struct BrokenStorage {
        inner: Arc<InMemoryLockManager>,
    }

    #[async_trait]
    impl LockManager for BrokenStorage {
        async fn acquire(&self, show_id: &ShowId, seats: &[SeatId], session_id: &SessionId, ttl: u64) -> Result<Grant, LockError> {
            self.inner.acquire(show_id, seats, session_id, ttl).await
        }

        async fn release(&self, show_id: &ShowId, seats: &[SeatId], session_id: &SessionId) -> Result<Vec<SeatId>, LockError> {
            self.inner.release(show_id, seats, session_id).await
        }

        async fn confirm(
            &self,
            _show_id: &ShowId,
            _seats: &[SeatId],
            _session_id: &SessionId,
            _draft: BookingDraft,
        ) -> Result<Booking, LockError> {
            Err(LockError::Storage("connection reset".to_string()))
        }

        async fn expire(&self, show_id: &ShowId) -> Result<Vec<SeatId>, LockError> {
            self.inner.expire(show_id).await
        }

        async fn seat_map(&self, show_id: &ShowId) -> Result<SeatMap, LockError> {
            self.inner.seat_map(show_id).await
        }

        async fn shows(&self) -> Result<Vec<ShowId>, LockError> {
            self.inner.shows().await
        }
    }

    #[tokio::test]
    async fn test_storage_failure_on_confirm_releases_seats() {
        let f = fixture();
        let coordinator = BookingCoordinator::new(
            Arc::new(BrokenStorage { inner: f.locks.clone() }),
            Arc::new(PaymentOrchestrator::new(f.gateway.clone())),
            f.pricing.clone(),
            Arc::new(LogEventPublisher),
            f.clock.clone(),
            CoordinatorSettings::default(),
        );
        let s1 = session("S1");
        coordinator.select(&f.show_id, &s1, &seats(&["E5"]), None).await.unwrap();
        coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        let err = coordinator.complete(&f.show_id, &s1).await.unwrap_err();
        assert_eq!(err.kind(), "UPSTREAM_FAILURE");
        assert!(!err.to_string().contains("connection reset"));
        assert!(!f.locks.inventory().is_locked(&f.show_id, &seats(&["E5"])[0]).await);
        assert_eq!(coordinator.reservation(&f.show_id, &s1).await.unwrap().state, ReservationState::Released);
    }

    #[tokio::test]
    async fn test_cancel_after_partial_lapse_frees_later_seats() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["A1", "A2"]), Some(300)).await.unwrap();
        f.clock.advance(Duration::seconds(200));
        // A2 keeps its first expiry, A3 runs until 500s.
        f.coordinator.select(&f.show_id, &s1, &seats(&["A2", "A3"]), Some(300)).await.unwrap();
        f.clock.advance(Duration::seconds(101));

        let cancelled = f.coordinator.cancel(&f.show_id, &s1).await.unwrap();
        assert_eq!(cancelled.state, ReservationState::Expired);
        assert!(f.locks.inventory().lock_holder(&f.show_id, &seats(&["A3"])[0]).await.is_none());

        let r = f.coordinator.select(&f.show_id, &session("S2"), &seats(&["A3"]), None).await.unwrap();
        assert_eq!(r.state, ReservationState::Locked);
    }

    #[tokio::test]
    async fn test_cancel_on_already_expired_reservation_still_releases() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["B4"]), Some(300)).await.unwrap();
        f.clock.advance(Duration::seconds(250));
        f.coordinator.select(&f.show_id, &s1, &seats(&["B4", "B5"]), Some(300)).await.unwrap();
        f.clock.advance(Duration::seconds(60));

        // Abandoned: the maintenance pass expires it and gives up B5.
        assert_eq!(f.coordinator.settle_lapsed().await, 1);
        assert!(!f.locks.inventory().is_locked(&f.show_id, &seats(&["B5"])[0]).await);
        assert_eq!(f.coordinator.settle_lapsed().await, 0);

        let cancelled = f.coordinator.cancel(&f.show_id, &s1).await.unwrap();
        assert_eq!(cancelled.state, ReservationState::Expired);
        f.coordinator.select(&f.show_id, &session("S2"), &seats(&["B5"]), None).await.unwrap();
    }

    #[tokio::test]
    async fn test_late_callback_for_replaced_reservation_is_ignored() {
        let f = fixture();
        let s1 = session("S1");
        f.coordinator.select(&f.show_id, &s1, &seats(&["C4"]), None).await.unwrap();
        let first = f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();
        f.coordinator.cancel(&f.show_id, &s1).await.unwrap();

        f.coordinator.select(&f.show_id, &s1, &seats(&["C5"]), None).await.unwrap();
        f.coordinator.start_payment(&f.show_id, &s1, user()).await.unwrap();

        let old_intent = first.payment_intent_id.unwrap();
        let err = f.coordinator.handle_payment_result(&old_intent).await.unwrap_err();
        assert_eq!(err.kind(), "NO_RESERVATION");
        assert_eq!(
            f.coordinator.reservation(&f.show_id, &s1).await.unwrap().state,
            ReservationState::AwaitingPayment
        );
        assert_eq!(f.bookings.count().await, 0);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_sessions_one_winner() {
        let f = fixture();
        let tasks = (0..8).map(|i| {
            let coordinator = f.coordinator.clone();
            let show_id = f.show_id.clone();
            tokio::spawn(async move {
                coordinator
                    .select(&show_id, &session(&format!("S{}", i)), &seats(&["C7", "C8"]), None)
                    .await
            })
        });

        let results = futures_util::future::join_all(tasks).await;
        let winners = results.into_iter().map(|r| r.unwrap()).filter(|r| r.is_ok()).count();
        assert_eq!(winners, 1);
    }
}
