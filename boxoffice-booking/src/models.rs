use boxoffice_core::{Booking, Grant, PaymentStatus, SeatId, SessionId, ShowId, UserId};
use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::coordinator::CoordinatorError;

/// Where one session's seat selection stands.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReservationState {
    SelectingSeats,
    Locked,
    AwaitingPayment,
    Confirmed,
    Released,
    Expired,
}

impl ReservationState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReservationState::SelectingSeats => "SELECTING_SEATS",
            ReservationState::Locked => "LOCKED",
            ReservationState::AwaitingPayment => "AWAITING_PAYMENT",
            ReservationState::Confirmed => "CONFIRMED",
            ReservationState::Released => "RELEASED",
            ReservationState::Expired => "EXPIRED",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ReservationState::Confirmed | ReservationState::Released | ReservationState::Expired
        )
    }

    /// Holds seats right now, as far as the reservation knows.
    pub fn holds_seats(&self) -> bool {
        matches!(self, ReservationState::Locked | ReservationState::AwaitingPayment)
    }

    fn can_move_to(&self, to: ReservationState) -> bool {
        use ReservationState::*;
        matches!(
            (self, to),
            (SelectingSeats, Locked)
                | (Locked, AwaitingPayment)
                | (AwaitingPayment, Confirmed)
                | (Locked, Released)
                | (AwaitingPayment, Released)
                | (SelectingSeats, Expired)
                | (Locked, Expired)
                | (AwaitingPayment, Expired)
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ReservedSeat {
    pub seat_id: SeatId,
    pub price: i64,
}

/// One session's attempt at buying seats for one show.
///
/// Holds only session-local view state. The authoritative seat state lives
/// behind the `LockManager`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Reservation {
    pub id: Uuid,
    pub show_id: ShowId,
    pub session_id: SessionId,
    pub seats: Vec<ReservedSeat>,
    pub total_amount: i64,
    pub currency: String,
    pub expires_at: DateTime<Utc>,
    pub state: ReservationState,
    pub payment_intent_id: Option<String>,
    pub client_secret: Option<String>,
    pub payment_status: Option<PaymentStatus>,
    pub user_id: Option<Masked<UserId>>,
    pub booking: Option<Booking>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Reservation {
    pub fn new(show_id: ShowId, session_id: SessionId, currency: String, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            show_id,
            session_id,
            seats: Vec::new(),
            total_amount: 0,
            currency,
            expires_at: now,
            state: ReservationState::SelectingSeats,
            payment_intent_id: None,
            client_secret: None,
            payment_status: None,
            user_id: None,
            booking: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.seats.iter().map(|s| s.seat_id.clone()).collect()
    }

    /// Same seats regardless of order.
    pub fn holds_exactly(&self, seats: &[SeatId]) -> bool {
        let mut held = self.seat_ids();
        let mut wanted = seats.to_vec();
        held.sort();
        wanted.sort();
        held == wanted
    }

    /// Takes seats, prices and expiry from a lock grant.
    pub fn apply_grant(&mut self, grant: &Grant, now: DateTime<Utc>) {
        self.seats = grant
            .seats
            .iter()
            .map(|s| ReservedSeat { seat_id: s.seat_id.clone(), price: s.price })
            .collect();
        self.total_amount = grant.total_amount();
        if let Some(expires_at) = grant.expires_at() {
            self.expires_at = expires_at;
        }
        self.updated_at = now;
    }

    pub fn drop_seats(&mut self, seats: &[SeatId], now: DateTime<Utc>) {
        self.seats.retain(|s| !seats.contains(&s.seat_id));
        self.total_amount = self.seats.iter().map(|s| s.price).sum();
        self.updated_at = now;
    }

    pub fn transition(&mut self, to: ReservationState, now: DateTime<Utc>) -> Result<(), CoordinatorError> {
        if !self.state.can_move_to(to) {
            return Err(CoordinatorError::InvalidTransition {
                from: self.state.as_str().to_string(),
                to: to.as_str().to_string(),
            });
        }
        self.state = to;
        self.updated_at = now;
        Ok(())
    }

    /// Marks the reservation expired once its hold has lapsed. Returns whether
    /// it changed.
    pub fn refresh(&mut self, now: DateTime<Utc>) -> bool {
        if !self.state.is_terminal() && self.expires_at <= now {
            self.state = ReservationState::Expired;
            self.updated_at = now;
            return true;
        }
        false
    }
}
