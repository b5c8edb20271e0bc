use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::booking::{Booking, BookingDraft};
use crate::ids::{SeatId, SessionId, ShowId};
use crate::show::ShowLayout;

/// Default hold duration when the caller does not ask for one.
pub const DEFAULT_TTL_SECONDS: u64 = 300;

/// How long a lapsed lock is remembered so a late `confirm` from its former
/// owner is answered with `Expired` instead of `NotOwner`.
pub const LAPSE_RETENTION_SECONDS: i64 = 3600;

/// Time-bounded claim on one seat by one session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Lock {
    pub show_id: ShowId,
    pub seat_id: SeatId,
    pub session_id: SessionId,
    pub expires_at: DateTime<Utc>,
    /// Price in minor units, fixed when the lock was taken.
    pub price: i64,
}

impl Lock {
    pub fn is_live(&self, now: DateTime<Utc>) -> bool {
        self.expires_at > now
    }

    pub fn is_owned_by(&self, session_id: &SessionId) -> bool {
        &self.session_id == session_id
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GrantedSeat {
    pub seat_id: SeatId,
    pub price: i64,
    pub expires_at: DateTime<Utc>,
    /// `false` when the session already held a live lock on this seat.
    pub newly_locked: bool,
}

/// Successful `acquire`: every requested seat is now held by the session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Grant {
    pub show_id: ShowId,
    pub session_id: SessionId,
    pub seats: Vec<GrantedSeat>,
}

impl Grant {
    pub fn seat_ids(&self) -> Vec<SeatId> {
        self.seats.iter().map(|s| s.seat_id.clone()).collect()
    }

    pub fn newly_locked(&self) -> Vec<SeatId> {
        self.seats
            .iter()
            .filter(|s| s.newly_locked)
            .map(|s| s.seat_id.clone())
            .collect()
    }

    pub fn total_amount(&self) -> i64 {
        self.seats.iter().map(|s| s.price).sum()
    }

    /// The hold is only as good as its earliest-expiring seat.
    pub fn expires_at(&self) -> Option<DateTime<Utc>> {
        self.seats.iter().map(|s| s.expires_at).min()
    }
}

/// Seats that blocked an `acquire`, partitioned by cause.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatConflict {
    pub already_booked: Vec<SeatId>,
    pub already_locked: Vec<SeatId>,
}

impl SeatConflict {
    pub fn is_empty(&self) -> bool {
        self.already_booked.is_empty() && self.already_locked.is_empty()
    }
}

impl std::fmt::Display for SeatConflict {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "booked [{}], locked [{}]",
            join(&self.already_booked),
            join(&self.already_locked)
        )
    }
}

pub(crate) fn join(seats: &[SeatId]) -> String {
    seats.iter().map(|s| s.to_string()).collect::<Vec<_>>().join(", ")
}

/// Point-in-time view of one show's seats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SeatMap {
    pub show_id: ShowId,
    pub capacity: usize,
    pub booked: Vec<SeatId>,
    pub locked: Vec<SeatId>,
    pub free: usize,
}

impl SeatMap {
    pub fn new(show_id: ShowId, capacity: usize, mut booked: Vec<SeatId>, mut locked: Vec<SeatId>) -> Self {
        booked.sort();
        locked.sort();
        let free = capacity.saturating_sub(booked.len() + locked.len());
        Self { show_id, capacity, booked, locked, free }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LockError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Unknown show: {0}")]
    UnknownShow(ShowId),

    #[error("Seats unavailable: {0}")]
    Conflict(SeatConflict),

    #[error("Lock expired for seats: {}", join(.seats))]
    Expired { seats: Vec<SeatId> },

    #[error("Seats not locked by this session: {}", join(.seats))]
    NotOwner { seats: Vec<SeatId> },

    #[error("Storage failure: {0}")]
    Storage(String),
}

/// Checks a seat batch against the room before any shared state is touched.
pub fn validate_batch(layout: &ShowLayout, seats: &[SeatId]) -> Result<(), LockError> {
    if seats.is_empty() {
        return Err(LockError::InvalidInput("seat list must not be empty".to_string()));
    }

    for (i, seat) in seats.iter().enumerate() {
        if !layout.contains(seat) {
            return Err(LockError::InvalidInput(format!("seat {} does not exist in this show", seat)));
        }
        if seats[..i].contains(seat) {
            return Err(LockError::InvalidInput(format!("duplicate seat id: {}", seat)));
        }
    }
    Ok(())
}

/// Sole writer of a show's lock set and booked set.
///
/// Implementations serialize every operation on one show; operations on
/// different shows may run in parallel. Expiry is always decided by comparing
/// `expires_at` with the clock, never by whether a sweep has run.
#[async_trait]
pub trait LockManager: Send + Sync {
    /// Locks the whole batch or nothing. Seats the session already holds are
    /// accepted as-is and keep their original expiry.
    async fn acquire(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
        ttl_seconds: u64,
    ) -> Result<Grant, LockError>;

    /// Drops the session's locks on `seats` and returns the seats actually freed.
    /// Seats the session does not hold are skipped silently.
    async fn release(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
    ) -> Result<Vec<SeatId>, LockError>;

    /// Converts the session's live locks into a persisted booking atomically.
    async fn confirm(
        &self,
        show_id: &ShowId,
        seats: &[SeatId],
        session_id: &SessionId,
        draft: BookingDraft,
    ) -> Result<Booking, LockError>;

    /// Removes every lock whose expiry has passed and returns the freed seats.
    async fn expire(&self, show_id: &ShowId) -> Result<Vec<SeatId>, LockError>;

    async fn seat_map(&self, show_id: &ShowId) -> Result<SeatMap, LockError>;

    /// Shows the expiry sweep should visit.
    async fn shows(&self) -> Result<Vec<ShowId>, LockError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    fn seat(s: &str) -> SeatId {
        SeatId::parse(s).unwrap()
    }

    #[test]
    fn test_validate_batch() {
        let layout = ShowLayout::new(4, 6).unwrap();

        assert!(validate_batch(&layout, &[seat("A1"), seat("D6")]).is_ok());
        assert!(matches!(validate_batch(&layout, &[]), Err(LockError::InvalidInput(_))));
        assert!(matches!(validate_batch(&layout, &[seat("E1")]), Err(LockError::InvalidInput(_))));
        assert!(matches!(
            validate_batch(&layout, &[seat("A1"), seat("A1")]),
            Err(LockError::InvalidInput(_))
        ));
    }

    #[test]
    fn test_grant_totals_and_expiry() {
        let now = Utc::now();
        let grant = Grant {
            show_id: ShowId::parse("SH1").unwrap(),
            session_id: SessionId::parse("S1").unwrap(),
            seats: vec![
                GrantedSeat { seat_id: seat("A1"), price: 900, expires_at: now, newly_locked: false },
                GrantedSeat {
                    seat_id: seat("A2"),
                    price: 1200,
                    expires_at: now + chrono::Duration::seconds(60),
                    newly_locked: true,
                },
            ],
        };

        assert_eq!(grant.total_amount(), 2100);
        assert_eq!(grant.expires_at(), Some(now));
        assert_eq!(grant.newly_locked(), vec![seat("A2")]);
    }

    #[test]
    fn test_seat_map_counts_free_seats() {
        let map = SeatMap::new(
            ShowId::parse("SH1").unwrap(),
            10,
            vec![seat("A2"), seat("A1")],
            vec![seat("B1")],
        );
        assert_eq!(map.free, 7);
        assert_eq!(map.booked, vec![seat("A1"), seat("A2")]);
    }
}
