use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Topic names used when publishing seat and booking events.
pub mod topics {
    pub const SEATS_LOCKED: &str = "seats.locked";
    pub const SEATS_RELEASED: &str = "seats.released";
    pub const SEATS_EXPIRED: &str = "seats.expired";
    pub const BOOKING_CONFIRMED: &str = "booking.confirmed";
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeatsLockedEvent {
    pub show_id: String,
    pub session_id: String,
    pub seats: Vec<String>,
    pub total_amount: i64,
    pub expires_at: i64,
    pub locked_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReleaseReason {
    Cancelled,
    PaymentFailed,
    Compensation,
    Reselected,
    /// Live seats given up once the first seat of the hold lapsed.
    Lapsed,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeatsReleasedEvent {
    pub show_id: String,
    pub session_id: String,
    pub seats: Vec<String>,
    pub reason: ReleaseReason,
    pub released_at: i64,
}

/// Emitted by the expiry sweep; sessions are not tracked here since a sweep
/// can free seats of many sessions at once.
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct SeatsExpiredEvent {
    pub show_id: String,
    pub seats: Vec<String>,
    pub expired_at: i64,
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BookingConfirmedEvent {
    pub booking_id: Uuid,
    pub show_id: String,
    pub seats: Vec<String>,
    pub total_amount: i64,
    pub currency: String,
    pub confirmed_at: i64,
}
