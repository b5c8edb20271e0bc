use boxoffice_shared::Masked;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::ids::{SeatId, SessionId, ShowId, UserId};
use crate::payment::PaymentStatus;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum BookingStatus {
    Confirmed,
    /// Set by an external refund/cancellation policy. Seats stay booked.
    Cancelled,
}

impl BookingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BookingStatus::Confirmed => "CONFIRMED",
            BookingStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn parse(raw: &str) -> Option<Self> {
        match raw {
            "CONFIRMED" => Some(BookingStatus::Confirmed),
            "CANCELLED" => Some(BookingStatus::Cancelled),
            _ => None,
        }
    }
}

/// Durable record of purchased seats. The seat list never changes after creation.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Booking {
    pub booking_id: Uuid,
    pub show_id: ShowId,
    pub user_id: Masked<UserId>,
    pub session_id: SessionId,
    pub seats: Vec<SeatId>,
    pub total_amount: i64,
    pub currency: String,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub payment_intent_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Caller-supplied part of a booking. Seats, amount and timestamps are filled
/// in by the lock manager from the locks being converted.
#[derive(Debug, Clone)]
pub struct BookingDraft {
    pub user_id: UserId,
    pub currency: String,
    pub payment_intent_id: Option<String>,
    pub payment_status: PaymentStatus,
}

impl Booking {
    pub fn from_draft(
        draft: BookingDraft,
        show_id: ShowId,
        session_id: SessionId,
        seats: Vec<SeatId>,
        total_amount: i64,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            booking_id: Uuid::new_v4(),
            show_id,
            user_id: Masked(draft.user_id),
            session_id,
            seats,
            total_amount,
            currency: draft.currency,
            status: BookingStatus::Confirmed,
            payment_status: draft.payment_status,
            payment_intent_id: draft.payment_intent_id,
            created_at: now,
            updated_at: now,
        }
    }

    /// The only mutation a booking accepts after creation.
    pub fn update_payment_status(&mut self, status: PaymentStatus, now: DateTime<Utc>) {
        if status == PaymentStatus::Refunded {
            self.status = BookingStatus::Cancelled;
        }
        self.payment_status = status;
        self.updated_at = now;
    }
}
