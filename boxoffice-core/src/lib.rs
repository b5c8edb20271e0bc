pub mod booking;
pub mod clock;
pub mod events;
pub mod ids;
pub mod lock;
pub mod payment;
pub mod repository;
pub mod show;

pub use booking::{Booking, BookingDraft, BookingStatus};
pub use clock::{Clock, ManualClock, SystemClock};
pub use ids::{SeatId, SessionId, ShowId, UserId};
pub use lock::{Grant, GrantedSeat, Lock, LockError, LockManager, SeatConflict, SeatMap};
pub use payment::{PaymentGateway, PaymentIntent, PaymentStatus};
pub use show::{SeatCategory, Show, ShowLayout};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CoreError {
    #[error("Validation failed: {0}")]
    ValidationError(String),
}

pub type CoreResult<T> = Result<T, CoreError>;

/// Boxed error used at trait seams toward storage and external providers.
pub type BoxError = Box<dyn std::error::Error + Send + Sync>;
