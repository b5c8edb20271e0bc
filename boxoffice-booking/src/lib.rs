pub mod coordinator;
pub mod models;
pub mod orchestrator;

pub use coordinator::{BookingCoordinator, CompletionOutcome, CoordinatorError, CoordinatorSettings, ReleaseOutcome};
pub use models::{Reservation, ReservationState, ReservedSeat};
pub use orchestrator::{MockPaymentGateway, PaymentOrchestrator};
