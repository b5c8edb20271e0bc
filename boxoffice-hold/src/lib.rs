pub mod expiry;
pub mod inventory;
pub mod lock_manager;

pub use expiry::{ExpiryReaper, SweepReport};
pub use inventory::SeatInventory;
pub use lock_manager::InMemoryLockManager;
