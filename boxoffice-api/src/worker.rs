use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::state::AppState;

/// One maintenance pass: sweep lapsed locks, expire abandoned reservations,
/// then forget old finished ones. Returns the number of seats freed.
pub async fn run_maintenance(state: &AppState, retention: chrono::Duration) -> usize {
    let report = state.reaper.sweep_once().await;
    let freed = report.total_freed();
    if report.failed_shows > 0 {
        warn!("Expiry sweep failed for {} shows, will retry next pass", report.failed_shows);
    }

    let settled = state.coordinator.settle_lapsed().await;
    if settled > 0 {
        debug!("Expired {} abandoned reservations", settled);
    }

    let pruned = state.coordinator.prune_finished(retention);
    if pruned > 0 {
        debug!("Pruned {} finished reservations", pruned);
    }
    freed
}

/// Spawns the periodic sweep. Lock expiry never waits for it; the sweep only
/// reclaims state and emits `seats.expired`.
pub fn start_expiry_worker(state: AppState, every: Duration, retention: chrono::Duration) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!("Expiry worker started, sweeping every {:?}", every);
        let mut ticker = interval(every);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            ticker.tick().await;
            run_maintenance(&state, retention).await;
        }
    })
}
