use boxoffice_core::events::{publish_event, EventPublisher};
use boxoffice_core::{Clock, LockManager, SeatId, ShowId};
use boxoffice_shared::models::events::{topics, SeatsExpiredEvent};
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::{debug, error, info};

/// What one sweep freed, per show.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SweepReport {
    pub freed: BTreeMap<ShowId, Vec<SeatId>>,
    pub failed_shows: usize,
}

impl SweepReport {
    pub fn total_freed(&self) -> usize {
        self.freed.values().map(Vec::len).sum()
    }
}

/// Periodic cleanup of lapsed locks.
///
/// Correctness never depends on this running: every read and every
/// transition already treats an expired lock as absent. The sweep only
/// reclaims memory and emits `seats.expired` for downstream consumers.
pub struct ExpiryReaper {
    locks: Arc<dyn LockManager>,
    publisher: Arc<dyn EventPublisher>,
    clock: Arc<dyn Clock>,
}

impl ExpiryReaper {
    pub fn new(
        locks: Arc<dyn LockManager>,
        publisher: Arc<dyn EventPublisher>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { locks, publisher, clock }
    }

    pub async fn sweep_once(&self) -> SweepReport {
        let mut report = SweepReport::default();

        let shows = match self.locks.shows().await {
            Ok(shows) => shows,
            Err(e) => {
                error!("Expiry sweep could not list shows: {}", e);
                return report;
            }
        };

        for show_id in shows {
            match self.locks.expire(&show_id).await {
                Ok(seats) if seats.is_empty() => {}
                Ok(seats) => {
                    let event = SeatsExpiredEvent {
                        show_id: show_id.to_string(),
                        seats: seats.iter().map(|s| s.to_string()).collect(),
                        expired_at: self.clock.now().timestamp(),
                    };
                    publish_event(
                        self.publisher.as_ref(),
                        topics::SEATS_EXPIRED,
                        show_id.as_str(),
                        &event,
                    )
                    .await;
                    report.freed.insert(show_id, seats);
                }
                Err(e) => {
                    error!(show = %show_id, "Expiry sweep failed: {}", e);
                    report.failed_shows += 1;
                }
            }
        }

        if report.total_freed() > 0 {
            info!("Expiry sweep freed {} seats across {} shows", report.total_freed(), report.freed.len());
        } else {
            debug!("Expiry sweep found nothing to free");
        }
        report
    }
}
