use boxoffice_core::{Clock, Lock, SeatId, SeatMap, SessionId, Show, ShowId};
use chrono::{DateTime, Utc};
use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use tokio::sync::Mutex;

/// Everything mutable about one show. Only reachable through the show's mutex.
#[derive(Debug, Default)]
pub(crate) struct ShowState {
    pub(crate) booked: BTreeSet<SeatId>,
    pub(crate) locks: HashMap<SeatId, Lock>,
    /// (former owner, seat) -> when the lock lapsed.
    pub(crate) lapsed: HashMap<(SessionId, SeatId), DateTime<Utc>>,
}

impl ShowState {
    pub(crate) fn live_lock(&self, seat: &SeatId, now: DateTime<Utc>) -> Option<&Lock> {
        self.locks.get(seat).filter(|lock| lock.is_live(now))
    }

    pub(crate) fn record_lapse(&mut self, lock: &Lock) {
        self.lapsed
            .insert((lock.session_id.clone(), lock.seat_id.clone()), lock.expires_at);
    }

    pub(crate) fn has_lapsed(&self, session_id: &SessionId, seat: &SeatId) -> bool {
        self.lapsed.contains_key(&(session_id.clone(), seat.clone()))
    }

    pub(crate) fn prune_lapses(&mut self, horizon: DateTime<Utc>) {
        self.lapsed.retain(|_, lapsed_at| *lapsed_at > horizon);
    }
}

/// Per-show seat state: booked set plus active locks.
///
/// Reads here never mutate. All writes go through `InMemoryLockManager`,
/// which takes the same per-show mutex. An expired lock is never reported as
/// locked, whether or not the reaper has removed it yet.
pub struct SeatInventory {
    shows: RwLock<HashMap<ShowId, Arc<Mutex<ShowState>>>>,
    clock: Arc<dyn Clock>,
}

impl SeatInventory {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            shows: RwLock::new(HashMap::new()),
            clock,
        }
    }

    /// The show's state cell, created empty on first use.
    pub(crate) fn cell(&self, show_id: &ShowId) -> Arc<Mutex<ShowState>> {
        if let Some(cell) = self.existing(show_id) {
            return cell;
        }
        let mut shows = self.shows.write().unwrap_or_else(|poisoned| poisoned.into_inner());
        shows.entry(show_id.clone()).or_default().clone()
    }

    fn existing(&self, show_id: &ShowId) -> Option<Arc<Mutex<ShowState>>> {
        self.shows
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(show_id)
            .cloned()
    }

    pub async fn is_booked(&self, show_id: &ShowId, seat: &SeatId) -> bool {
        match self.existing(show_id) {
            Some(cell) => cell.lock().await.booked.contains(seat),
            None => false,
        }
    }

    pub async fn is_locked(&self, show_id: &ShowId, seat: &SeatId) -> bool {
        self.lock_holder(show_id, seat).await.is_some()
    }

    /// The live lock on `seat`, if any.
    pub async fn lock_holder(&self, show_id: &ShowId, seat: &SeatId) -> Option<Lock> {
        let cell = self.existing(show_id)?;
        let now = self.clock.now();
        let state = cell.lock().await;
        state.live_lock(seat, now).cloned()
    }

    pub async fn booked_seats(&self, show_id: &ShowId) -> Vec<SeatId> {
        match self.existing(show_id) {
            Some(cell) => cell.lock().await.booked.iter().cloned().collect(),
            None => Vec::new(),
        }
    }

    pub async fn active_locks(&self, show_id: &ShowId) -> Vec<Lock> {
        let Some(cell) = self.existing(show_id) else {
            return Vec::new();
        };
        let now = self.clock.now();
        let state = cell.lock().await;
        let mut locks: Vec<Lock> = state
            .locks
            .values()
            .filter(|lock| lock.is_live(now))
            .cloned()
            .collect();
        locks.sort_by(|a, b| a.seat_id.cmp(&b.seat_id));
        locks
    }

    pub async fn seat_map(&self, show: &Show) -> SeatMap {
        let booked = self.booked_seats(&show.id).await;
        let locked = self
            .active_locks(&show.id)
            .await
            .into_iter()
            .map(|lock| lock.seat_id)
            .collect();
        SeatMap::new(show.id.clone(), show.layout.capacity(), booked, locked)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::ManualClock;
    use chrono::Duration;

    fn seat(s: &str) -> SeatId {
        SeatId::parse(s).unwrap()
    }

    #[tokio::test]
    async fn test_expired_lock_is_not_reported_as_locked() {
        let clock = Arc::new(ManualClock::at_epoch());
        let inventory = SeatInventory::new(clock.clone());
        let show_id = ShowId::parse("SH1").unwrap();

        {
            let cell = inventory.cell(&show_id);
            let mut state = cell.lock().await;
            state.locks.insert(
                seat("B1"),
                Lock {
                    show_id: show_id.clone(),
                    seat_id: seat("B1"),
                    session_id: SessionId::parse("S1").unwrap(),
                    expires_at: clock.now() + Duration::seconds(1),
                    price: 900,
                },
            );
        }

        assert!(inventory.is_locked(&show_id, &seat("B1")).await);
        assert_eq!(inventory.active_locks(&show_id).await.len(), 1);

        clock.advance(Duration::seconds(2));
        assert!(!inventory.is_locked(&show_id, &seat("B1")).await);
        assert!(inventory.active_locks(&show_id).await.is_empty());
    }

    #[tokio::test]
    async fn test_unknown_show_reads_as_empty() {
        let inventory = SeatInventory::new(Arc::new(ManualClock::at_epoch()));
        let show_id = ShowId::parse("NOPE").unwrap();

        assert!(!inventory.is_booked(&show_id, &seat("A1")).await);
        assert!(inventory.booked_seats(&show_id).await.is_empty());
        assert!(inventory.active_locks(&show_id).await.is_empty());
    }
}
