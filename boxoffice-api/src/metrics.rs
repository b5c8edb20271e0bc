use async_trait::async_trait;
use boxoffice_core::events::EventPublisher;
use boxoffice_core::BoxError;
use boxoffice_shared::models::events::topics;
use prometheus::{IntCounter, Registry, TextEncoder};
use std::sync::Arc;

/// Seat and booking counters exported at `/metrics`.
///
/// Each instance owns its registry, so several app instances (tests) can
/// live in one process.
pub struct Metrics {
    registry: Registry,
    pub seats_locked: IntCounter,
    pub lock_conflicts: IntCounter,
    pub seats_released: IntCounter,
    pub seats_expired: IntCounter,
    pub bookings_confirmed: IntCounter,
}

impl Metrics {
    pub fn new() -> Result<Self, prometheus::Error> {
        let registry = Registry::new();

        let seats_locked = IntCounter::new("boxoffice_seats_locked_total", "Seats granted to a session lock")?;
        let lock_conflicts = IntCounter::new(
            "boxoffice_lock_conflicts_total",
            "Lock requests rejected because a seat was booked or locked",
        )?;
        let seats_released = IntCounter::new("boxoffice_seats_released_total", "Seats released before expiry")?;
        let seats_expired = IntCounter::new("boxoffice_seats_expired_total", "Seats freed by the expiry sweep")?;
        let bookings_confirmed = IntCounter::new("boxoffice_bookings_confirmed_total", "Bookings created")?;

        registry.register(Box::new(seats_locked.clone()))?;
        registry.register(Box::new(lock_conflicts.clone()))?;
        registry.register(Box::new(seats_released.clone()))?;
        registry.register(Box::new(seats_expired.clone()))?;
        registry.register(Box::new(bookings_confirmed.clone()))?;

        Ok(Self {
            registry,
            seats_locked,
            lock_conflicts,
            seats_released,
            seats_expired,
            bookings_confirmed,
        })
    }

    /// Prometheus text exposition format.
    pub fn render(&self) -> Result<String, prometheus::Error> {
        TextEncoder::new()
            .encode_to_string(&self.registry.gather())
            .map_err(|e| prometheus::Error::Msg(e.to_string()))
    }

    fn observe_event(&self, topic: &str, payload: &str) {
        match topic {
            topics::SEATS_LOCKED => self.seats_locked.inc_by(seat_count(payload)),
            topics::SEATS_RELEASED => self.seats_released.inc_by(seat_count(payload)),
            topics::SEATS_EXPIRED => self.seats_expired.inc_by(seat_count(payload)),
            topics::BOOKING_CONFIRMED => self.bookings_confirmed.inc(),
            _ => {}
        }
    }
}

fn seat_count(payload: &str) -> u64 {
    serde_json::from_str::<serde_json::Value>(payload)
        .ok()
        .and_then(|v| v.get("seats").and_then(|s| s.as_array()).map(|s| s.len() as u64))
        .unwrap_or(0)
}

/// Counts domain events on their way to the real publisher.
pub struct MeteredPublisher {
    inner: Arc<dyn EventPublisher>,
    metrics: Arc<Metrics>,
}

impl MeteredPublisher {
    pub fn new(inner: Arc<dyn EventPublisher>, metrics: Arc<Metrics>) -> Self {
        Self { inner, metrics }
    }
}

#[async_trait]
impl EventPublisher for MeteredPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BoxError> {
        self.metrics.observe_event(topic, payload);
        self.inner.publish(topic, key, payload).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use boxoffice_core::events::LogEventPublisher;

    #[tokio::test]
    async fn test_events_feed_counters() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let publisher = MeteredPublisher::new(Arc::new(LogEventPublisher), metrics.clone());

        publisher
            .publish(topics::SEATS_LOCKED, "SH1", r#"{"seats":["D5","D6"]}"#)
            .await
            .unwrap();
        publisher
            .publish(topics::SEATS_EXPIRED, "SH1", r#"{"seats":["D5"]}"#)
            .await
            .unwrap();
        publisher.publish(topics::BOOKING_CONFIRMED, "SH1", "{}").await.unwrap();

        assert_eq!(metrics.seats_locked.get(), 2);
        assert_eq!(metrics.seats_expired.get(), 1);
        assert_eq!(metrics.bookings_confirmed.get(), 1);

        let text = metrics.render().unwrap();
        assert!(text.contains("boxoffice_seats_locked_total 2"));
    }
}
