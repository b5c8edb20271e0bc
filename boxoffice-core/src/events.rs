use async_trait::async_trait;
use serde::Serialize;
use tracing::{info, warn};

use crate::BoxError;

/// Outbound channel for domain events (Kafka in production).
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BoxError>;
}

/// Publisher that only writes events to the log.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogEventPublisher;

#[async_trait]
impl EventPublisher for LogEventPublisher {
    async fn publish(&self, topic: &str, key: &str, payload: &str) -> Result<(), BoxError> {
        info!(topic, key, payload, "event");
        Ok(())
    }
}

/// Serializes and publishes an event. Failures are logged, never propagated:
/// events are a side channel and must not undo a committed seat transition.
pub async fn publish_event<E: Serialize>(
    publisher: &dyn EventPublisher,
    topic: &str,
    key: &str,
    event: &E,
) {
    let payload = match serde_json::to_string(event) {
        Ok(payload) => payload,
        Err(e) => {
            warn!("Failed to serialize {} event: {}", topic, e);
            return;
        }
    };

    if let Err(e) = publisher.publish(topic, key, &payload).await {
        warn!("Failed to publish {} event for {}: {}", topic, key, e);
    }
}
