use boxoffice_booking::{BookingCoordinator, CoordinatorSettings, PaymentOrchestrator};
use boxoffice_catalog::{PricingEngine, ShowCatalog};
use boxoffice_core::events::EventPublisher;
use boxoffice_core::repository::{BookingRepository, ShowRepository};
use boxoffice_core::{Clock, LockManager, PaymentGateway};
use boxoffice_hold::ExpiryReaper;
use boxoffice_store::DbClient;
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::{Metrics, MeteredPublisher};
use crate::middleware::ResiliencyState;

/// Everything the app needs, before it is wired together.
pub struct Components {
    pub catalog: Arc<ShowCatalog>,
    pub pricing: Arc<PricingEngine>,
    pub locks: Arc<dyn LockManager>,
    pub bookings: Arc<dyn BookingRepository>,
    /// Present when shows are persisted.
    pub shows: Option<Arc<dyn ShowRepository>>,
    pub db: Option<Arc<DbClient>>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub publisher: Arc<dyn EventPublisher>,
    pub clock: Arc<dyn Clock>,
    pub settings: CoordinatorSettings,
    pub failure_threshold: usize,
    pub reset_timeout: Duration,
}

#[derive(Clone)]
pub struct AppState {
    pub coordinator: Arc<BookingCoordinator>,
    pub reaper: Arc<ExpiryReaper>,
    pub locks: Arc<dyn LockManager>,
    pub catalog: Arc<ShowCatalog>,
    pub pricing: Arc<PricingEngine>,
    pub bookings: Arc<dyn BookingRepository>,
    pub shows: Option<Arc<dyn ShowRepository>>,
    pub db: Option<Arc<DbClient>>,
    pub metrics: Arc<Metrics>,
    pub resiliency: Arc<ResiliencyState>,
}

impl AppState {
    pub fn new(components: Components) -> Result<Self, prometheus::Error> {
        let metrics = Arc::new(Metrics::new()?);
        let publisher: Arc<dyn EventPublisher> =
            Arc::new(MeteredPublisher::new(components.publisher, metrics.clone()));

        let coordinator = Arc::new(BookingCoordinator::new(
            components.locks.clone(),
            Arc::new(PaymentOrchestrator::new(components.gateway)),
            components.pricing.clone(),
            publisher.clone(),
            components.clock.clone(),
            components.settings,
        ));
        let reaper = Arc::new(ExpiryReaper::new(
            components.locks.clone(),
            publisher,
            components.clock,
        ));

        Ok(Self {
            coordinator,
            reaper,
            locks: components.locks,
            catalog: components.catalog,
            pricing: components.pricing,
            bookings: components.bookings,
            shows: components.shows,
            db: components.db,
            metrics,
            resiliency: Arc::new(ResiliencyState::new(
                components.failure_threshold,
                components.reset_timeout,
            )),
        })
    }
}
