use anyhow::{anyhow, bail, Context};
use boxoffice_booking::{CoordinatorSettings, MockPaymentGateway};
use boxoffice_catalog::{PriceList, PricingEngine, ShowCatalog};
use boxoffice_core::events::{EventPublisher, LogEventPublisher};
use boxoffice_core::repository::{BookingRepository, InMemoryBookingRepository, ShowRepository};
use boxoffice_core::{Clock, LockManager, SeatCategory, SeatId, ShowId, SystemClock};
use boxoffice_hold::InMemoryLockManager;
use boxoffice_store::app_config::{Config, LockBackend, PricingConfig};
use boxoffice_store::{DbClient, PgBookingRepository, PgShowRepository, RedisLockManager};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

use crate::state::{AppState, Components};

/// Connects the configured backends and builds the app state.
///
/// With a database, shows, booked seats and price overrides are loaded
/// before the first request is served.
pub async fn build_state(config: &Config) -> anyhow::Result<AppState> {
    let clock: Arc<dyn Clock> = Arc::new(SystemClock);
    let catalog = Arc::new(ShowCatalog::new());
    let pricing = Arc::new(PricingEngine::new(price_list(&config.pricing)?)?);

    let (db, bookings, shows) = match &config.database.url {
        Some(url) => {
            let db = Arc::new(DbClient::new(url).await.context("Failed to connect to Postgres")?);
            db.migrate().await?;
            let bookings: Arc<dyn BookingRepository> = Arc::new(PgBookingRepository::new(db.pool.clone()));
            let shows: Arc<dyn ShowRepository> = Arc::new(PgShowRepository::new(db.pool.clone()));
            (Some(db), bookings, Some(shows))
        }
        None => {
            warn!("No database configured, bookings and shows are kept in memory");
            let bookings: Arc<dyn BookingRepository> = Arc::new(InMemoryBookingRepository::new());
            (None, bookings, None)
        }
    };

    if let Some(shows) = &shows {
        let loaded = shows.load_shows().await.map_err(|e| anyhow!("Failed to load shows: {}", e))?;
        for show in loaded {
            catalog.register(show)?;
        }
        info!("Loaded {} shows", catalog.len());
    }

    if let Some(db) = &db {
        apply_price_overrides(db, &pricing).await?;
    }

    let locks: Arc<dyn LockManager> = match config.locks.backend {
        LockBackend::Memory => {
            let locks = Arc::new(InMemoryLockManager::new(
                catalog.clone(),
                pricing.clone(),
                bookings.clone(),
                clock.clone(),
            ));
            for (show_id, seats) in booked_seats(&catalog, bookings.as_ref()).await? {
                locks.restore_booked(&show_id, &seats).await;
            }
            info!("Using in-memory seat locks");
            locks
        }
        LockBackend::Redis => {
            let url = config
                .redis
                .url
                .as_deref()
                .context("locks.backend = \"redis\" requires redis.url")?;
            let locks = Arc::new(RedisLockManager::new(
                url,
                catalog.clone(),
                pricing.clone(),
                bookings.clone(),
                clock.clone(),
            )?);
            for (show_id, seats) in booked_seats(&catalog, bookings.as_ref()).await? {
                locks.restore_booked(&show_id, &seats).await?;
            }
            info!("Using Redis seat locks");
            locks
        }
    };

    info!("Using mock payment gateway");
    let components = Components {
        catalog,
        pricing,
        locks,
        bookings,
        shows,
        db,
        gateway: Arc::new(MockPaymentGateway::new()),
        publisher: event_publisher(config)?,
        clock,
        settings: CoordinatorSettings {
            default_ttl_seconds: config.locks.default_ttl_seconds,
            max_ttl_seconds: config.locks.max_ttl_seconds,
            max_seats_per_request: config.locks.max_seats_per_request,
        },
        failure_threshold: config.resiliency.failure_threshold as usize,
        reset_timeout: Duration::from_secs(config.resiliency.reset_timeout_seconds),
    };

    Ok(AppState::new(components)?)
}

/// Configured prices keyed by category name, matched case-insensitively.
pub fn price_list(config: &PricingConfig) -> anyhow::Result<PriceList> {
    let mut prices = BTreeMap::new();
    for (name, price) in &config.prices {
        let Some(category) = SeatCategory::parse(name) else {
            bail!("Unknown seat category in pricing.prices: {}", name);
        };
        prices.insert(category, *price);
    }
    let list = PriceList { currency: config.currency.to_ascii_uppercase(), prices };
    list.validate()?;
    Ok(list)
}

async fn apply_price_overrides(db: &DbClient, pricing: &PricingEngine) -> anyhow::Result<()> {
    let overrides = db.fetch_price_overrides().await?;
    if overrides.is_empty() {
        return Ok(());
    }

    let mut list = pricing.snapshot();
    for (name, price) in overrides {
        match SeatCategory::parse(&name) {
            Some(category) => {
                list.prices.insert(category, price);
            }
            None => warn!("Ignoring stored price for unknown category {}", name),
        }
    }
    pricing.update(list)?;
    Ok(())
}

/// Seats of every stored booking, per registered show. Cancelled bookings
/// still hold their seats.
async fn booked_seats(
    catalog: &ShowCatalog,
    bookings: &dyn BookingRepository,
) -> anyhow::Result<Vec<(ShowId, Vec<SeatId>)>> {
    let mut result = Vec::new();
    for show_id in catalog.ids() {
        let stored = bookings
            .list_for_show(&show_id)
            .await
            .map_err(|e| anyhow!("Failed to load bookings for {}: {}", show_id, e))?;
        let seats: Vec<SeatId> = stored.into_iter().flat_map(|b| b.seats).collect();
        if !seats.is_empty() {
            result.push((show_id, seats));
        }
    }
    Ok(result)
}

#[cfg(feature = "kafka")]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    if let Some(brokers) = &config.kafka.brokers {
        let producer = boxoffice_store::EventProducer::new(brokers).context("Failed to create Kafka producer")?;
        info!("Publishing events to Kafka at {}", brokers);
        return Ok(Arc::new(producer));
    }
    Ok(Arc::new(LogEventPublisher))
}

#[cfg(not(feature = "kafka"))]
fn event_publisher(config: &Config) -> anyhow::Result<Arc<dyn EventPublisher>> {
    if config.kafka.brokers.is_some() {
        warn!("kafka.brokers is set but the kafka feature is disabled, events are only logged");
    }
    Ok(Arc::new(LogEventPublisher))
}
