use anyhow::Context;
use boxoffice_api::{app, bootstrap, worker};
use std::net::SocketAddr;
use std::time::Duration;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "boxoffice_api=debug,tower_http=debug,axum::rejection=trace".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = boxoffice_store::app_config::Config::load().context("Failed to load config")?;
    tracing::info!("Starting BoxOffice API on port {}", config.server.port);

    let app_state = bootstrap::build_state(&config).await?;

    worker::start_expiry_worker(
        app_state.clone(),
        Duration::from_secs(config.locks.reaper_interval_seconds.max(1)),
        chrono::Duration::seconds(config.locks.reservation_retention_seconds as i64),
    );

    let app = app(app_state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}
