//! trackpull - periodic device data-file puller
//!
//! Pulls the tracking database off attached or network-addressed Android
//! devices over adb, parses it, and serves the results over HTTP.

mod api;
mod config;
mod error;
mod extract;
mod models;
mod records;
mod registry;
mod scheduler;
mod state;
mod transport;

#[cfg(test)]
mod testing;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tower::ServiceBuilder;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::api::ApiState;
use crate::config::Settings;
use crate::extract::{EngineOptions, ExtractionEngine, ExtractionRunner};
use crate::records::SqliteRecordParser;
use crate::scheduler::Scheduler;
use crate::state::{ConfigStore, SharedState};
use crate::transport::AdbTransport;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "trackpull=info,tower_http=debug".into()),
        )
        .init();

    tracing::info!("Starting trackpull...");

    // Process settings, then the persisted runtime config
    let settings = Settings::load()?;
    let shared = Arc::new(SharedState::load(ConfigStore::new(&settings.storage.state_file)).await);

    let transport = Arc::new(AdbTransport::new(settings.device.adb_path.clone()));
    let parser = Arc::new(SqliteRecordParser::new(
        &settings.records.location_table,
        &settings.records.vehicle_table,
    )?);
    let engine = Arc::new(ExtractionEngine::new(
        transport,
        parser,
        EngineOptions::from_settings(&settings),
    ));
    let runner = Arc::new(ExtractionRunner::new(shared.clone(), engine));

    // Scheduler runs until shutdown is signalled
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = Arc::new(Scheduler::new(
        shared.clone(),
        runner.clone(),
        Duration::from_secs(settings.scheduler.cooldown_secs),
    ));
    let scheduler_task = tokio::spawn(scheduler.start(shutdown_rx));

    let config = shared.config().await;
    if config.webhook_enabled {
        let app = api::routes()
            .with_state(ApiState {
                shared: shared.clone(),
                runner,
            })
            .layer(
                ServiceBuilder::new()
                    .layer(TraceLayer::new_for_http())
                    .layer(CorsLayer::permissive()),
            );

        let host: std::net::IpAddr = settings.server.host.parse()?;
        let port = settings.server.port.unwrap_or(config.webhook_port);
        let addr = SocketAddr::new(host, port);
        tracing::info!("Listening on {}", addr);

        let listener = tokio::net::TcpListener::bind(addr).await?;
        axum::serve(listener, app)
            .with_graceful_shutdown(shutdown_signal())
            .await?;
    } else {
        tracing::info!("HTTP control surface disabled; scheduler only");
        shutdown_signal().await;
    }

    tracing::info!("Shutting down...");
    let _ = shutdown_tx.send(true);
    if let Err(e) = scheduler_task.await {
        tracing::error!("Scheduler task failed: {}", e);
    }

    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for Ctrl-C: {}", e);
        std::future::pending::<()>().await;
    }
}
