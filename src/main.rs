use anyhow::{Context, Result};
use sensorhub::api::create_router;
use sensorhub::config;
use sensorhub::SensorHub;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing subscriber
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "sensorhub=info".into()),
        )
        .init();

    info!("Sensor hub starting...");

    let config = config::load_from_env().context("Failed to load configuration")?;
    info!(
        database_path = %config.storage.database_path,
        bind_address = %config.api.bind_address,
        reminder_due_ms = config.building.reminder_due_ms,
        reminder_period_ms = config.building.reminder_period_ms,
        max_readings = config.sensor.max_readings,
        "Configuration loaded"
    );

    let hub = SensorHub::open(&config)?;

    // Resume building status publication from a previous session
    let restored = hub
        .restore_reminders()
        .await
        .context("Failed to restore persisted reminders")?;
    info!(count = restored, "Reminders resumed");

    // Start HTTP API server
    let router = create_router(hub.clone());
    let listener = tokio::net::TcpListener::bind(&config.api.bind_address)
        .await
        .with_context(|| format!("Failed to bind {}", config.api.bind_address))?;
    info!(address = %config.api.bind_address, "API listening");

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, router).await {
            tracing::error!(error = %e, "API server error");
        }
    });

    // Wait for shutdown signal
    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for ctrl_c signal")?;
    info!("Shutdown signal received");

    // Graceful shutdown
    server_handle.abort();
    hub.shutdown().await;
    info!("Sensor hub stopped");

    Ok(())
}
