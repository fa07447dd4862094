//! Live monitor service entry point.
//!
//! Subscribes to the live check-in channel of each monitored event, keeps the
//! views fresh with periodic snapshots and serves them over HTTP/WebSocket.

use anyhow::Result;
use checkin_stream::EventStreamClient;
use external_services::{SnapshotFetcher, TicketingClient};
use live_monitor::{create_router, AppState, MonitorConfig, MonitorRegistry};
use metrics_exporter_prometheus::PrometheusBuilder;
use std::sync::Arc;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting live monitor...");

    let config = MonitorConfig::from_env()?;

    info!("Configuration:");
    info!("  API_BASE_URL: {}", config.api_base_url);
    info!("  STREAM_URL: {}", config.stream_url);
    info!("  HTTP_PORT: {}", config.http_port);
    info!("  METRICS_PORT: {}", config.metrics_port);
    info!("  REFRESH_INTERVAL: {:?}", config.refresh_interval);

    // Initialize Prometheus metrics exporter
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], config.metrics_port))
        .install()?;

    info!(
        "Prometheus metrics available at http://0.0.0.0:{}/metrics",
        config.metrics_port
    );

    let mut ticketing = TicketingClient::new(config.api_base_url.clone());
    if let Some(token) = &config.api_token {
        ticketing = ticketing.with_token(token.clone());
    }
    let fetcher = SnapshotFetcher::new(Arc::new(ticketing));
    let stream = EventStreamClient::new(config.stream_config());

    let registry = Arc::new(MonitorRegistry::new(
        fetcher,
        Arc::new(stream),
        config.session_config(),
    ));

    for event_id in &config.event_ids {
        match registry.start(event_id) {
            Ok(_) => info!("Monitoring event {} from startup", event_id),
            Err(e) => error!("Failed to start monitoring {}: {}", event_id, e),
        }
    }

    let router = create_router(AppState {
        registry: registry.clone(),
    });

    let listener = TcpListener::bind(format!("0.0.0.0:{}", config.http_port)).await?;
    info!("HTTP API listening on http://0.0.0.0:{}", config.http_port);
    info!("Available endpoints:");
    info!("  GET    /health                        - Health check");
    info!("  GET    /monitors                      - List monitored events");
    info!("  PUT    /monitors/{{event_id}}           - Start monitoring an event");
    info!("  GET    /monitors/{{event_id}}           - Current live view");
    info!("  DELETE /monitors/{{event_id}}           - Stop monitoring");
    info!("  POST   /monitors/{{event_id}}/retry     - Retry a failed load");
    info!("  POST   /monitors/{{event_id}}/refresh   - Refresh the snapshot now");
    info!("  GET    /monitors/{{event_id}}/ws        - Live view WebSocket");

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Stopping {} monitor sessions...", registry.len());
    registry.shutdown_all().await;

    info!("Live monitor stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
