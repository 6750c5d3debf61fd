//! Notification gateway entry point.
//!
//! SSE fan-out and IP access gate for the ordering platform.

use anyhow::Result;
use chrono::{DateTime, Utc};
use metrics_exporter_prometheus::PrometheusBuilder;
use notify_gateway::{create_router, AppState, BlockObserver, BlockStore};
use std::env;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::signal;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Default observer for new blocks. The ordering application hooks its
/// order-cancellation cascade here; standalone, we only log.
struct LogBlockObserver;

impl BlockObserver for LogBlockObserver {
    fn ip_blocked(&self, ip: &str, blocked_until: DateTime<Utc>) {
        warn!("IP {} blocked until {}", ip, blocked_until);
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables from .env file
    dotenvy::dotenv().ok();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    info!("Starting notification gateway");

    // Read configuration from environment
    let http_port: u16 = env::var("HTTP_PORT")
        .unwrap_or_else(|_| "8090".to_string())
        .parse()
        .expect("HTTP_PORT must be a number");
    let metrics_port: u16 = env::var("METRICS_PORT")
        .unwrap_or_else(|_| "9100".to_string())
        .parse()
        .expect("METRICS_PORT must be a number");
    let blocklist_path =
        env::var("BLOCKLIST_PATH").unwrap_or_else(|_| "data/blocked.json".to_string());

    info!("Configuration:");
    info!("  HTTP_PORT: {}", http_port);
    info!("  METRICS_PORT: {}", metrics_port);
    info!("  BLOCKLIST_PATH: {}", blocklist_path);

    // Start Prometheus metrics server
    PrometheusBuilder::new()
        .with_http_listener(([0, 0, 0, 0], metrics_port))
        .install()
        .expect("Failed to start Prometheus exporter");
    info!("Prometheus metrics server started on port {}", metrics_port);

    // Wire up the block store and application state
    let blocklist = Arc::new(BlockStore::new(blocklist_path));
    blocklist.add_observer(Arc::new(LogBlockObserver));
    let state = AppState::new(blocklist);

    // Create HTTP router
    let app = create_router(state);

    // Start HTTP server
    let addr = SocketAddr::from(([0, 0, 0, 0], http_port));
    let listener = TcpListener::bind(addr).await?;
    info!("Notification gateway listening on {}", addr);

    // Run server with graceful shutdown
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Notification gateway stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("Failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("Failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C"),
        _ = terminate => info!("Received terminate signal"),
    }
}
