//! # blueprox-server
//!
//! HTTP server for the blueprox proximity estimation engine.
//!
//! This binary provides:
//! - REST API for scanning, device state and connection management
//! - OpenAPI documentation via Swagger UI
//! - A background monitor refreshing connected devices
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development
//! cargo run --package blueprox-server
//!
//! # Without Bluetooth hardware
//! cargo run --package blueprox-server --no-default-features --features mock-bluetooth
//!
//! # Production
//! BLUEPROX_ENV=production ./blueprox-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::sync::Arc;

use blueprox_core::{BlueproxError, Config, ProximityEngine};
use blueprox_server::api::create_router;
use blueprox_server::logging;
use blueprox_server::state::AppState;
use tokio::net::TcpListener;
use tracing::{error, info};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let log_settings = logging::LogSettings::from_env();
    logging::init(&log_settings)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        mode = ?log_settings.mode,
        "Starting blueprox-server"
    );

    let config_path = Config::default_path();
    let config = Config::load_or_default(&config_path).map_err(|err| {
        let err = BlueproxError::from(err);
        error!(code = err.error_code(), path = %config_path.display(), "{err}");
        err
    })?;
    info!(path = %config_path.display(), "Configuration loaded");

    let state = Arc::new(AppState::from_config(config).await);
    let monitor = state.engine().ok().map(ProximityEngine::spawn_monitor);

    let addr = state.config.server.bind_address();
    let listener = TcpListener::bind(&addr).await?;
    info!("Listening on {}", addr);

    axum::serve(listener, create_router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    if let Some(monitor) = monitor {
        monitor.abort();
    }
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!(error = %err, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown requested");
}
