//! # classbeacon-server
//!
//! HTTP server for classroom attendance over BLE proximity.
//!
//! ## Running
//!
//! ```bash
//! # Development, simulated radio
//! cargo run --package classbeacon-server
//!
//! # With a BlueZ adapter
//! cargo run --package classbeacon-server --features bluetooth
//!
//! # Alternate config file, production logging
//! CLASSBEACON_CONFIG=./classbeacon.toml CLASSBEACON__SERVER__PRODUCTION=true ./classbeacon-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use classbeacon_core::{default_config_path, BeaconRadio, Config, MockRadio};
use classbeacon_server::api::create_router;
use classbeacon_server::logging;
use classbeacon_server::state::AppState;
use tokio::net::TcpListener;
use tracing::info;

/// Environment variable overriding the config file path.
const CONFIG_PATH_ENV: &str = "CLASSBEACON_CONFIG";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(default_config_path, PathBuf::from);
    let config = Config::load(Some(&config_path))
        .with_context(|| format!("loading configuration from {}", config_path.display()))?;

    logging::init(&config.server)?;
    info!(config = %config_path.display(), "Starting classbeacon-server");

    let radio = create_radio(&config).await;
    let bind_address = config.server.bind_address.clone();
    let state = AppState::new(config, radio)?;
    let app = create_router(state);

    let listener = TcpListener::bind(&bind_address)
        .await
        .with_context(|| format!("binding {bind_address}"))?;
    info!("Listening on {}", bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    info!("Server stopped");
    Ok(())
}

#[cfg(feature = "bluetooth")]
async fn create_radio(config: &Config) -> Arc<dyn BeaconRadio> {
    match classbeacon_core::BluezRadio::new(Some(config.service_uuid())).await {
        Ok(radio) => Arc::new(radio),
        Err(e) => {
            tracing::warn!(error = %e, "BlueZ unavailable, using simulated radio");
            Arc::new(MockRadio::demo())
        }
    }
}

#[cfg(not(feature = "bluetooth"))]
#[allow(clippy::unused_async)]
async fn create_radio(_config: &Config) -> Arc<dyn BeaconRadio> {
    info!("Built without the bluetooth feature, using simulated radio");
    Arc::new(MockRadio::demo())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
    info!("Shutdown signal received");
}
