//! examwatch -- live exam-session monitoring core.
//!
//! Polls a status source on a fixed cadence, keeps the latest snapshot,
//! and derives the active-session list, counts and phase badges that a
//! console or dashboard renders. A separate one-second clock refreshes
//! elapsed-time labels without touching the network.

pub mod api;
pub mod clock;
pub mod config;
pub mod model;
pub mod monitor;
pub mod scheduler;
pub mod source;
pub mod store;
pub mod telemetry;
pub mod view;

use anyhow::{Context, Result};
use std::sync::Arc;

use crate::config::MonitorConfig;
use crate::monitor::Monitor;

/// Run the monitor and serve the JSON API until Ctrl-C.
pub async fn serve(config: &MonitorConfig) -> Result<()> {
    let monitor = Arc::new(Monitor::from_config(config)?);
    monitor.start();

    let addr: std::net::SocketAddr = config
        .api
        .listen_address
        .parse()
        .with_context(|| format!("invalid listen address: {}", config.api.listen_address))?;
    let app = api::router(api::state::AppState::new(Arc::clone(&monitor)));

    tracing::info!(%addr, "examwatch API listening");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await?;

    monitor.shutdown();
    Ok(())
}
