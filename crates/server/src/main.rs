mod bootstrap;
mod health;
pub mod ws;

use std::time::Duration;

use anyhow::Result;
use bankdesk_core::config::{AppConfig, LoadOptions};
use tracing_subscriber::EnvFilter;

use crate::ws::WsState;

fn init_logging(config: &AppConfig) {
    use bankdesk_core::config::LogFormat::*;

    let filter = EnvFilter::try_new(&config.logging.level).unwrap_or_else(|_| EnvFilter::new("info"));

    match config.logging.format {
        Compact => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).compact().init();
        }
        Pretty => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).pretty().init();
        }
        Json => {
            tracing_subscriber::fmt().with_target(false).with_env_filter(filter).json().init();
        }
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    run().await
}

pub async fn run() -> Result<()> {
    let config = AppConfig::load(LoadOptions::default())?;
    init_logging(&config);

    let app = bootstrap::bootstrap_with_config(config).await?;

    let router = health::router(app.db_pool.clone(), app.runtime.clone()).merge(ws::router(WsState {
        runtime: app.runtime.clone(),
        sockets: app.sockets.clone(),
    }));

    let address = format!("{}:{}", app.config.server.bind_address, app.config.server.port);
    let listener = tokio::net::TcpListener::bind(&address).await?;
    tracing::info!(
        event_name = "system.server.started",
        correlation_id = "bootstrap",
        bind_address = %address,
        "bankdesk-server listening for /ws and /health"
    );

    axum::serve(listener, router).with_graceful_shutdown(wait_for_shutdown()).await?;

    tracing::info!(
        event_name = "system.server.stopping",
        correlation_id = "shutdown",
        in_flight = app.runtime.bus().in_flight(),
        "draining in-flight turns"
    );
    let grace = Duration::from_secs(app.config.server.graceful_shutdown_secs);
    if tokio::time::timeout(grace, app.runtime.run_until_idle()).await.is_err() {
        tracing::warn!(
            event_name = "system.server.drain_timeout",
            correlation_id = "shutdown",
            in_flight = app.runtime.bus().in_flight(),
            "shutdown grace period elapsed with turns still running"
        );
    }
    app.db_pool.close().await;

    Ok(())
}

async fn wait_for_shutdown() {
    if let Err(error) = tokio::signal::ctrl_c().await {
        tracing::error!(
            event_name = "system.server.signal_error",
            correlation_id = "shutdown",
            error = %error,
            "could not listen for the shutdown signal"
        );
    }
}
