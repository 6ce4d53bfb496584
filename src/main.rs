// Main entry point - Dependency injection and server setup
mod application;
mod domain;
mod infrastructure;
mod presentation;

use anyhow::Context;
use std::{net::SocketAddr, sync::Arc};
use tracing_subscriber::EnvFilter;

use crate::application::polling_controller::MetricsPollingController;
use crate::infrastructure::config::load_app_config;
use crate::infrastructure::http_gateway::HttpMetricsGateway;
use crate::presentation::app_state::AppState;
use crate::presentation::routes::build_router;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    // Load configuration
    let config = load_app_config()?;

    // Create gateway (infrastructure layer)
    let gateway = Arc::new(HttpMetricsGateway::new(
        config.gateway.base_url,
        config.gateway.token,
    ));

    // Start the panel controller (application layer)
    let panel = MetricsPollingController::spawn(
        gateway,
        config.panel.initial_parameters(),
        config.panel.controller_settings(),
    );

    let state = Arc::new(AppState {
        panel: panel.clone(),
    });

    // Build router (presentation layer)
    let router = build_router(state);

    let addr: SocketAddr = config
        .server
        .bind
        .parse()
        .with_context(|| format!("Invalid bind address {}", config.server.bind))?;
    tracing::info!("Starting topic-metrics-panel on {}", addr);

    axum::serve(tokio::net::TcpListener::bind(addr).await?, router)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    panel.unmount();
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
}
