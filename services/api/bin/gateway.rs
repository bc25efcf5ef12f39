//! Main Entrypoint for the Sprechen Gateway
//!
//! This binary is responsible for:
//! 1. Loading configuration from the environment.
//! 2. Building the gatekeeper and its idle-session sweeper.
//! 3. Constructing the Axum router and applying middleware.
//! 4. Starting the web server and handling graceful shutdown.

use anyhow::Context;
use sprechen_gateway::{
    config::Config,
    guard::{Gatekeeper, GuardLimits},
    router::create_router,
    state::AppState,
    upstream::Upstream,
};
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tower_http::cors::{Any, CorsLayer};
use tracing::{error, info};

const SWEEP_INTERVAL: Duration = Duration::from_secs(60);

/// Listens for the `Ctrl+C` signal to gracefully shut down the server.
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to install Ctrl+C handler");
        std::future::pending::<()>().await;
    }
    info!("Received shutdown signal. Shutting down gracefully...");
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // --- 1. Load Configuration ---
    let config = Config::from_env().context("Failed to load configuration")?;

    // --- 2. Initialize Logging ---
    tracing_subscriber::fmt()
        .with_max_level(config.log_level)
        .with_timer(tracing_subscriber::fmt::time::ChronoLocal::rfc_3339())
        .init();
    info!("Configuration loaded. Initializing application state...");

    // --- 3. Initialize Shared Services ---
    let gatekeeper = Arc::new(Gatekeeper::new(GuardLimits {
        rate_window: config.rate_window,
        message_limit: config.message_limit,
        session_ttl: config.session_ttl,
    }));
    let sweeper = gatekeeper.clone().spawn_sweeper(SWEEP_INTERVAL);

    let upstream = Upstream::new(
        config.upstream_url.clone(),
        config.openai_api_key.clone(),
        config.upstream_timeout,
    )
    .context("Failed to build upstream HTTP client")?;

    let app_state = Arc::new(AppState {
        gatekeeper,
        upstream: Arc::new(upstream),
    });

    // --- 4. Create Router and Apply Middleware ---
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let app = create_router(app_state).layer(cors);

    // --- 5. Start Server ---
    info!(
        upstream = %config.upstream_url,
        rate_window = ?config.rate_window,
        message_limit = config.message_limit,
        session_ttl = ?config.session_ttl,
        bind_address = %config.bind_address,
        "Service configured. Starting server..."
    );
    let listener = tokio::net::TcpListener::bind(config.bind_address).await?;

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    sweeper.abort();
    info!("Server has shut down.");
    Ok(())
}
