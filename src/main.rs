//! entra-relay - OAuth2 PKCE relay between a web frontend and Microsoft Entra ID.
//!
//! Runs the login, callback and session endpoints over HTTP.

#![deny(clippy::all)]

mod auth;
mod config;
mod error;
mod secure;
mod server;

use anyhow::{Context, Result};
use axum::http::HeaderValue;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use auth::flow::AuthFlow;
use auth::provider::EntraIdProvider;
use auth::state_store::{self, InMemoryStateStore};
use config::Config;
use server::AppState;

fn main() {
    // Load .env file (if present) before anything else
    if let Err(e) = dotenvy::dotenv() {
        // .env file is optional - only log if it's not a "file not found" error
        if !e.not_found() {
            eprintln!("Warning: Failed to load .env file: {}", e);
        }
    }

    // Load configuration
    let config = match Config::load() {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Configuration error: {:#}", e);
            eprintln!("\nPlease set the following environment variables:");
            eprintln!("  MICROSOFT_CLIENT_ID=<your-entra-app-client-id>");
            eprintln!("  MICROSOFT_CLIENT_SECRET=<your-entra-app-client-secret>");
            eprintln!("  JWT_SECRET=<session-signing-secret>");
            std::process::exit(1);
        }
    };

    init_logging(&config.logging.level);

    info!("Starting {} v{}", config.app.name, env!("CARGO_PKG_VERSION"));

    if config.uses_dev_signing_secret() {
        warn!("Using the development session signing secret; set JWT_SECRET");
    }

    let runtime = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!("Failed to create Tokio runtime: {}", e);
            std::process::exit(1);
        }
    };

    if let Err(e) = runtime.block_on(serve(config)) {
        error!("Server error: {:#}", e);
        std::process::exit(1);
    }
}

/// Initialize tracing/logging.
fn init_logging(default_level: &str) {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .with_thread_ids(false)
        .init();
}

/// Build the flow and serve HTTP until Ctrl-C.
async fn serve(config: Config) -> Result<()> {
    let provider = Arc::new(EntraIdProvider::new(&config)?);
    let states = Arc::new(InMemoryStateStore::new(config.state_ttl()));
    let flow = Arc::new(AuthFlow::new(&config, provider, states.clone())?);

    let sweep_period = std::time::Duration::from_secs(config.state.ttl_seconds.max(60) as u64);
    state_store::spawn_sweeper(states, sweep_period);

    let frontend_origin = HeaderValue::from_str(config.server.frontend_url.trim_end_matches('/'))
        .context("Frontend URL is not a valid origin header")?;
    let app = server::build_router(AppState { flow }, frontend_origin);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    info!(
        "Listening on {} (backend {}, frontend {}, groups: {}, roles: {}, production: {})",
        addr,
        config.server.backend_url,
        config.server.frontend_url,
        config.enrichment.groups,
        config.enrichment.roles,
        config.is_production()
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {}", e);
    }
    info!("Shutdown signal received");
}
