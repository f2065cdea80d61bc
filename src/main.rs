use std::net::SocketAddr;

use anyhow::{Context, Result};
use dotenvy::dotenv;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

mod config;
mod handlers;
mod llm;
mod prompt;
mod session;
mod utils;

use config::CONFIG;
use session::AppState;
use utils::logging::init_logging;

#[tokio::main]
async fn main() -> Result<()> {
    dotenv().ok();
    let _guards = init_logging();

    if CONFIG.gemini_api_key.trim().is_empty() {
        warn!("GEMINI_API_KEY is not set; describe and generate endpoints will fail");
    }

    let state = AppState::new();
    let app = handlers::router(state).layer(TraceLayer::new_for_http());

    let addr = SocketAddr::new(
        CONFIG
            .server_host
            .parse()
            .context("Invalid SERVER_HOST value")?,
        CONFIG.server_port,
    );
    info!("Starting prompt studio server on {addr}");

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!("Failed to listen for shutdown signal: {err}");
        return;
    }
    info!("Shutdown signal received");
}
