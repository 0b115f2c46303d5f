//! Portfolio Relay Server
//!
//! Runs the WebSocket relay and its HTTP diagnostics until Ctrl-C.

use std::sync::Arc;
use anyhow::Context;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portfolio_relay::VERSION;
use portfolio_relay::network::http::serve_http;
use portfolio_relay::network::server::{RelayServer, ServerConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)
        .context("Failed to set tracing subscriber")?;

    let config = ServerConfig::from_env();
    info!("Portfolio Relay v{}", config.version);
    info!("Max players: {}", config.relay.max_players);
    info!(
        "Stale timeout: {}s, sweep every {}s",
        config.relay.stale_timeout.as_secs(),
        config.relay.reaper_interval.as_secs()
    );

    let ws_listener = TcpListener::bind(config.bind_addr).await
        .with_context(|| format!("Failed to bind WebSocket listener on {}", config.bind_addr))?;
    let http_listener = TcpListener::bind(config.http_addr).await
        .with_context(|| format!("Failed to bind HTTP listener on {}", config.http_addr))?;

    let server = Arc::new(RelayServer::new(config));

    let http_state = server.state();
    let http_handle = tokio::spawn(async move {
        if let Err(e) = serve_http(http_listener, http_state).await {
            error!("HTTP diagnostics stopped: {}", e);
        }
    });

    let signal_server = server.clone();
    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => info!("Ctrl-C received, shutting down"),
            Err(e) => {
                error!("Failed to listen for Ctrl-C: {}", e);
                return;
            }
        }
        signal_server.shutdown();
    });

    server.serve(ws_listener).await?;
    http_handle.abort();

    info!("Portfolio Relay v{} stopped", VERSION);
    Ok(())
}
