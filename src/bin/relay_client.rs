//! Headless Relay Client
//!
//! Drives a vehicle around a circle and logs what the other players do.
//! Useful for load-testing a relay or watching it from a terminal.
//!
//! `RELAY_CLIENT_NAME` renames the session once admitted and
//! `RELAY_CLIENT_GREETING` is sent as a chat line.

use tokio::sync::{broadcast, mpsc};
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, FmtSubscriber};

use portfolio_relay::VERSION;
use portfolio_relay::client::{CircuitVehicle, Notice};
use portfolio_relay::network::client::{ClientConfig, ClientExit, RelayClient};
use portfolio_relay::network::protocol::ClientMessage;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let subscriber = FmtSubscriber::builder()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let config = ClientConfig::from_env();
    info!("Relay client v{} -> {}", VERSION, config.url);

    let (cmd_tx, cmd_rx) = mpsc::channel(16);
    let (notice_tx, mut notice_rx) = mpsc::channel(256);
    let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

    let name = std::env::var("RELAY_CLIENT_NAME").ok();
    let greeting = std::env::var("RELAY_CLIENT_GREETING").ok();

    // Send the one-off commands as soon as we are admitted.
    tokio::spawn(async move {
        while let Some(notice) = notice_rx.recv().await {
            if let Notice::Welcomed { .. } = notice {
                if let Some(name) = &name {
                    let _ = cmd_tx.send(ClientMessage::ChangeName(name.clone())).await;
                }
                if let Some(greeting) = &greeting {
                    let _ = cmd_tx.send(ClientMessage::ChatMessage(greeting.clone())).await;
                }
            }
        }
    });

    tokio::spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("Ctrl-C received, leaving");
                let _ = shutdown_tx.send(());
            }
            Err(e) => error!("Failed to listen for Ctrl-C: {}", e),
        }
    });

    let mut client = RelayClient::new(config).with_notices(notice_tx);
    let mut vehicle = CircuitVehicle::default();

    match client.run(&mut vehicle, cmd_rx, shutdown_rx).await? {
        ClientExit::Shutdown => info!("Disconnected"),
        ClientExit::SinglePlayer => info!("Relay unavailable; single-player mode"),
    }
    Ok(())
}
