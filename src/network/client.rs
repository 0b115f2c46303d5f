//! Relay Client
//!
//! WebSocket client for the relay: connects with a bounded retry budget,
//! streams the local vehicle at a fixed cadence, and feeds everything it
//! hears into a [`RemoteWorld`]. When the relay is unreachable or full the
//! client degrades to single-player mode instead of failing.

use std::time::Duration;
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval, sleep, timeout, MissedTickBehavior};
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, info, warn};

use crate::client::proxy::InterpolationConfig;
use crate::client::sampler::{OutboundSampler, VehicleSource};
use crate::client::world::{ConnectionMode, Notice, RemoteWorld};
use crate::core::time::now_millis;
use crate::network::protocol::{ClientMessage, ServerMessage};
use crate::relay::config::env_or;

/// Client connection to the relay.
pub type RelayStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Client configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Relay WebSocket URL.
    pub url: String,
    /// Connection attempts before giving up.
    pub reconnect_attempts: u32,
    /// Pause between attempts.
    pub reconnect_delay: Duration,
    /// Per-attempt handshake timeout.
    pub connect_timeout: Duration,
    /// Movement report period.
    pub send_interval: Duration,
    /// Render/advance period.
    pub frame_interval: Duration,
    /// Remote player blending.
    pub interpolation: InterpolationConfig,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:3001".to_string(),
            reconnect_attempts: 5,
            reconnect_delay: Duration::from_secs(1),
            connect_timeout: Duration::from_secs(10),
            send_interval: Duration::from_millis(50),
            frame_interval: Duration::from_millis(16),
            interpolation: InterpolationConfig::default(),
        }
    }
}

impl ClientConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            url: std::env::var("RELAY_URL").unwrap_or(d.url),
            reconnect_attempts: env_or("RELAY_RECONNECT_ATTEMPTS", d.reconnect_attempts),
            reconnect_delay: Duration::from_millis(
                env_or("RELAY_RECONNECT_DELAY_MS", d.reconnect_delay.as_millis() as u64),
            ),
            connect_timeout: Duration::from_millis(
                env_or("RELAY_CONNECT_TIMEOUT_MS", d.connect_timeout.as_millis() as u64),
            ),
            send_interval: Duration::from_millis(
                env_or("RELAY_SEND_INTERVAL_MS", d.send_interval.as_millis() as u64),
            ),
            frame_interval: d.frame_interval,
            interpolation: d.interpolation,
        }
    }
}

/// Client errors.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    /// Connection or transport failure.
    #[error("Connection failed: {0}")]
    Connect(#[from] tokio_tungstenite::tungstenite::Error),

    /// Handshake took too long.
    #[error("Connection timed out after {0:?}")]
    Timeout(Duration),

    /// The relay refused admission.
    #[error("Server full: {0}")]
    ServerFull(String),

    /// Every connection attempt failed.
    #[error("Gave up after {0} attempts")]
    AttemptsExhausted(u32),

    /// Frame could not be encoded or decoded.
    #[error("Protocol error: {0}")]
    Protocol(#[from] serde_json::Error),
}

/// How [`RelayClient::run`] finished.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClientExit {
    /// Shutdown requested; a `leave` was sent if connected.
    Shutdown,
    /// Relay unreachable or full; the game continues alone.
    SinglePlayer,
}

enum SessionEnd {
    Shutdown,
    Lost,
    Full(String),
}

/// One connection attempt bounded by `connect_timeout`.
pub async fn connect_once(config: &ClientConfig) -> Result<RelayStream, ClientError> {
    match timeout(config.connect_timeout, connect_async(config.url.as_str())).await {
        Ok(Ok((ws, _))) => Ok(ws),
        Ok(Err(e)) => Err(ClientError::Connect(e)),
        Err(_) => Err(ClientError::Timeout(config.connect_timeout)),
    }
}

/// Connect, retrying up to `reconnect_attempts` times.
pub async fn connect_with_retry(config: &ClientConfig) -> Result<RelayStream, ClientError> {
    let attempts = config.reconnect_attempts.max(1);
    for attempt in 1..=attempts {
        match connect_once(config).await {
            Ok(ws) => {
                info!("Connected to {}", config.url);
                return Ok(ws);
            }
            Err(e) => {
                warn!("Connection attempt {}/{} failed: {}", attempt, attempts, e);
                if attempt < attempts {
                    sleep(config.reconnect_delay).await;
                }
            }
        }
    }
    Err(ClientError::AttemptsExhausted(attempts))
}

/// Long-running relay client.
pub struct RelayClient {
    config: ClientConfig,
    world: RemoteWorld,
    sampler: OutboundSampler,
    notices: Option<mpsc::Sender<Notice>>,
}

impl RelayClient {
    /// Create a client. Nothing connects until [`run`](Self::run).
    pub fn new(config: ClientConfig) -> Self {
        let world = RemoteWorld::new(config.interpolation);
        let sampler = OutboundSampler::new(config.send_interval.as_millis() as u64);
        Self {
            config,
            world,
            sampler,
            notices: None,
        }
    }

    /// Forward every [`Notice`] to `tx` as well as the log.
    pub fn with_notices(mut self, tx: mpsc::Sender<Notice>) -> Self {
        self.notices = Some(tx);
        self
    }

    /// Client-side view of the other players.
    pub fn world(&self) -> &RemoteWorld {
        &self.world
    }

    /// Connect and stay connected until shutdown, reconnecting after a
    /// lost connection and degrading to single-player when that fails.
    ///
    /// `commands` carries chat, actions and renames from the player.
    pub async fn run<V: VehicleSource + ?Sized>(
        &mut self,
        vehicle: &mut V,
        mut commands: mpsc::Receiver<ClientMessage>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<ClientExit, ClientError> {
        loop {
            self.world.mark_connecting();
            self.sampler.reset();

            let connected = tokio::select! {
                result = connect_with_retry(&self.config) => Some(result),
                _ = shutdown.recv() => None,
            };
            let ws = match connected {
                Some(Ok(ws)) => ws,
                Some(Err(e)) => {
                    warn!("{}; continuing in single-player mode", e);
                    self.world.enter_single_player();
                    return Ok(ClientExit::SinglePlayer);
                }
                None => return Ok(ClientExit::Shutdown),
            };

            match self.run_session(ws, vehicle, &mut commands, &mut shutdown).await? {
                SessionEnd::Shutdown => return Ok(ClientExit::Shutdown),
                SessionEnd::Full(message) => {
                    warn!("{}; continuing in single-player mode", ClientError::ServerFull(message));
                    self.world.enter_single_player();
                    return Ok(ClientExit::SinglePlayer);
                }
                SessionEnd::Lost => {
                    info!("Connection lost, reconnecting");
                }
            }
        }
    }

    async fn run_session<V: VehicleSource + ?Sized>(
        &mut self,
        ws: RelayStream,
        vehicle: &mut V,
        commands: &mut mpsc::Receiver<ClientMessage>,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<SessionEnd, ClientError> {
        let (mut write, mut read) = ws.split();
        let mut frame = interval(self.config.frame_interval.max(Duration::from_millis(1)));
        frame.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = frame.tick() => {
                    let now = now_millis();
                    let notices = self.world.advance(now);
                    self.publish(notices);

                    if self.world.mode() != ConnectionMode::Online {
                        continue;
                    }
                    if let Some(report) = self.sampler.poll(now, vehicle) {
                        if write.send(Message::Text(report.to_json()?)).await.is_err() {
                            return Ok(SessionEnd::Lost);
                        }
                    }
                }
                msg = read.next() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            let message = match ServerMessage::from_json(&text) {
                                Ok(m) => m,
                                Err(e) => {
                                    debug!("Unparseable server frame: {}", e);
                                    continue;
                                }
                            };
                            let full = match &message {
                                ServerMessage::ServerFull(full) => Some(full.message.clone()),
                                _ => None,
                            };
                            let notices = self.world.apply(message, now_millis());
                            self.publish(notices);
                            if let Some(message) = full {
                                return Ok(SessionEnd::Full(message));
                            }
                        }
                        Some(Ok(Message::Close(_))) | None => return Ok(SessionEnd::Lost),
                        Some(Err(e)) => {
                            warn!("WebSocket error: {}", e);
                            return Ok(SessionEnd::Lost);
                        }
                        Some(Ok(_)) => {}
                    }
                }
                Some(command) = commands.recv() => {
                    let leaving = command == ClientMessage::Leave;
                    if write.send(Message::Text(command.to_json()?)).await.is_err() {
                        return Ok(SessionEnd::Lost);
                    }
                    if leaving {
                        let _ = write.close().await;
                        return Ok(SessionEnd::Shutdown);
                    }
                }
                _ = shutdown.recv() => {
                    let _ = write.send(Message::Text(ClientMessage::Leave.to_json()?)).await;
                    let _ = write.close().await;
                    return Ok(SessionEnd::Shutdown);
                }
            }
        }
    }

    fn publish(&self, notices: Vec<Notice>) {
        for notice in notices {
            match &notice {
                Notice::Chat(entry) => info!("[{}] {}", entry.name, entry.message),
                Notice::Joined { name, .. } => info!("{} joined", name),
                Notice::Left { id } => info!("Player {} left", id.short()),
                Notice::ServerFull(message) => warn!("{}", message),
                other => debug!("{:?}", other),
            }
            if let Some(tx) = &self.notices {
                let _ = tx.try_send(notice);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    async fn unused_url() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        format!("ws://{}", addr)
    }

    #[test]
    fn test_client_config_default() {
        let config = ClientConfig::default();
        assert_eq!(config.reconnect_attempts, 5);
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.send_interval, Duration::from_millis(50));
    }

    #[tokio::test]
    async fn test_retry_budget_exhausted() {
        let config = ClientConfig {
            url: unused_url().await,
            reconnect_attempts: 3,
            reconnect_delay: Duration::from_millis(5),
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let result = connect_with_retry(&config).await;
        assert!(matches!(result, Err(ClientError::AttemptsExhausted(3))));
    }

    #[tokio::test]
    async fn test_unreachable_relay_degrades_to_single_player() {
        let config = ClientConfig {
            url: unused_url().await,
            reconnect_attempts: 2,
            reconnect_delay: Duration::from_millis(5),
            connect_timeout: Duration::from_millis(500),
            ..Default::default()
        };
        let mut client = RelayClient::new(config);
        let mut vehicle = crate::client::sampler::CircuitVehicle::default();
        let (_cmd_tx, cmd_rx) = mpsc::channel(4);
        let (_shutdown_tx, shutdown_rx) = broadcast::channel(1);

        let exit = client.run(&mut vehicle, cmd_rx, shutdown_rx).await.unwrap();
        assert_eq!(exit, ClientExit::SinglePlayer);
        assert_eq!(client.world().mode(), ConnectionMode::SinglePlayer);
    }
}
