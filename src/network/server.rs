//! WebSocket Relay Server
//!
//! Accepts WebSocket connections, admits each one as a session and feeds
//! its events through the relay. Two background loops evict idle sessions
//! and broadcast periodic statistics.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{broadcast, mpsc, Mutex};
use tokio::time::interval;
use tokio_tungstenite::tungstenite::handshake::server::{ErrorResponse, Request, Response};
use tokio_tungstenite::tungstenite::http::StatusCode;
use tokio_tungstenite::tungstenite::protocol::WebSocketConfig;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async_with_config, WebSocketStream};
use futures_util::{SinkExt, StreamExt};
use tracing::{debug, error, info, instrument, warn};

use crate::core::time::{now_millis, Millis};
use crate::network::broadcast::Broadcaster;
use crate::network::protocol::{ClientMessage, ServerFull, ServerMessage};
use crate::relay::config::{env_or, RelayConfig};
use crate::relay::reaper::reap_stale;
use crate::relay::router::{self, Dispatch};
use crate::relay::session::SessionId;
use crate::relay::store::SessionStore;
use crate::relay::RelayError;

/// Server configuration.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// WebSocket bind address.
    pub bind_addr: SocketAddr,
    /// HTTP diagnostics bind address.
    pub http_addr: SocketAddr,
    /// Per-connection outbound queue depth.
    pub outbox_capacity: usize,
    /// Largest inbound WebSocket message, in bytes. Bigger frames close
    /// the connection before they are buffered.
    pub max_message_size: usize,
    /// Browser origins allowed to connect. Empty accepts any origin.
    pub allowed_origins: Vec<String>,
    /// Server version string.
    pub version: String,
    /// Relay policy.
    pub relay: RelayConfig,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 3001)),
            http_addr: SocketAddr::from(([0, 0, 0, 0], 3002)),
            outbox_capacity: 64,
            max_message_size: 16 * 1024,
            allowed_origins: Vec::new(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            relay: RelayConfig::default(),
        }
    }
}

impl ServerConfig {
    /// WebSocket limits applied to every accepted connection.
    pub fn websocket_config(&self) -> WebSocketConfig {
        WebSocketConfig {
            max_message_size: Some(self.max_message_size),
            max_frame_size: Some(self.max_message_size),
            ..Default::default()
        }
    }

    /// Whether a handshake carrying `origin` may proceed.
    pub fn origin_allowed(&self, origin: Option<&str>) -> bool {
        if self.allowed_origins.is_empty() {
            return true;
        }
        origin.is_some_and(|o| self.allowed_origins.iter().any(|allowed| allowed == o))
    }

    /// Create config from environment variables.
    ///
    /// `RELAY_BIND_ADDR` wins over `PORT`, which only overrides the port.
    /// `RELAY_ALLOWED_ORIGINS` is a comma-separated list.
    pub fn from_env() -> Self {
        let d = Self::default();
        let bind_addr = match std::env::var("RELAY_BIND_ADDR") {
            Ok(_) => env_or("RELAY_BIND_ADDR", d.bind_addr),
            Err(_) => SocketAddr::new(d.bind_addr.ip(), env_or("PORT", d.bind_addr.port())),
        };
        Self {
            bind_addr,
            http_addr: env_or("RELAY_HTTP_ADDR", d.http_addr),
            outbox_capacity: env_or("RELAY_OUTBOX_CAPACITY", d.outbox_capacity).max(1),
            max_message_size: env_or("RELAY_MAX_MESSAGE_SIZE", d.max_message_size).max(1024),
            allowed_origins: std::env::var("RELAY_ALLOWED_ORIGINS")
                .map(|v| parse_origins(&v))
                .unwrap_or_default(),
            version: d.version,
            relay: RelayConfig::from_env(),
        }
    }
}

/// Relay server errors.
#[derive(Debug, thiserror::Error)]
pub enum RelayServerError {
    /// Failed to bind to address.
    #[error("Failed to bind: {0}")]
    Bind(#[from] std::io::Error),

    /// WebSocket error.
    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

fn parse_origins(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|o| o.trim().trim_end_matches('/').to_string())
        .filter(|o| !o.is_empty())
        .collect()
}

// =============================================================================
// SHARED STATE
// =============================================================================

/// Session store plus the outbound queue of every admitted session.
///
/// Always mutated under one lock so membership and delivery agree.
#[derive(Debug)]
pub struct RelayState {
    store: SessionStore,
    outboxes: Broadcaster,
}

/// Handle shared by connection tasks, background loops and HTTP handlers.
pub type SharedRelay = Arc<Mutex<RelayState>>;

impl RelayState {
    /// Create empty state. `now` marks the start of uptime.
    pub fn new(config: RelayConfig, now: Millis) -> Self {
        Self {
            store: SessionStore::new(config, now),
            outboxes: Broadcaster::new(),
        }
    }

    /// Read access to the store.
    pub fn store(&self) -> &SessionStore {
        &self.store
    }

    /// Number of attached outbound queues.
    pub fn connection_count(&self) -> usize {
        self.outboxes.len()
    }

    /// Admit a connection and deliver its initial snapshot.
    pub fn admit(&mut self, outbox: mpsc::Sender<ServerMessage>, now: Millis) -> Result<SessionId, RelayError> {
        let (id, dispatch) = router::admit(&mut self.store, now)?;
        self.outboxes.register(id, outbox);
        self.apply(dispatch);
        Ok(id)
    }

    /// Handle one inbound event from `id`.
    pub fn handle(&mut self, id: SessionId, message: ClientMessage, now: Millis) -> Result<(), RelayError> {
        let dispatch = router::dispatch(&mut self.store, id, message, now)?;
        self.apply(dispatch);
        Ok(())
    }

    /// Transport-level disconnect.
    pub fn disconnect(&mut self, id: SessionId, now: Millis) -> Result<(), RelayError> {
        let result = router::on_disconnect(&mut self.store, id, now);
        // The queue goes even if the reaper already took the session.
        self.outboxes.unregister(&id);
        self.apply(result?);
        Ok(())
    }

    /// Evict idle sessions. Returns how many were removed.
    pub fn reap(&mut self, now: Millis) -> usize {
        let dispatch = reap_stale(&mut self.store, now);
        let removed = dispatch.removed.len();
        self.apply(dispatch);
        removed
    }

    /// Broadcast `serverStats` to everyone.
    pub fn broadcast_stats(&mut self, now: Millis) {
        let dispatch = router::server_stats(&self.store, now);
        self.apply(dispatch);
    }

    fn apply(&mut self, dispatch: Dispatch) {
        for id in &dispatch.removed {
            self.outboxes.unregister(id);
        }
        for outbound in &dispatch.outbound {
            self.outboxes.deliver(outbound);
        }
    }
}

// =============================================================================
// SERVER
// =============================================================================

/// The relay server.
pub struct RelayServer {
    config: ServerConfig,
    state: SharedRelay,
    shutdown_tx: broadcast::Sender<()>,
}

impl RelayServer {
    /// Create a new relay server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let state = Arc::new(Mutex::new(RelayState::new(config.relay.clone(), now_millis())));

        Self {
            config,
            state,
            shutdown_tx,
        }
    }

    /// Server configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Shared relay state, for the HTTP diagnostics.
    pub fn state(&self) -> SharedRelay {
        self.state.clone()
    }

    /// Bind the configured address and run until shutdown.
    pub async fn run(&self) -> Result<(), RelayServerError> {
        let listener = TcpListener::bind(&self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Run on an already-bound listener until shutdown.
    #[instrument(skip(self, listener))]
    pub async fn serve(&self, listener: TcpListener) -> Result<(), RelayServerError> {
        info!("Relay server listening on {}", listener.local_addr()?);

        let reaper_handle = tokio::spawn(Self::run_reaper_loop(
            self.state.clone(),
            self.config.relay.reaper_interval,
        ));
        let stats_handle = tokio::spawn(Self::run_stats_loop(
            self.state.clone(),
            self.config.relay.stats_interval,
        ));

        let mut shutdown_rx = self.shutdown_tx.subscribe();

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((stream, addr)) => {
                            debug!("New connection from {}", addr);
                            self.handle_connection(stream, addr);
                        }
                        Err(e) => {
                            error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received");
                    break;
                }
            }
        }

        reaper_handle.abort();
        stats_handle.abort();

        Ok(())
    }

    /// Handle a new WebSocket connection.
    fn handle_connection(&self, stream: TcpStream, addr: SocketAddr) {
        let state = self.state.clone();
        let config = self.config.clone();
        let outbox_capacity = config.outbox_capacity;
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let check_origin = |request: &Request, response: Response| -> Result<Response, ErrorResponse> {
                let origin = request.headers()
                    .get("origin")
                    .and_then(|v| v.to_str().ok());
                if config.origin_allowed(origin) {
                    Ok(response)
                } else {
                    warn!("Refusing {} from origin {:?}", addr, origin);
                    let mut refused = ErrorResponse::new(Some("Origin not allowed".to_string()));
                    *refused.status_mut() = StatusCode::FORBIDDEN;
                    Err(refused)
                }
            };
            let handshake = accept_hdr_async_with_config(stream, check_origin, Some(config.websocket_config()));
            let ws_stream = match handshake.await {
                Ok(ws) => ws,
                Err(e) => {
                    error!("WebSocket handshake failed for {}: {}", addr, e);
                    return;
                }
            };

            let (msg_tx, mut msg_rx) = mpsc::channel::<ServerMessage>(outbox_capacity);

            let admitted = state.lock().await.admit(msg_tx, now_millis());
            let id = match admitted {
                Ok(id) => id,
                Err(e) => {
                    warn!("Rejecting {}: {}", addr, e);
                    if let Err(e) = reject_full(ws_stream).await {
                        error!("Failed to close rejected connection {}: {}", addr, e);
                    }
                    return;
                }
            };

            let (mut ws_sender, mut ws_receiver) = ws_stream.split();

            // Ends when the outbox is unregistered (leave, eviction, disconnect).
            let mut sender_task = tokio::spawn(async move {
                while let Some(msg) = msg_rx.recv().await {
                    let text = match msg.to_json() {
                        Ok(t) => t,
                        Err(e) => {
                            error!("Failed to serialize {}: {}", msg.event_name(), e);
                            continue;
                        }
                    };
                    if ws_sender.send(Message::Text(text)).await.is_err() {
                        return;
                    }
                }
                let _ = ws_sender.close().await;
            });

            loop {
                tokio::select! {
                    msg = ws_receiver.next() => {
                        match msg {
                            Some(Ok(Message::Text(text))) => {
                                let client_msg = match ClientMessage::from_json(&text) {
                                    Ok(m) => m,
                                    Err(e) => {
                                        debug!("Invalid message from {}: {}", id.short(), e);
                                        continue;
                                    }
                                };
                                relay_event(&state, id, client_msg).await;
                            }
                            Some(Ok(Message::Binary(data))) => {
                                match std::str::from_utf8(&data).map(ClientMessage::from_json) {
                                    Ok(Ok(client_msg)) => relay_event(&state, id, client_msg).await,
                                    _ => debug!("Invalid binary frame from {}", id.short()),
                                }
                            }
                            Some(Ok(Message::Close(_))) | None => {
                                debug!("Client {} closed", id.short());
                                break;
                            }
                            Some(Err(e)) => {
                                warn!("WebSocket error for {}: {}", id.short(), e);
                                break;
                            }
                            Some(Ok(_)) => {}
                        }
                    }
                    _ = &mut sender_task => {
                        debug!("Outbox for {} closed", id.short());
                        break;
                    }
                    _ = shutdown_rx.recv() => {
                        break;
                    }
                }
            }

            if let Err(e) = state.lock().await.disconnect(id, now_millis()) {
                debug!("Disconnect for {} already handled: {}", id.short(), e);
            }
            sender_task.abort();
        });
    }

    /// Evict idle sessions on a fixed period.
    async fn run_reaper_loop(state: SharedRelay, period: Duration) {
        let mut interval = interval(period.max(Duration::from_millis(1)));
        interval.tick().await;

        loop {
            interval.tick().await;
            let removed = state.lock().await.reap(now_millis());
            if removed > 0 {
                debug!("Reaper evicted {} session(s)", removed);
            }
        }
    }

    /// Broadcast `serverStats` on a fixed period.
    async fn run_stats_loop(state: SharedRelay, period: Duration) {
        let mut interval = interval(period.max(Duration::from_millis(1)));
        interval.tick().await;

        loop {
            interval.tick().await;
            state.lock().await.broadcast_stats(now_millis());
        }
    }

    /// Stop accepting and close every connection.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());
    }

    /// Current session count.
    pub async fn player_count(&self) -> usize {
        self.state.lock().await.store().len()
    }
}

/// Run one parsed event through the relay and log what was dropped.
async fn relay_event(state: &SharedRelay, id: SessionId, message: ClientMessage) {
    let result = state.lock().await.handle(id, message, now_millis());
    match result {
        Ok(()) => {}
        Err(e @ RelayError::UnknownSession(_)) => warn!("{}", e),
        Err(e) => debug!("Dropped event from {}: {}", id.short(), e),
    }
}

/// Tell a refused client why, then close.
async fn reject_full(mut ws: WebSocketStream<TcpStream>) -> Result<(), RelayServerError> {
    let text = ServerMessage::ServerFull(ServerFull::default())
        .to_json()
        .unwrap_or_default();
    ws.send(Message::Text(text)).await?;
    ws.close(None).await?;
    Ok(())
}
