//! HTTP Diagnostics
//!
//! Read-only JSON endpoints served next to the WebSocket relay.

use axum::extract::{Query, State};
use axum::response::Json;
use axum::routing::get;
use axum::Router;
use serde::{Deserialize, Serialize};
use tokio::net::TcpListener;
use tracing::info;

use crate::core::time::{now_millis, Millis};
use crate::core::vec3::Vec3;
use crate::network::protocol::ChatEntry;
use crate::network::server::{RelayServerError, SharedRelay};
use crate::relay::store::LeaderboardEntry;

/// Leaderboard length.
pub const LEADERBOARD_SIZE: usize = 10;

/// Default and maximum `/api/chat` page sizes.
pub const CHAT_DEFAULT_LIMIT: usize = 20;
/// Upper bound for `?limit=`.
pub const CHAT_MAX_LIMIT: usize = 100;

/// `GET /health`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Health {
    /// Always `"healthy"`.
    pub status: String,
    /// Connected players.
    pub players: usize,
    /// Uptime in seconds.
    pub uptime: u64,
}

/// `GET /api/stats`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Stats {
    /// Always `"online"`.
    pub status: String,
    /// Connected players.
    pub players: usize,
    /// Admission ceiling.
    pub max_players: usize,
    /// Uptime in seconds.
    pub uptime: u64,
    /// Always true for this server.
    pub multiplayer: bool,
}

/// One row of `GET /api/players`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerStatus {
    /// Short id prefix.
    pub id: String,
    /// Display name.
    pub name: String,
    /// RGB color.
    pub color: u32,
    /// Last reported position.
    pub position: Vec3,
    /// Last reported speed.
    pub speed: f32,
    /// Rounded cumulative distance.
    pub distance: u64,
    /// Time of the last movement event.
    pub last_update: Millis,
}

/// `?limit=` for `/api/chat`.
#[derive(Debug, Default, Deserialize)]
pub struct ChatQuery {
    /// Requested page size.
    pub limit: Option<usize>,
}

/// Build the diagnostics router.
pub fn router(state: SharedRelay) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/stats", get(stats))
        .route("/api/leaderboard", get(leaderboard))
        .route("/api/chat", get(chat))
        .route("/api/players", get(players))
        .with_state(state)
}

/// Serve diagnostics on an already-bound listener.
pub async fn serve_http(listener: TcpListener, state: SharedRelay) -> Result<(), RelayServerError> {
    info!("HTTP diagnostics listening on {}", listener.local_addr()?);
    axum::serve(listener, router(state)).await?;
    Ok(())
}

async fn health(State(state): State<SharedRelay>) -> Json<Health> {
    let relay = state.lock().await;
    let store = relay.store();
    Json(Health {
        status: "healthy".to_string(),
        players: store.len(),
        uptime: store.uptime_secs(now_millis()),
    })
}

async fn stats(State(state): State<SharedRelay>) -> Json<Stats> {
    let relay = state.lock().await;
    let stats = relay.store().stats(now_millis());
    Json(Stats {
        status: "online".to_string(),
        players: stats.players,
        max_players: stats.max_players,
        uptime: stats.uptime,
        multiplayer: true,
    })
}

async fn leaderboard(State(state): State<SharedRelay>) -> Json<Vec<LeaderboardEntry>> {
    Json(state.lock().await.store().leaderboard(LEADERBOARD_SIZE))
}

async fn chat(State(state): State<SharedRelay>, Query(query): Query<ChatQuery>) -> Json<Vec<ChatEntry>> {
    let limit = query.limit.unwrap_or(CHAT_DEFAULT_LIMIT).min(CHAT_MAX_LIMIT);
    Json(state.lock().await.store().recent_chat(limit))
}

async fn players(State(state): State<SharedRelay>) -> Json<Vec<PlayerStatus>> {
    let relay = state.lock().await;
    let rows = relay.store().sessions()
        .map(|s| PlayerStatus {
            id: s.id.short(),
            name: s.display_name.clone(),
            color: s.color,
            position: s.position,
            speed: s.speed,
            distance: s.cumulative_distance.round() as u64,
            last_update: s.last_update,
        })
        .collect();
    Json(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex};
    use crate::network::protocol::ClientMessage;
    use crate::network::server::RelayState;
    use crate::relay::config::RelayConfig;

    fn shared() -> SharedRelay {
        Arc::new(Mutex::new(RelayState::new(RelayConfig::default(), now_millis())))
    }

    #[tokio::test]
    async fn test_health_and_stats() {
        let state = shared();
        let (tx, _rx) = mpsc::channel(16);
        state.lock().await.admit(tx, now_millis()).unwrap();

        let Json(h) = health(State(state.clone())).await;
        assert_eq!(h.status, "healthy");
        assert_eq!(h.players, 1);

        let Json(s) = stats(State(state)).await;
        assert_eq!(s.status, "online");
        assert_eq!(s.max_players, 20);
        assert!(s.multiplayer);
        let json = serde_json::to_value(&s).unwrap();
        assert_eq!(json["maxPlayers"], 20);
    }

    #[tokio::test]
    async fn test_chat_limit_clamped() {
        let state = shared();
        let (tx, _rx) = mpsc::channel(512);
        let id = state.lock().await.admit(tx, 0).unwrap();
        for i in 0..150 {
            state.lock().await
                .handle(id, ClientMessage::ChatMessage(format!("hi {}", i)), i)
                .unwrap();
        }

        let Json(page) = chat(State(state.clone()), Query(ChatQuery::default())).await;
        assert_eq!(page.len(), 20);
        assert_eq!(page[19].message, "hi 149");

        let Json(page) = chat(State(state), Query(ChatQuery { limit: Some(1_000) })).await;
        assert_eq!(page.len(), 100);
    }

    #[tokio::test]
    async fn test_players_and_leaderboard() {
        let state = shared();
        let (tx, _rx) = mpsc::channel(16);
        let id = state.lock().await.admit(tx, 0).unwrap();

        let Json(rows) = players(State(state.clone())).await;
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].id, id.short());
        assert_eq!(rows[0].distance, 0);

        let Json(board) = leaderboard(State(state)).await;
        assert_eq!(board.len(), 1);
        assert_eq!(board[0].id, id.short());
    }
}
