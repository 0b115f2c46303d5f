//! Protocol Messages
//!
//! Wire format for client-server communication over WebSocket.
//! Every frame is a JSON envelope `{"event": "<name>", "data": <payload>}`.

use serde::{Serialize, Deserialize};

use crate::core::time::Millis;
use crate::core::vec3::Vec3;
use crate::relay::session::SessionId;

// =============================================================================
// CLIENT -> SERVER MESSAGES
// =============================================================================

/// Messages sent from client to server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ClientMessage {
    /// Periodic vehicle sample.
    PlayerMovement(MovementUpdate),

    /// Chat line, at most 200 characters.
    ChatMessage(String),

    /// Cosmetic action (horn, lights).
    PlayerAction(ActionRequest),

    /// Display name change.
    ChangeName(String),

    /// Explicit disconnect.
    Leave,
}

/// Vehicle state reported by the owning client.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MovementUpdate {
    /// World position.
    pub position: Vec3,
    /// Euler rotation.
    pub rotation: Vec3,
    /// Scalar speed.
    #[serde(default)]
    pub speed: f32,
    /// Client send time, informational only.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Millis>,
}

/// Cosmetic action request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ActionRequest {
    /// Action type, e.g. `"horn"`.
    #[serde(rename = "type")]
    pub kind: String,
    /// Opaque payload relayed verbatim.
    #[serde(default)]
    pub data: serde_json::Value,
}

// =============================================================================
// SERVER -> CLIENT MESSAGES
// =============================================================================

/// Messages sent from server to client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "data", rename_all = "camelCase")]
pub enum ServerMessage {
    /// The receiving client's own session, sent first on admission.
    Welcome(PlayerSummary),

    /// Every other connected player, sent on admission.
    CurrentPlayers(Vec<PlayerSummary>),

    /// Recent chat, sent on admission.
    ChatHistory(Vec<ChatEntry>),

    /// Another player was admitted.
    NewPlayer(PlayerSummary),

    /// Another player moved.
    PlayerMoved(PlayerMoved),

    /// Another player performed an action.
    PlayerAction(PlayerActionEvent),

    /// A player changed name.
    PlayerRenamed(PlayerRenamed),

    /// A player left or was evicted.
    PlayerDisconnected(SessionId),

    /// Current session count.
    PlayerCount(usize),

    /// Periodic server statistics.
    ServerStats(ServerStats),

    /// Relayed chat line.
    ChatMessage(ChatEntry),

    /// Admission rejected; the server closes the socket next.
    ServerFull(ServerFull),
}

/// Public view of a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerSummary {
    /// Session identifier.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// RGB color.
    pub color: u32,
    /// Last known position.
    pub position: Vec3,
    /// Last known rotation.
    #[serde(default)]
    pub rotation: Vec3,
}

/// Movement relayed to peers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PlayerMoved {
    /// Who moved.
    pub id: SessionId,
    /// New position.
    pub position: Vec3,
    /// New rotation.
    pub rotation: Vec3,
    /// Reported speed.
    pub speed: f32,
}

/// Action relayed to peers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlayerActionEvent {
    /// Who acted.
    pub id: SessionId,
    /// Action type.
    pub action: String,
    /// Opaque payload.
    #[serde(default)]
    pub data: serde_json::Value,
}

/// Rename notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayerRenamed {
    /// Who renamed.
    pub id: SessionId,
    /// Previous name.
    pub old_name: String,
    /// New name.
    pub new_name: String,
}

/// Relayed chat line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatEntry {
    /// Sender.
    pub id: SessionId,
    /// Sender name at send time.
    pub name: String,
    /// Sender color.
    pub color: u32,
    /// Escaped message text.
    pub message: String,
    /// Server receive time (ms since epoch).
    pub timestamp: Millis,
}

/// Server statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerStats {
    /// Connected players.
    pub players: usize,
    /// Admission ceiling.
    pub max_players: usize,
    /// Uptime in seconds.
    pub uptime: u64,
}

/// Admission rejection notice.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerFull {
    /// Human-readable message.
    pub message: String,
}

impl Default for ServerFull {
    fn default() -> Self {
        Self { message: "Server is full. Try again later.".to_string() }
    }
}

// =============================================================================
// SERIALIZATION HELPERS
// =============================================================================

impl ClientMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }
}

impl ServerMessage {
    /// Serialize to JSON string.
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    /// Deserialize from JSON string.
    pub fn from_json(s: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(s)
    }

    /// Event name as it appears on the wire, for logging.
    pub fn event_name(&self) -> &'static str {
        match self {
            ServerMessage::Welcome(_) => "welcome",
            ServerMessage::CurrentPlayers(_) => "currentPlayers",
            ServerMessage::ChatHistory(_) => "chatHistory",
            ServerMessage::NewPlayer(_) => "newPlayer",
            ServerMessage::PlayerMoved(_) => "playerMoved",
            ServerMessage::PlayerAction(_) => "playerAction",
            ServerMessage::PlayerRenamed(_) => "playerRenamed",
            ServerMessage::PlayerDisconnected(_) => "playerDisconnected",
            ServerMessage::PlayerCount(_) => "playerCount",
            ServerMessage::ServerStats(_) => "serverStats",
            ServerMessage::ChatMessage(_) => "chatMessage",
            ServerMessage::ServerFull(_) => "serverFull",
        }
    }
}
