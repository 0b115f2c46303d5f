//! Session Store
//!
//! Owns every live [`Session`] plus the chat history. Admission control
//! lives here because the capacity check and the insert must happen in
//! the same mutation.

use std::collections::BTreeMap;
use rand::Rng;
use serde::Serialize;

use crate::core::time::{Millis, elapsed_secs};
use crate::core::vec3::Vec3;
use crate::network::protocol::{ChatEntry, PlayerSummary, ServerStats};
use crate::relay::chat::ChatHistory;
use crate::relay::config::RelayConfig;
use crate::relay::session::{Session, SessionId, random_color, random_name};
use crate::relay::RelayError;

/// One leaderboard row.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct LeaderboardEntry {
    /// Short id prefix.
    pub id: String,
    /// Display name.
    pub name: String,
    /// Rounded cumulative distance.
    pub distance: u64,
    /// Admission time (ms since epoch).
    pub join_time: Millis,
}

/// In-memory session table.
#[derive(Debug)]
pub struct SessionStore {
    config: RelayConfig,
    sessions: BTreeMap<SessionId, Session>,
    chat: ChatHistory,
    started_at: Millis,
}

impl SessionStore {
    /// Create an empty store. `now` is the process start time used for uptime.
    pub fn new(config: RelayConfig, now: Millis) -> Self {
        let chat = ChatHistory::new(config.chat_history_capacity);
        Self {
            config,
            sessions: BTreeMap::new(),
            chat,
            started_at: now,
        }
    }

    /// Relay policy.
    pub fn config(&self) -> &RelayConfig {
        &self.config
    }

    /// Admit a new session with a random name and color.
    pub fn try_admit(&mut self, now: Millis) -> Result<&Session, RelayError> {
        self.try_admit_with(&mut rand::thread_rng(), now)
    }

    /// Admit a new session using the given RNG for its defaults.
    pub fn try_admit_with<R: Rng + ?Sized>(
        &mut self,
        rng: &mut R,
        now: Millis,
    ) -> Result<&Session, RelayError> {
        if self.sessions.len() >= self.config.max_players {
            return Err(RelayError::ServerFull { capacity: self.config.max_players });
        }

        let mut id = SessionId::new();
        while self.sessions.contains_key(&id) {
            id = SessionId::new();
        }

        let session = Session::new(id, random_name(rng), random_color(rng), now);
        let session = self.sessions.entry(id).or_insert(session);
        Ok(&*session)
    }

    /// Remove a session. Returns `None` if it was already gone.
    pub fn remove(&mut self, id: &SessionId) -> Option<Session> {
        self.sessions.remove(id)
    }

    /// Look up a session.
    pub fn get(&self, id: &SessionId) -> Option<&Session> {
        self.sessions.get(id)
    }

    /// Look up a session for mutation.
    pub fn get_mut(&mut self, id: &SessionId) -> Option<&mut Session> {
        self.sessions.get_mut(id)
    }

    /// Apply a movement report to a session. Returns the credited distance.
    pub fn record_movement(
        &mut self,
        id: &SessionId,
        position: Vec3,
        rotation: Vec3,
        speed: f32,
        now: Millis,
    ) -> Result<f32, RelayError> {
        let session = self.sessions.get_mut(id).ok_or(RelayError::UnknownSession(*id))?;
        Ok(session.apply_movement(position, rotation, speed, now, &self.config))
    }

    /// Whether a session is live.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.sessions.contains_key(id)
    }

    /// Live session count.
    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    /// True when nobody is connected.
    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }

    /// Admission ceiling.
    pub fn capacity(&self) -> usize {
        self.config.max_players
    }

    /// Iterate over live sessions in id order.
    pub fn sessions(&self) -> impl Iterator<Item = &Session> {
        self.sessions.values()
    }

    /// Snapshot of every live session.
    pub fn list(&self) -> Vec<PlayerSummary> {
        self.sessions.values().map(Session::summary).collect()
    }

    /// Snapshot of every live session except `id`.
    pub fn summaries_except(&self, id: &SessionId) -> Vec<PlayerSummary> {
        self.sessions.values()
            .filter(|s| s.id != *id)
            .map(Session::summary)
            .collect()
    }

    /// Sessions whose last movement is older than the stale timeout.
    pub fn stale_ids(&self, now: Millis) -> Vec<SessionId> {
        let timeout = self.config.stale_timeout_ms();
        self.sessions.values()
            .filter(|s| s.is_stale(now, timeout))
            .map(|s| s.id)
            .collect()
    }

    /// Chat history.
    pub fn chat(&self) -> &ChatHistory {
        &self.chat
    }

    /// The last `limit` chat entries, oldest first.
    pub fn recent_chat(&self, limit: usize) -> Vec<ChatEntry> {
        self.chat.recent(limit)
    }

    /// Chat history for appending.
    pub fn chat_mut(&mut self) -> &mut ChatHistory {
        &mut self.chat
    }

    /// Top `limit` sessions by cumulative distance.
    pub fn leaderboard(&self, limit: usize) -> Vec<LeaderboardEntry> {
        let mut ranked: Vec<&Session> = self.sessions.values().collect();
        ranked.sort_by(|a, b| b.cumulative_distance.total_cmp(&a.cumulative_distance));
        ranked.into_iter()
            .take(limit)
            .map(|s| LeaderboardEntry {
                id: s.id.short(),
                name: s.display_name.clone(),
                distance: s.cumulative_distance.round() as u64,
                join_time: s.joined_at,
            })
            .collect()
    }

    /// Seconds since the store was created.
    pub fn uptime_secs(&self, now: Millis) -> u64 {
        elapsed_secs(self.started_at, now)
    }

    /// Payload for the periodic `serverStats` broadcast.
    pub fn stats(&self, now: Millis) -> ServerStats {
        ServerStats {
            players: self.len(),
            max_players: self.capacity(),
            uptime: self.uptime_secs(now),
        }
    }
}
