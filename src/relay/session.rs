//! Player Sessions
//!
//! Server-side record of one connected player.

use std::collections::BTreeMap;
use std::fmt;
use rand::Rng;
use rand::seq::SliceRandom;
use serde::{Serialize, Deserialize};
use uuid::Uuid;

use crate::core::time::{Millis, elapsed_secs};
use crate::core::vec3::Vec3;
use crate::network::protocol::PlayerSummary;
use crate::relay::config::RelayConfig;

/// Colors handed out to players at connect time.
pub const COLOR_PALETTE: [u32; 6] = [
    0x00ffff, 0xff00ff, 0xffff00, 0xff6600, 0x00ff99, 0x9966ff,
];

/// Default name prefixes; a number in `0..1000` is appended.
pub const NAME_PREFIXES: [&str; 8] = [
    "Explorer", "Driver", "Visitor", "Guest", "Traveler", "Pioneer", "Voyager", "Rider",
];

/// Where every new session starts.
pub const SPAWN_POSITION: Vec3 = Vec3::new(0.0, 0.5, 0.0);

/// Unique connection identifier, assigned at admission.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    /// Allocate a fresh random identifier.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// First 8 hex digits, for logs and leaderboards.
    pub fn short(&self) -> String {
        let mut s = self.0.simple().to_string();
        s.truncate(8);
        s
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Debug for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SessionId({})", self.short())
    }
}

/// Pick a default display name.
pub fn random_name<R: Rng + ?Sized>(rng: &mut R) -> String {
    let prefix = NAME_PREFIXES.choose(rng).copied().unwrap_or("Player");
    format!("{}{}", prefix, rng.gen_range(0..1000))
}

/// Pick a color from the palette.
pub fn random_color<R: Rng + ?Sized>(rng: &mut R) -> u32 {
    COLOR_PALETTE.choose(rng).copied().unwrap_or(COLOR_PALETTE[0])
}

/// Last occurrence of one action type.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordedAction {
    /// When the action was received.
    pub timestamp: Millis,
    /// Opaque client payload.
    pub data: serde_json::Value,
}

/// A connected player.
#[derive(Debug, Clone)]
pub struct Session {
    /// Connection identifier.
    pub id: SessionId,
    /// Display name (already escaped).
    pub display_name: String,
    /// RGB color, fixed for the session.
    pub color: u32,
    /// Last reported position.
    pub position: Vec3,
    /// Last reported Euler rotation.
    pub rotation: Vec3,
    /// Last reported speed.
    pub speed: f32,
    /// Accepted planar travel, for the leaderboard.
    pub cumulative_distance: f64,
    /// Time of the last movement event (join time until the first one).
    pub last_update: Millis,
    /// Time of admission.
    pub joined_at: Millis,
    /// Latest action per action type.
    pub actions: BTreeMap<String, RecordedAction>,
}

impl Session {
    /// Create a session at the spawn point.
    pub fn new(id: SessionId, display_name: String, color: u32, now: Millis) -> Self {
        Self {
            id,
            display_name,
            color,
            position: SPAWN_POSITION,
            rotation: Vec3::ZERO,
            speed: 0.0,
            cumulative_distance: 0.0,
            last_update: now,
            joined_at: now,
            actions: BTreeMap::new(),
        }
    }

    /// Apply a movement report. Returns the planar delta credited to
    /// `cumulative_distance` (zero for jitter or teleports).
    pub fn apply_movement(
        &mut self,
        position: Vec3,
        rotation: Vec3,
        speed: f32,
        now: Millis,
        config: &RelayConfig,
    ) -> f32 {
        let delta = self.position.planar_distance(position);
        let credited = if config.counts_as_travel(delta) { delta } else { 0.0 };
        self.cumulative_distance += credited as f64;

        self.position = position;
        self.rotation = rotation;
        self.speed = speed;
        self.last_update = now;
        credited
    }

    /// Remember an action for later queries.
    pub fn record_action(&mut self, kind: &str, data: serde_json::Value, now: Millis) {
        self.actions.insert(kind.to_string(), RecordedAction { timestamp: now, data });
    }

    /// Replace the display name, returning the old one.
    pub fn rename(&mut self, new_name: String) -> String {
        std::mem::replace(&mut self.display_name, new_name)
    }

    /// True when no movement has arrived within `timeout_ms`.
    #[inline]
    pub fn is_stale(&self, now: Millis, timeout_ms: u64) -> bool {
        now.saturating_sub(self.last_update) >= timeout_ms
    }

    /// Seconds since admission.
    pub fn duration_secs(&self, now: Millis) -> u64 {
        elapsed_secs(self.joined_at, now)
    }

    /// Public view sent to other clients.
    pub fn summary(&self) -> PlayerSummary {
        PlayerSummary {
            id: self.id,
            name: self.display_name.clone(),
            color: self.color,
            position: self.position,
            rotation: self.rotation,
        }
    }
}
