//! Relay Policy
//!
//! Capacity, distance thresholds, and timer periods for the session relay.

use std::str::FromStr;
use std::time::Duration;
use tracing::warn;

/// Relay policy knobs.
#[derive(Debug, Clone)]
pub struct RelayConfig {
    /// Maximum concurrent sessions.
    pub max_players: usize,
    /// Planar movement deltas at or below this are treated as jitter.
    pub noise_threshold: f32,
    /// Planar movement deltas at or above this are treated as teleports.
    pub teleport_ceiling: f32,
    /// Sessions with no movement for this long are evicted.
    pub stale_timeout: Duration,
    /// Period of the staleness sweep.
    pub reaper_interval: Duration,
    /// Period of the `serverStats` broadcast.
    pub stats_interval: Duration,
    /// Chat ring buffer capacity.
    pub chat_history_capacity: usize,
    /// Chat entries sent to a newly admitted client.
    pub chat_snapshot_len: usize,
    /// Longest accepted chat message, in characters.
    pub max_chat_len: usize,
    /// Display names must be strictly shorter than this, in characters.
    pub max_name_len: usize,
}

impl Default for RelayConfig {
    fn default() -> Self {
        Self {
            max_players: 20,
            noise_threshold: 0.1,
            teleport_ceiling: 50.0,
            stale_timeout: Duration::from_secs(30),
            reaper_interval: Duration::from_secs(10),
            stats_interval: Duration::from_secs(60),
            chat_history_capacity: 100,
            chat_snapshot_len: 20,
            max_chat_len: 200,
            max_name_len: 20,
        }
    }
}

impl RelayConfig {
    /// Create config from environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            max_players: env_or("RELAY_MAX_PLAYERS", d.max_players),
            noise_threshold: env_or("RELAY_NOISE_THRESHOLD", d.noise_threshold),
            teleport_ceiling: env_or("RELAY_TELEPORT_CEILING", d.teleport_ceiling),
            stale_timeout: env_secs("RELAY_STALE_TIMEOUT_SECS", d.stale_timeout),
            reaper_interval: env_secs("RELAY_REAPER_INTERVAL_SECS", d.reaper_interval),
            stats_interval: env_secs("RELAY_STATS_INTERVAL_SECS", d.stats_interval),
            chat_history_capacity: env_or("RELAY_CHAT_HISTORY", d.chat_history_capacity),
            chat_snapshot_len: d.chat_snapshot_len,
            max_chat_len: d.max_chat_len,
            max_name_len: d.max_name_len,
        }
    }

    /// Stale timeout in milliseconds.
    pub fn stale_timeout_ms(&self) -> u64 {
        self.stale_timeout.as_millis() as u64
    }

    /// Whether a planar movement delta counts toward cumulative distance.
    #[inline]
    pub fn counts_as_travel(&self, delta: f32) -> bool {
        delta > self.noise_threshold && delta < self.teleport_ceiling
    }
}

/// Parse an environment variable, warning and using `default` when it is invalid.
pub(crate) fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match std::env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(v) => v,
            Err(_) => {
                warn!("Ignoring invalid {}={:?}", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}

/// Parse a whole-seconds duration from the environment.
pub(crate) fn env_secs(key: &str, default: Duration) -> Duration {
    Duration::from_secs(env_or(key, default.as_secs()))
}
