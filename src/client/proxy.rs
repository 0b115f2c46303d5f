//! Remote Player Proxy
//!
//! Client-side stand-in for another player's vehicle. Movement reports
//! arrive at 20 Hz; the proxy blends toward each one over a short window
//! so rendering at a higher frame rate stays smooth.

use crate::core::time::Millis;
use crate::core::vec3::Vec3;
use crate::network::protocol::{PlayerMoved, PlayerSummary};
use crate::relay::session::SessionId;

/// Interpolation tuning.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InterpolationConfig {
    /// Time to blend from the rendered position to a new target (ms).
    pub window_ms: u64,
    /// Fraction of the remaining rotation error closed per frame.
    pub rotation_smoothing: f32,
    /// Rotation error below which the rendered rotation snaps to target.
    pub rotation_snap: f32,
    /// Proxies silent for this long are dropped (ms).
    pub stale_after_ms: u64,
}

impl Default for InterpolationConfig {
    fn default() -> Self {
        Self {
            window_ms: 100,
            rotation_smoothing: 0.1,
            rotation_snap: 1e-3,
            stale_after_ms: 10_000,
        }
    }
}

/// Position blending state.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Interpolation {
    /// Resting at the last target.
    Idle,
    /// Blending from `from` to `to`, finishing at `deadline`.
    Interpolating {
        /// Rendered position when the report arrived.
        from: Vec3,
        /// Reported position.
        to: Vec3,
        /// Time the blend completes.
        deadline: Millis,
    },
}

/// Another player's vehicle as this client renders it.
#[derive(Debug, Clone)]
pub struct RemotePlayerProxy {
    /// Session id.
    pub id: SessionId,
    /// Display name.
    pub name: String,
    /// RGB color.
    pub color: u32,
    /// Position drawn this frame.
    pub rendered_position: Vec3,
    /// Rotation drawn this frame.
    pub rendered_rotation: Vec3,
    /// Rotation being smoothed toward.
    pub target_rotation: Vec3,
    /// Last reported speed.
    pub speed: f32,
    /// Last action type received.
    pub last_action: Option<String>,
    /// Time of the last message about this player.
    pub last_message_at: Millis,
    state: Interpolation,
}

impl RemotePlayerProxy {
    /// Create a proxy resting at the summary's position.
    pub fn new(summary: &PlayerSummary, now: Millis) -> Self {
        Self {
            id: summary.id,
            name: summary.name.clone(),
            color: summary.color,
            rendered_position: summary.position,
            rendered_rotation: summary.rotation,
            target_rotation: summary.rotation,
            speed: 0.0,
            last_action: None,
            last_message_at: now,
            state: Interpolation::Idle,
        }
    }

    /// Current blending state.
    pub fn interpolation(&self) -> Interpolation {
        self.state
    }

    /// Start blending toward a new movement report.
    pub fn on_moved(&mut self, moved: &PlayerMoved, now: Millis, config: &InterpolationConfig) {
        self.state = Interpolation::Interpolating {
            from: self.rendered_position,
            to: moved.position,
            deadline: now + config.window_ms,
        };
        self.target_rotation = moved.rotation;
        self.speed = if moved.speed.is_finite() { moved.speed } else { 0.0 };
        self.touch(now);
    }

    /// Record an action for display.
    pub fn on_action(&mut self, action: &str, now: Millis) {
        self.last_action = Some(action.to_string());
        self.touch(now);
    }

    /// Apply a rename.
    pub fn on_renamed(&mut self, new_name: &str, now: Millis) {
        self.name = new_name.to_string();
        self.touch(now);
    }

    fn touch(&mut self, now: Millis) {
        self.last_message_at = self.last_message_at.max(now);
    }

    /// Advance rendering to `now`. Call once per frame.
    pub fn advance(&mut self, now: Millis, config: &InterpolationConfig) {
        if let Interpolation::Interpolating { from, to, deadline } = self.state {
            if now < deadline && config.window_ms > 0 {
                let remaining = (deadline - now) as f32 / config.window_ms as f32;
                self.rendered_position = from.lerp(to, 1.0 - remaining);
            } else {
                self.rendered_position = to;
                self.state = Interpolation::Idle;
            }
        }

        let error = self.target_rotation - self.rendered_rotation;
        if self.target_rotation.max_abs_diff(self.rendered_rotation) < config.rotation_snap {
            self.rendered_rotation = self.target_rotation;
        } else {
            self.rendered_rotation = self.rendered_rotation + error * config.rotation_smoothing;
        }
    }

    /// True when nothing has been heard for the staleness window.
    pub fn is_stale(&self, now: Millis, config: &InterpolationConfig) -> bool {
        now.saturating_sub(self.last_message_at) >= config.stale_after_ms
    }
}
