//! Outbound Sampler
//!
//! Emits the local vehicle's state at a fixed cadence regardless of
//! whether it moved. The relay uses these reports as a heartbeat.

use crate::core::time::Millis;
use crate::core::vec3::Vec3;
use crate::network::protocol::{ClientMessage, MovementUpdate};

/// Snapshot of the local vehicle.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VehicleSample {
    /// World position.
    pub position: Vec3,
    /// Euler rotation.
    pub rotation: Vec3,
    /// Scalar speed.
    pub speed: f32,
}

/// Anything that can report the local vehicle's state.
pub trait VehicleSource {
    /// Current state at `now`.
    fn sample(&mut self, now: Millis) -> VehicleSample;
}

/// Fixed-period movement reporter.
#[derive(Debug, Clone)]
pub struct OutboundSampler {
    period_ms: u64,
    next_due: Option<Millis>,
}

impl OutboundSampler {
    /// Sampler emitting every `period_ms` milliseconds (clamped to at least 1).
    pub fn new(period_ms: u64) -> Self {
        Self {
            period_ms: period_ms.max(1),
            next_due: None,
        }
    }

    /// Return a `playerMovement` if one is due at `now`.
    ///
    /// The first poll always emits. Missed periods are not replayed.
    pub fn poll<V: VehicleSource + ?Sized>(&mut self, now: Millis, vehicle: &mut V) -> Option<ClientMessage> {
        if let Some(due) = self.next_due {
            if now < due {
                return None;
            }
        }
        self.next_due = Some(now + self.period_ms);

        let sample = vehicle.sample(now);
        Some(ClientMessage::PlayerMovement(MovementUpdate {
            position: sample.position,
            rotation: sample.rotation,
            speed: sample.speed,
            timestamp: Some(now),
        }))
    }

    /// Forget the schedule so the next poll emits immediately.
    pub fn reset(&mut self) {
        self.next_due = None;
    }
}

/// Vehicle driving a circle on the ground plane.
#[derive(Debug, Clone)]
pub struct CircuitVehicle {
    /// Circle radius.
    pub radius: f32,
    /// Angular speed (rad/s).
    pub angular_speed: f32,
    /// Height above ground.
    pub height: f32,
}

impl Default for CircuitVehicle {
    fn default() -> Self {
        Self {
            radius: 20.0,
            angular_speed: 0.5,
            height: 0.5,
        }
    }
}

impl VehicleSource for CircuitVehicle {
    fn sample(&mut self, now: Millis) -> VehicleSample {
        let angle = (now as f64 / 1000.0 * self.angular_speed as f64) as f32;
        VehicleSample {
            position: Vec3::new(self.radius * angle.cos(), self.height, self.radius * angle.sin()),
            rotation: Vec3::new(0.0, -angle, 0.0),
            speed: self.radius * self.angular_speed,
        }
    }
}
