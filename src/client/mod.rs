//! Client Reconciliation
//!
//! Pure client-side state: remote player proxies with interpolation, the
//! world they live in, and the fixed-cadence movement sampler. Driven by
//! [`crate::network::client::RelayClient`] but usable with synthetic time.

pub mod proxy;
pub mod sampler;
pub mod world;

pub use proxy::{Interpolation, InterpolationConfig, RemotePlayerProxy};
pub use sampler::{CircuitVehicle, OutboundSampler, VehicleSample, VehicleSource};
pub use world::{ConnectionMode, Notice, RemoteWorld};
