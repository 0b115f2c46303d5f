//! # Portfolio Relay
//!
//! Real-time multiplayer relay for a browser driving game. Clients stream
//! their own vehicle state; the relay tracks sessions, forwards movement,
//! chat and actions to everyone else, and evicts clients that go quiet.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      PORTFOLIO RELAY                         │
//! ├─────────────────────────────────────────────────────────────┤
//! │  core/           - Shared primitives                         │
//! │  ├── vec3.rs     - Positions and rotations                   │
//! │  ├── text.rs     - Markup escaping                           │
//! │  └── time.rs     - Wall-clock milliseconds                   │
//! │                                                              │
//! │  relay/          - Session relay (no I/O)                    │
//! │  ├── session.rs  - Per-player record                         │
//! │  ├── store.rs    - Session table and admission               │
//! │  ├── router.rs   - Event handlers returning dispatches       │
//! │  ├── reaper.rs   - Idle session eviction                     │
//! │  ├── chat.rs     - Chat ring buffer                          │
//! │  └── config.rs   - Relay policy                              │
//! │                                                              │
//! │  network/        - Sockets                                   │
//! │  ├── server.rs   - WebSocket relay server                    │
//! │  ├── broadcast.rs- Per-session outbound queues               │
//! │  ├── http.rs     - JSON diagnostics                          │
//! │  ├── client.rs   - Reconnecting relay client                 │
//! │  └── protocol.rs - Message types                             │
//! │                                                              │
//! │  client/         - Client-side reconciliation                │
//! │  ├── proxy.rs    - Interpolated remote vehicles              │
//! │  ├── world.rs    - Remote roster and connection mode         │
//! │  └── sampler.rs  - Fixed-cadence movement reports            │
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Trust Model
//!
//! Clients are authoritative for their own vehicle. The relay never
//! simulates; it only filters implausible distance for the leaderboard
//! and escapes player text before anyone renders it.

#![warn(missing_docs)]
#![warn(clippy::all)]
#![deny(unsafe_code)]

pub mod client;
pub mod core;
pub mod network;
pub mod relay;

// Re-export commonly used types
pub use crate::core::vec3::Vec3;
pub use crate::core::time::Millis;
pub use network::protocol::{ClientMessage, ServerMessage};
pub use relay::{RelayConfig, RelayError, SessionId, SessionStore};

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
