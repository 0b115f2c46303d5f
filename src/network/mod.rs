//! Network Layer
//!
//! WebSocket relay server, HTTP diagnostics and the relay client.
//! Everything with a socket lives here; the relay logic itself is in `relay/`.

pub mod broadcast;
pub mod client;
pub mod http;
pub mod protocol;
pub mod server;

pub use broadcast::Broadcaster;
pub use client::{ClientConfig, ClientError, ClientExit, RelayClient};
pub use protocol::{ClientMessage, ServerMessage};
pub use server::{RelayServer, RelayServerError, RelayState, ServerConfig, SharedRelay};
