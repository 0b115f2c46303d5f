//! Session Relay
//!
//! Transport-independent core of the multiplayer server: the session
//! store, admission control, event handlers and the staleness reaper.
//! Nothing in here touches a socket; handlers return the messages to
//! send and the network layer delivers them.

pub mod chat;
pub mod config;
pub mod reaper;
pub mod router;
pub mod session;
pub mod store;

pub use config::RelayConfig;
pub use reaper::reap_stale;
pub use router::{Dispatch, Outbound, Recipients};
pub use session::{Session, SessionId};
pub use store::{LeaderboardEntry, SessionStore};

/// Errors raised while handling a single relay event.
///
/// None of these are fatal to the relay; the caller logs and moves on.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum RelayError {
    /// Admission refused at the capacity ceiling.
    #[error("Server is full ({capacity} players)")]
    ServerFull {
        /// Configured ceiling.
        capacity: usize,
    },

    /// Event for a session that is no longer in the store.
    #[error("Unknown session {0}")]
    UnknownSession(SessionId),

    /// Payload failed validation.
    #[error("Malformed event: {0}")]
    MalformedEvent(&'static str),

    /// Chat line refused.
    #[error("Chat rejected: {0}")]
    ChatRejected(&'static str),

    /// Rename refused.
    #[error("Name rejected: {0}")]
    NameRejected(&'static str),
}
