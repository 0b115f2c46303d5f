//! Staleness Reaper
//!
//! Evicts sessions that stopped sending movement. Runs on a fixed
//! interval from the server; the pure part lives here so it can be
//! driven with synthetic time.

use tracing::info;

use crate::core::time::Millis;
use crate::relay::router::{announce_removal, Dispatch};
use crate::network::protocol::ServerMessage;
use crate::relay::store::SessionStore;

/// Remove every session idle for at least the stale timeout.
///
/// Emits one `playerDisconnected` per evicted session followed by a single
/// `playerCount`. Returns an empty dispatch when nothing was stale.
pub fn reap_stale(store: &mut SessionStore, now: Millis) -> Dispatch {
    let mut dispatch = Dispatch::default();

    for id in store.stale_ids(now) {
        if let Some(session) = store.remove(&id) {
            info!(
                "Removing inactive player: {} ({}) - idle {}s",
                id.short(),
                session.display_name,
                now.saturating_sub(session.last_update) / 1000
            );
            announce_removal(&mut dispatch, id);
        }
    }

    if !dispatch.removed.is_empty() {
        dispatch.send_to_all(ServerMessage::PlayerCount(store.len()));
    }
    dispatch
}
