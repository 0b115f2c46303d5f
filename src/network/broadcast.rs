//! Fan-out
//!
//! Per-session outbound queues. Each connection task owns the receiving
//! half and drains it into its socket; the relay only ever enqueues.

use std::collections::BTreeMap;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tracing::{debug, warn};

use crate::network::protocol::ServerMessage;
use crate::relay::router::{Outbound, Recipients};
use crate::relay::session::SessionId;

/// Outbound queues keyed by session.
#[derive(Debug, Default)]
pub struct Broadcaster {
    outboxes: BTreeMap<SessionId, mpsc::Sender<ServerMessage>>,
}

impl Broadcaster {
    /// Create an empty broadcaster.
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a session's queue. Replaces any previous queue for `id`.
    pub fn register(&mut self, id: SessionId, outbox: mpsc::Sender<ServerMessage>) {
        self.outboxes.insert(id, outbox);
    }

    /// Detach a session's queue. Dropping the sender ends the connection's
    /// writer task once the queue drains.
    pub fn unregister(&mut self, id: &SessionId) -> bool {
        self.outboxes.remove(id).is_some()
    }

    /// Whether `id` has a queue.
    pub fn contains(&self, id: &SessionId) -> bool {
        self.outboxes.contains_key(id)
    }

    /// Number of attached queues.
    pub fn len(&self) -> usize {
        self.outboxes.len()
    }

    /// True when no queues are attached.
    pub fn is_empty(&self) -> bool {
        self.outboxes.is_empty()
    }

    /// Enqueue one message for its recipients. Returns how many queues
    /// accepted it.
    ///
    /// Never blocks. Position updates and stats are skipped once a queue
    /// is down to its last quarter, leaving that headroom for roster and
    /// chat events. A queue too full for those is detached, which closes
    /// the lagging connection so its client rejoins with a fresh snapshot.
    pub fn deliver(&mut self, outbound: &Outbound) -> usize {
        let mut accepted = 0;
        let mut lagging = Vec::new();
        let targets = self.outboxes.iter().filter(|(id, _)| outbound.to.includes(id));
        for (id, tx) in targets {
            match Self::offer(id, tx, &outbound.message) {
                Offer::Queued => accepted += 1,
                Offer::Skipped => {}
                Offer::Lagging => lagging.push(*id),
            }
        }
        for id in &lagging {
            warn!("Outbox full for {}, detaching lagging connection", id.short());
            self.unregister(id);
        }
        accepted
    }

    /// Send to one session.
    pub fn send_to(&mut self, id: SessionId, message: ServerMessage) -> usize {
        self.deliver(&Outbound { to: Recipients::Session(id), message })
    }

    /// Send to everyone except `origin`.
    pub fn broadcast_to_others(&mut self, origin: SessionId, message: ServerMessage) -> usize {
        self.deliver(&Outbound { to: Recipients::AllExcept(origin), message })
    }

    /// Send to everyone.
    pub fn broadcast_to_all(&mut self, message: ServerMessage) -> usize {
        self.deliver(&Outbound { to: Recipients::All, message })
    }

    fn offer(id: &SessionId, tx: &mpsc::Sender<ServerMessage>, message: &ServerMessage) -> Offer {
        if is_superseded_later(message) && tx.capacity() <= reserved_slots(tx) {
            debug!("Outbox for {} backed up, skipping {}", id.short(), message.event_name());
            return Offer::Skipped;
        }
        match tx.try_send(message.clone()) {
            Ok(()) => Offer::Queued,
            Err(TrySendError::Full(_)) if is_superseded_later(message) => Offer::Skipped,
            Err(TrySendError::Full(_)) => Offer::Lagging,
            Err(TrySendError::Closed(_)) => {
                debug!("Outbox closed for {}, dropping {}", id.short(), message.event_name());
                Offer::Skipped
            }
        }
    }
}

enum Offer {
    Queued,
    Skipped,
    Lagging,
}

/// Messages whose next instance replaces this one.
fn is_superseded_later(message: &ServerMessage) -> bool {
    matches!(message, ServerMessage::PlayerMoved(_) | ServerMessage::ServerStats(_))
}

/// Slots held back for events that must not be skipped.
fn reserved_slots(tx: &mpsc::Sender<ServerMessage>) -> usize {
    tx.max_capacity() / 4
}
