//! Event Router
//!
//! One handler per inbound event. Each handler validates its payload,
//! mutates the [`SessionStore`] and returns a [`Dispatch`] describing who
//! should receive what. Handlers never perform I/O, so they run to
//! completion while the caller holds the store.

use tracing::{debug, info, trace};

use crate::core::text::{char_len, escape_markup};
use crate::core::time::Millis;
use crate::network::protocol::{
    ActionRequest, ChatEntry, ClientMessage, MovementUpdate, PlayerActionEvent,
    PlayerMoved, PlayerRenamed, ServerMessage,
};
use crate::relay::session::SessionId;
use crate::relay::store::SessionStore;
use crate::relay::RelayError;

/// Who receives an outbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recipients {
    /// Exactly one session.
    Session(SessionId),
    /// Every connected session except the origin.
    AllExcept(SessionId),
    /// Every connected session.
    All,
}

impl Recipients {
    /// Whether `id` is addressed.
    pub fn includes(&self, id: &SessionId) -> bool {
        match self {
            Recipients::Session(target) => target == id,
            Recipients::AllExcept(origin) => origin != id,
            Recipients::All => true,
        }
    }
}

/// A message bound for one or more sessions.
#[derive(Debug, Clone, PartialEq)]
pub struct Outbound {
    /// Addressees.
    pub to: Recipients,
    /// Payload.
    pub message: ServerMessage,
}

/// Result of handling one event.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Dispatch {
    /// Messages to deliver, in order.
    pub outbound: Vec<Outbound>,
    /// Sessions removed from the store by this event.
    pub removed: Vec<SessionId>,
}

impl Dispatch {
    /// Queue a message for one session.
    pub fn send_to(&mut self, id: SessionId, message: ServerMessage) {
        self.outbound.push(Outbound { to: Recipients::Session(id), message });
    }

    /// Queue a message for everyone but `origin`.
    pub fn send_to_others(&mut self, origin: SessionId, message: ServerMessage) {
        self.outbound.push(Outbound { to: Recipients::AllExcept(origin), message });
    }

    /// Queue a message for everyone.
    pub fn send_to_all(&mut self, message: ServerMessage) {
        self.outbound.push(Outbound { to: Recipients::All, message });
    }

    /// True when there is nothing to send and nobody was removed.
    pub fn is_empty(&self) -> bool {
        self.outbound.is_empty() && self.removed.is_empty()
    }

    /// Messages addressed to `id`, in order.
    pub fn messages_for(&self, id: &SessionId) -> Vec<&ServerMessage> {
        self.outbound.iter()
            .filter(|o| o.to.includes(id))
            .map(|o| &o.message)
            .collect()
    }
}

// =============================================================================
// ADMISSION & REMOVAL
// =============================================================================

/// Admit a new connection.
///
/// The new session gets its own summary, its peers, and recent chat.
/// Everyone else learns about the newcomer.
pub fn admit(store: &mut SessionStore, now: Millis) -> Result<(SessionId, Dispatch), RelayError> {
    let summary = store.try_admit(now)?.summary();
    let id = summary.id;

    let mut dispatch = Dispatch::default();
    dispatch.send_to(id, ServerMessage::Welcome(summary.clone()));
    dispatch.send_to(id, ServerMessage::CurrentPlayers(store.summaries_except(&id)));
    let history = store.recent_chat(store.config().chat_snapshot_len);
    dispatch.send_to(id, ServerMessage::ChatHistory(history));
    dispatch.send_to_others(id, ServerMessage::NewPlayer(summary.clone()));
    dispatch.send_to_all(ServerMessage::PlayerCount(store.len()));

    info!("Player connected: {} ({}) - Total: {}", id.short(), summary.name, store.len());
    Ok((id, dispatch))
}

/// Queue the broadcast for a session that has already left the store.
pub(crate) fn announce_removal(dispatch: &mut Dispatch, id: SessionId) {
    dispatch.removed.push(id);
    dispatch.send_to_all(ServerMessage::PlayerDisconnected(id));
}

/// Remove a session on explicit or transport-level disconnect.
pub fn on_disconnect(store: &mut SessionStore, id: SessionId, now: Millis) -> Result<Dispatch, RelayError> {
    let session = store.remove(&id).ok_or(RelayError::UnknownSession(id))?;

    info!("Player disconnected: {} ({}) - Total: {}", id.short(), session.display_name, store.len());
    info!(
        "   Session: {}s, Distance: {}m",
        session.duration_secs(now),
        session.cumulative_distance.round()
    );

    let mut dispatch = Dispatch::default();
    announce_removal(&mut dispatch, id);
    dispatch.send_to_all(ServerMessage::PlayerCount(store.len()));
    Ok(dispatch)
}

// =============================================================================
// EVENT HANDLERS
// =============================================================================

/// Route one inbound event to its handler.
pub fn dispatch(
    store: &mut SessionStore,
    id: SessionId,
    message: ClientMessage,
    now: Millis,
) -> Result<Dispatch, RelayError> {
    match message {
        ClientMessage::PlayerMovement(update) => on_move(store, id, update, now),
        ClientMessage::ChatMessage(raw) => on_chat(store, id, &raw, now),
        ClientMessage::PlayerAction(action) => on_action(store, id, action, now),
        ClientMessage::ChangeName(name) => on_rename(store, id, &name),
        ClientMessage::Leave => on_disconnect(store, id, now),
    }
}

/// Movement report: update the session and relay to everyone else.
pub fn on_move(
    store: &mut SessionStore,
    id: SessionId,
    update: MovementUpdate,
    now: Millis,
) -> Result<Dispatch, RelayError> {
    if !update.position.is_finite() || !update.rotation.is_finite() {
        return Err(RelayError::MalformedEvent("non-finite movement"));
    }
    let speed = if update.speed.is_finite() { update.speed } else { 0.0 };

    let credited = store.record_movement(&id, update.position, update.rotation, speed, now)?;
    trace!("{} moved to {:?} (+{:.2})", id.short(), update.position, credited);

    let mut dispatch = Dispatch::default();
    dispatch.send_to_others(id, ServerMessage::PlayerMoved(PlayerMoved {
        id,
        position: update.position,
        rotation: update.rotation,
        speed,
    }));
    Ok(dispatch)
}

/// Chat line: escape, remember, relay to everyone including the sender.
pub fn on_chat(
    store: &mut SessionStore,
    id: SessionId,
    raw: &str,
    now: Millis,
) -> Result<Dispatch, RelayError> {
    let (name, color) = match store.get(&id) {
        Some(s) => (s.display_name.clone(), s.color),
        None => return Err(RelayError::UnknownSession(id)),
    };

    if char_len(raw) > store.config().max_chat_len {
        return Err(RelayError::ChatRejected("message too long"));
    }
    if raw.trim().is_empty() {
        return Err(RelayError::ChatRejected("empty message"));
    }

    let entry = ChatEntry {
        id,
        name,
        color,
        message: escape_markup(raw),
        timestamp: now,
    };
    store.chat_mut().push(entry.clone());
    debug!("Chat from {}: {}", id.short(), entry.message);

    let mut dispatch = Dispatch::default();
    dispatch.send_to_all(ServerMessage::ChatMessage(entry));
    Ok(dispatch)
}

/// Cosmetic action: record and relay verbatim to everyone else.
pub fn on_action(
    store: &mut SessionStore,
    id: SessionId,
    action: ActionRequest,
    now: Millis,
) -> Result<Dispatch, RelayError> {
    if action.kind.trim().is_empty() {
        return Err(RelayError::MalformedEvent("missing action type"));
    }

    let session = store.get_mut(&id).ok_or(RelayError::UnknownSession(id))?;
    session.record_action(&action.kind, action.data.clone(), now);

    let mut dispatch = Dispatch::default();
    dispatch.send_to_others(id, ServerMessage::PlayerAction(PlayerActionEvent {
        id,
        action: action.kind,
        data: action.data,
    }));
    Ok(dispatch)
}

/// Rename: accept `0 < len < max_name_len` after escaping, tell everyone.
pub fn on_rename(store: &mut SessionStore, id: SessionId, requested: &str) -> Result<Dispatch, RelayError> {
    let max_len = store.config().max_name_len;
    let session = store.get_mut(&id).ok_or(RelayError::UnknownSession(id))?;

    let new_name = escape_markup(requested.trim());
    let len = char_len(&new_name);
    if len == 0 {
        return Err(RelayError::NameRejected("empty name"));
    }
    if len >= max_len {
        return Err(RelayError::NameRejected("name too long"));
    }

    let old_name = session.rename(new_name.clone());
    info!("Player {} renamed: {} -> {}", id.short(), old_name, new_name);

    let mut dispatch = Dispatch::default();
    dispatch.send_to_all(ServerMessage::PlayerRenamed(PlayerRenamed { id, old_name, new_name }));
    Ok(dispatch)
}

/// Periodic `serverStats` broadcast.
pub fn server_stats(store: &SessionStore, now: Millis) -> Dispatch {
    let mut dispatch = Dispatch::default();
    dispatch.send_to_all(ServerMessage::ServerStats(store.stats(now)));
    dispatch
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::Vec3;
    use crate::network::protocol::PlayerSummary;
    use crate::relay::config::RelayConfig;
    use proptest::prelude::*;

    fn store() -> SessionStore {
        SessionStore::new(RelayConfig::default(), 0)
    }

    fn movement(x: f32, z: f32) -> MovementUpdate {
        MovementUpdate {
            position: Vec3::new(x, 0.5, z),
            rotation: Vec3::ZERO,
            speed: 10.0,
            timestamp: None,
        }
    }

    fn distance_of(store: &SessionStore, id: &SessionId) -> f64 {
        store.get(id).unwrap().cumulative_distance
    }

    #[test]
    fn test_admit_sends_snapshot_to_newcomer() {
        let mut store = store();
        let (first, _) = admit(&mut store, 0).unwrap();
        let (second, dispatch) = admit(&mut store, 0).unwrap();

        let to_second = dispatch.messages_for(&second);
        assert!(matches!(to_second[0], ServerMessage::Welcome(s) if s.id == second));
        match to_second[1] {
            ServerMessage::CurrentPlayers(peers) => {
                assert_eq!(peers.len(), 1);
                assert_eq!(peers[0].id, first);
            }
            other => panic!("expected currentPlayers, got {:?}", other),
        }
        assert!(matches!(to_second[2], ServerMessage::ChatHistory(h) if h.is_empty()));
        assert!(!to_second.iter().any(|m| matches!(m, ServerMessage::NewPlayer(_))));
    }

    #[test]
    fn test_three_clients_join_in_sequence() {
        let mut store = store();
        let (c1, _) = admit(&mut store, 0).unwrap();
        let (c2, d2) = admit(&mut store, 0).unwrap();
        let (c3, d3) = admit(&mut store, 0).unwrap();

        // Client 3 sees exactly clients 1 and 2.
        let peers: Vec<SessionId> = d3.messages_for(&c3).iter()
            .find_map(|m| match m {
                ServerMessage::CurrentPlayers(p) => Some(p.iter().map(|s| s.id).collect()),
                _ => None,
            })
            .unwrap();
        assert_eq!(peers.len(), 2);
        assert!(peers.contains(&c1) && peers.contains(&c2));

        // Clients 1 and 2 each hear about client 3.
        for peer in [c1, c2] {
            let new_players: Vec<&PlayerSummary> = d3.messages_for(&peer).into_iter()
                .filter_map(|m| match m {
                    ServerMessage::NewPlayer(s) => Some(s),
                    _ => None,
                })
                .collect();
            assert_eq!(new_players.len(), 1);
            assert_eq!(new_players[0].id, c3);
        }

        // Client 2's admission only announced client 2 to client 1.
        let to_c1: Vec<&ServerMessage> = d2.messages_for(&c1);
        assert!(to_c1.iter().all(|m| !matches!(m, ServerMessage::NewPlayer(s) if s.id != c2)));
    }

    #[test]
    fn test_admit_rejected_when_full() {
        let config = RelayConfig { max_players: 2, ..Default::default() };
        let mut store = SessionStore::new(config, 0);
        admit(&mut store, 0).unwrap();
        admit(&mut store, 0).unwrap();
        assert_eq!(admit(&mut store, 0).unwrap_err(), RelayError::ServerFull { capacity: 2 });
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_move_relays_to_others_only() {
        let mut store = store();
        let (mover, _) = admit(&mut store, 0).unwrap();
        let (watcher, _) = admit(&mut store, 0).unwrap();

        let dispatch = on_move(&mut store, mover, movement(3.0, 4.0), 500).unwrap();
        assert!(dispatch.messages_for(&mover).is_empty());
        match dispatch.messages_for(&watcher)[..] {
            [ServerMessage::PlayerMoved(moved)] => {
                assert_eq!(moved.id, mover);
                assert_eq!(moved.position, Vec3::new(3.0, 0.5, 4.0));
                assert_eq!(moved.speed, 10.0);
            }
            ref other => panic!("unexpected {:?}", other),
        }
        assert!((distance_of(&store, &mover) - 5.0).abs() < 1e-5);
        assert_eq!(store.get(&mover).unwrap().last_update, 500);
    }

    #[test]
    fn test_move_for_unknown_session_is_noop() {
        let mut store = store();
        let ghost = SessionId::new();
        let result = on_move(&mut store, ghost, movement(1.0, 1.0), 0);
        assert_eq!(result.unwrap_err(), RelayError::UnknownSession(ghost));
        assert!(store.is_empty());
    }

    #[test]
    fn test_move_rejects_non_finite() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let mut update = movement(1.0, 1.0);
        update.position.x = f32::NAN;
        assert!(matches!(on_move(&mut store, id, update, 10), Err(RelayError::MalformedEvent(_))));
        assert_eq!(store.get(&id).unwrap().last_update, 0);
    }

    #[test]
    fn test_jitter_and_teleport_not_counted() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();

        on_move(&mut store, id, movement(0.05, 0.0), 10).unwrap();
        assert_eq!(distance_of(&store, &id), 0.0);

        on_move(&mut store, id, movement(1000.0, 0.0), 20).unwrap();
        assert_eq!(distance_of(&store, &id), 0.0);
        assert_eq!(store.get(&id).unwrap().position.x, 1000.0);
    }

    #[test]
    fn test_chat_escapes_markup() {
        let mut store = store();
        let (sender, _) = admit(&mut store, 0).unwrap();
        let (other, _) = admit(&mut store, 0).unwrap();

        let dispatch = on_chat(&mut store, sender, "<script>alert('x')</script>", 42).unwrap();
        for id in [sender, other] {
            match dispatch.messages_for(&id)[..] {
                [ServerMessage::ChatMessage(entry)] => {
                    assert_eq!(entry.message, "&lt;script&gt;alert('x')&lt;/script&gt;");
                    assert_eq!(entry.id, sender);
                    assert_eq!(entry.timestamp, 42);
                }
                ref other => panic!("unexpected {:?}", other),
            }
        }
        let stored = store.chat().recent(1);
        assert!(!stored[0].message.contains('<'));
    }

    #[test]
    fn test_chat_length_cap() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        assert!(on_chat(&mut store, id, &"a".repeat(200), 0).is_ok());
        assert_eq!(
            on_chat(&mut store, id, &"a".repeat(201), 0).unwrap_err(),
            RelayError::ChatRejected("message too long")
        );
        assert!(on_chat(&mut store, id, "   ", 0).is_err());
        assert_eq!(store.chat().len(), 1);
    }

    #[test]
    fn test_chat_history_sent_to_newcomer() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        for i in 0..25 {
            on_chat(&mut store, id, &format!("line {}", i), i).unwrap();
        }
        let (newcomer, dispatch) = admit(&mut store, 100).unwrap();
        let history = dispatch.messages_for(&newcomer).into_iter()
            .find_map(|m| match m {
                ServerMessage::ChatHistory(h) => Some(h.clone()),
                _ => None,
            })
            .unwrap();
        assert_eq!(history.len(), 20);
        assert_eq!(history[0].message, "line 5");
        assert_eq!(history[19].message, "line 24");
    }

    #[test]
    fn test_action_recorded_and_relayed() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let (other, _) = admit(&mut store, 0).unwrap();
        let action = ActionRequest {
            kind: "horn".to_string(),
            data: serde_json::json!({"volume": 3}),
        };

        let dispatch = on_action(&mut store, id, action, 77).unwrap();
        assert!(dispatch.messages_for(&id).is_empty());
        match dispatch.messages_for(&other)[..] {
            [ServerMessage::PlayerAction(event)] => {
                assert_eq!(event.action, "horn");
                assert_eq!(event.data["volume"], 3);
            }
            ref other => panic!("unexpected {:?}", other),
        }
        assert_eq!(store.get(&id).unwrap().actions["horn"].timestamp, 77);
    }

    #[test]
    fn test_action_without_type_dropped() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let action = ActionRequest { kind: String::new(), data: serde_json::Value::Null };
        assert!(on_action(&mut store, id, action, 0).is_err());
        assert!(store.get(&id).unwrap().actions.is_empty());
    }

    #[test]
    fn test_rename_too_long_rejected() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let before = store.get(&id).unwrap().display_name.clone();

        let result = on_rename(&mut store, id, &"x".repeat(25));
        assert_eq!(result.unwrap_err(), RelayError::NameRejected("name too long"));
        assert_eq!(store.get(&id).unwrap().display_name, before);
    }

    #[test]
    fn test_rename_broadcasts_to_all_including_renamer() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let (other, _) = admit(&mut store, 0).unwrap();
        let before = store.get(&id).unwrap().display_name.clone();

        let dispatch = on_rename(&mut store, id, "TenLetters").unwrap();
        for target in [id, other] {
            match dispatch.messages_for(&target)[..] {
                [ServerMessage::PlayerRenamed(renamed)] => {
                    assert_eq!(renamed.id, id);
                    assert_eq!(renamed.old_name, before);
                    assert_eq!(renamed.new_name, "TenLetters");
                }
                ref other => panic!("unexpected {:?}", other),
            }
        }
        assert_eq!(store.get(&id).unwrap().display_name, "TenLetters");
    }

    #[test]
    fn test_rename_length_measured_after_escaping() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        // 10 chars raw, 34 once escaped.
        assert!(on_rename(&mut store, id, "<<<<<<<<<<").is_err());
        assert!(on_rename(&mut store, id, "").is_err());
        assert!(on_rename(&mut store, id, "<b>").is_ok());
        assert_eq!(store.get(&id).unwrap().display_name, "&lt;b&gt;");
    }

    #[test]
    fn test_disconnect_removes_once() {
        let mut store = store();
        let (leaver, _) = admit(&mut store, 0).unwrap();
        let (stayer, _) = admit(&mut store, 0).unwrap();

        let dispatch = on_disconnect(&mut store, leaver, 5_000).unwrap();
        assert_eq!(dispatch.removed, vec![leaver]);
        let to_stayer = dispatch.messages_for(&stayer);
        assert!(matches!(to_stayer[0], ServerMessage::PlayerDisconnected(id) if *id == leaver));
        assert!(matches!(to_stayer[1], ServerMessage::PlayerCount(1)));

        assert_eq!(
            on_disconnect(&mut store, leaver, 6_000).unwrap_err(),
            RelayError::UnknownSession(leaver)
        );
    }

    #[test]
    fn test_removed_id_absent_from_later_snapshots() {
        let mut store = store();
        let (gone, _) = admit(&mut store, 0).unwrap();
        on_disconnect(&mut store, gone, 10).unwrap();

        let (newcomer, dispatch) = admit(&mut store, 20).unwrap();
        for message in dispatch.messages_for(&newcomer) {
            if let ServerMessage::CurrentPlayers(peers) = message {
                assert!(peers.iter().all(|p| p.id != gone));
            }
        }
    }

    #[test]
    fn test_leave_routes_to_disconnect() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let dispatch = dispatch(&mut store, id, ClientMessage::Leave, 10).unwrap();
        assert_eq!(dispatch.removed, vec![id]);
        assert!(store.is_empty());
    }

    #[test]
    fn test_server_stats_to_all() {
        let mut store = store();
        let (id, _) = admit(&mut store, 0).unwrap();
        let dispatch = server_stats(&store, 61_000);
        match dispatch.messages_for(&id)[..] {
            [ServerMessage::ServerStats(stats)] => {
                assert_eq!(stats.players, 1);
                assert_eq!(stats.max_players, 20);
                assert_eq!(stats.uptime, 61);
            }
            ref other => panic!("unexpected {:?}", other),
        }
    }

    proptest! {
        #[test]
        fn prop_jitter_never_accumulates(dx in -0.07f32..0.07, dz in -0.07f32..0.07) {
            let mut store = store();
            let (id, _) = admit(&mut store, 0).unwrap();
            on_move(&mut store, id, movement(dx, dz), 10).unwrap();
            prop_assert_eq!(distance_of(&store, &id), 0.0);
        }

        #[test]
        fn prop_teleports_never_accumulate(x in 50.0f32..10_000.0, z in 0.0f32..10_000.0) {
            let mut store = store();
            let (id, _) = admit(&mut store, 0).unwrap();
            on_move(&mut store, id, movement(x, z), 10).unwrap();
            prop_assert_eq!(distance_of(&store, &id), 0.0);
        }

        #[test]
        fn prop_distance_never_decreases(steps in proptest::collection::vec((-60.0f32..60.0, -60.0f32..60.0), 1..40)) {
            let mut store = store();
            let (id, _) = admit(&mut store, 0).unwrap();
            let mut last = 0.0;
            for (i, (x, z)) in steps.into_iter().enumerate() {
                on_move(&mut store, id, movement(x, z), i as u64).unwrap();
                let now = distance_of(&store, &id);
                prop_assert!(now >= last);
                last = now;
            }
        }
    }
}
