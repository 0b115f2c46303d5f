//! Remote World
//!
//! Everything a client knows about the other players: who is connected,
//! where they are drawn, and whether the client is online at all.

use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::client::proxy::{InterpolationConfig, RemotePlayerProxy};
use crate::core::time::Millis;
use crate::network::protocol::{ChatEntry, PlayerSummary, ServerMessage, ServerStats};
use crate::relay::session::SessionId;

/// Whether the client is talking to a relay.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ConnectionMode {
    /// Handshake or reconnection in progress.
    #[default]
    Connecting,
    /// Admitted by the relay.
    Online,
    /// Gave up on the relay; the game runs alone.
    SinglePlayer,
}

/// Something worth showing in the player-facing console.
#[derive(Debug, Clone, PartialEq)]
pub enum Notice {
    /// The relay admitted us.
    Welcomed {
        /// Our session id.
        id: SessionId,
        /// Our assigned name.
        name: String,
    },
    /// Initial roster received.
    PlayersOnline(usize),
    /// Someone joined.
    Joined {
        /// Their id.
        id: SessionId,
        /// Their name.
        name: String,
    },
    /// Someone left, was evicted, or went silent.
    Left {
        /// Their id.
        id: SessionId,
    },
    /// Chat line, either live or from the backlog.
    Chat(ChatEntry),
    /// Someone changed name.
    Renamed {
        /// Who.
        id: SessionId,
        /// Previous name.
        old_name: String,
        /// New name.
        new_name: String,
    },
    /// Someone performed an action.
    Action {
        /// Who.
        id: SessionId,
        /// Action type.
        action: String,
    },
    /// Live player count.
    PlayerCount(usize),
    /// Periodic statistics.
    Stats(ServerStats),
    /// Admission refused.
    ServerFull(String),
}

/// Client-side view of the session.
#[derive(Debug, Default)]
pub struct RemoteWorld {
    config: InterpolationConfig,
    local_id: Option<SessionId>,
    local_name: Option<String>,
    mode: ConnectionMode,
    proxies: BTreeMap<SessionId, RemotePlayerProxy>,
}

impl RemoteWorld {
    /// Create an empty world in [`ConnectionMode::Connecting`].
    pub fn new(config: InterpolationConfig) -> Self {
        Self {
            config,
            ..Default::default()
        }
    }

    /// Our session id, once welcomed.
    pub fn local_id(&self) -> Option<SessionId> {
        self.local_id
    }

    /// Our display name, once welcomed.
    pub fn local_name(&self) -> Option<&str> {
        self.local_name.as_deref()
    }

    /// Current connection mode.
    pub fn mode(&self) -> ConnectionMode {
        self.mode
    }

    /// Look up a proxy.
    pub fn proxy(&self, id: &SessionId) -> Option<&RemotePlayerProxy> {
        self.proxies.get(id)
    }

    /// All proxies in id order.
    pub fn proxies(&self) -> impl Iterator<Item = &RemotePlayerProxy> {
        self.proxies.values()
    }

    /// Number of remote players.
    pub fn len(&self) -> usize {
        self.proxies.len()
    }

    /// True when no remote players are known.
    pub fn is_empty(&self) -> bool {
        self.proxies.is_empty()
    }

    /// Apply one server message.
    pub fn apply(&mut self, message: ServerMessage, now: Millis) -> Vec<Notice> {
        match message {
            ServerMessage::Welcome(me) => {
                info!("Joined relay as {} ({})", me.name, me.id.short());
                self.local_id = Some(me.id);
                self.local_name = Some(me.name.clone());
                self.proxies.remove(&me.id);
                self.mode = ConnectionMode::Online;
                vec![Notice::Welcomed { id: me.id, name: me.name }]
            }
            ServerMessage::CurrentPlayers(players) => {
                for summary in &players {
                    self.insert(summary, now);
                }
                vec![Notice::PlayersOnline(self.proxies.len() + 1)]
            }
            ServerMessage::ChatHistory(entries) => entries.into_iter().map(Notice::Chat).collect(),
            ServerMessage::NewPlayer(summary) => {
                if self.insert(&summary, now) {
                    vec![Notice::Joined { id: summary.id, name: summary.name }]
                } else {
                    Vec::new()
                }
            }
            ServerMessage::PlayerMoved(moved) => {
                match self.proxies.get_mut(&moved.id) {
                    Some(proxy) => proxy.on_moved(&moved, now, &self.config),
                    None => debug!("Movement for unknown player {}", moved.id.short()),
                }
                Vec::new()
            }
            ServerMessage::PlayerAction(event) => {
                match self.proxies.get_mut(&event.id) {
                    Some(proxy) => {
                        proxy.on_action(&event.action, now);
                        vec![Notice::Action { id: event.id, action: event.action }]
                    }
                    None => Vec::new(),
                }
            }
            ServerMessage::PlayerRenamed(renamed) => {
                if Some(renamed.id) == self.local_id {
                    self.local_name = Some(renamed.new_name.clone());
                } else if let Some(proxy) = self.proxies.get_mut(&renamed.id) {
                    proxy.on_renamed(&renamed.new_name, now);
                }
                vec![Notice::Renamed {
                    id: renamed.id,
                    old_name: renamed.old_name,
                    new_name: renamed.new_name,
                }]
            }
            ServerMessage::PlayerDisconnected(id) => {
                if self.proxies.remove(&id).is_some() {
                    vec![Notice::Left { id }]
                } else {
                    Vec::new()
                }
            }
            ServerMessage::PlayerCount(count) => vec![Notice::PlayerCount(count)],
            ServerMessage::ServerStats(stats) => vec![Notice::Stats(stats)],
            ServerMessage::ChatMessage(entry) => vec![Notice::Chat(entry)],
            ServerMessage::ServerFull(full) => {
                warn!("{}", full.message);
                self.enter_single_player();
                vec![Notice::ServerFull(full.message)]
            }
        }
    }

    fn insert(&mut self, summary: &PlayerSummary, now: Millis) -> bool {
        if Some(summary.id) == self.local_id || self.proxies.contains_key(&summary.id) {
            return false;
        }
        self.proxies.insert(summary.id, RemotePlayerProxy::new(summary, now));
        true
    }

    /// Advance every proxy to `now` and drop the silent ones.
    pub fn advance(&mut self, now: Millis) -> Vec<Notice> {
        for proxy in self.proxies.values_mut() {
            proxy.advance(now, &self.config);
        }

        let stale: Vec<SessionId> = self.proxies.values()
            .filter(|p| p.is_stale(now, &self.config))
            .map(|p| p.id)
            .collect();
        stale.into_iter()
            .map(|id| {
                self.proxies.remove(&id);
                debug!("Dropping silent player {}", id.short());
                Notice::Left { id }
            })
            .collect()
    }

    /// Connection lost; forget the roster while reconnecting.
    pub fn mark_connecting(&mut self) {
        self.mode = ConnectionMode::Connecting;
        self.local_id = None;
        self.proxies.clear();
    }

    /// Give up on the relay and clear all remote players.
    pub fn enter_single_player(&mut self) {
        self.mode = ConnectionMode::SinglePlayer;
        self.local_id = None;
        self.proxies.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::vec3::Vec3;
    use crate::network::protocol::{PlayerMoved, PlayerRenamed, ServerFull};

    fn summary(name: &str, x: f32) -> PlayerSummary {
        PlayerSummary {
            id: SessionId::new(),
            name: name.to_string(),
            color: 0x00ff99,
            position: Vec3::new(x, 0.5, 0.0),
            rotation: Vec3::ZERO,
        }
    }

    fn online_world() -> (RemoteWorld, PlayerSummary) {
        let mut world = RemoteWorld::new(InterpolationConfig::default());
        let me = summary("Driver1", 0.0);
        world.apply(ServerMessage::Welcome(me.clone()), 0);
        (world, me)
    }

    #[test]
    fn test_welcome_goes_online() {
        let mut world = RemoteWorld::new(InterpolationConfig::default());
        assert_eq!(world.mode(), ConnectionMode::Connecting);
        let me = summary("Driver1", 0.0);
        let notices = world.apply(ServerMessage::Welcome(me.clone()), 0);
        assert_eq!(world.mode(), ConnectionMode::Online);
        assert_eq!(world.local_id(), Some(me.id));
        assert!(matches!(&notices[0], Notice::Welcomed { name, .. } if name == "Driver1"));
    }

    #[test]
    fn test_roster_excludes_self() {
        let (mut world, me) = online_world();
        let peers = vec![summary("Guest1", 1.0), summary("Guest2", 2.0), me.clone()];
        let notices = world.apply(ServerMessage::CurrentPlayers(peers), 0);
        assert_eq!(world.len(), 2);
        assert!(world.proxy(&me.id).is_none());
        assert_eq!(notices, vec![Notice::PlayersOnline(3)]);

        // Duplicate newPlayer is ignored.
        let dup = world.proxies().next().map(|p| p.id).unwrap();
        let again = PlayerSummary { id: dup, ..summary("Guest1", 1.0) };
        assert!(world.apply(ServerMessage::NewPlayer(again), 0).is_empty());
    }

    #[test]
    fn test_movement_interpolates() {
        let (mut world, _) = online_world();
        let peer = summary("Guest1", 0.0);
        world.apply(ServerMessage::NewPlayer(peer.clone()), 0);

        world.apply(ServerMessage::PlayerMoved(PlayerMoved {
            id: peer.id,
            position: Vec3::new(10.0, 0.5, 0.0),
            rotation: Vec3::ZERO,
            speed: 3.0,
        }), 1_000);
        world.advance(1_050);
        assert!((world.proxy(&peer.id).unwrap().rendered_position.x - 5.0).abs() < 1e-5);
        world.advance(1_100);
        assert_eq!(world.proxy(&peer.id).unwrap().rendered_position.x, 10.0);
    }

    #[test]
    fn test_disconnect_and_staleness() {
        let (mut world, _) = online_world();
        let leaving = summary("Guest1", 0.0);
        let silent = summary("Guest2", 0.0);
        world.apply(ServerMessage::NewPlayer(leaving.clone()), 0);
        world.apply(ServerMessage::NewPlayer(silent.clone()), 0);

        let notices = world.apply(ServerMessage::PlayerDisconnected(leaving.id), 100);
        assert_eq!(notices, vec![Notice::Left { id: leaving.id }]);
        assert!(world.apply(ServerMessage::PlayerDisconnected(leaving.id), 200).is_empty());

        assert!(world.advance(9_999).is_empty());
        assert_eq!(world.advance(10_000), vec![Notice::Left { id: silent.id }]);
        assert!(world.is_empty());
    }

    #[test]
    fn test_rename_of_self_and_peer() {
        let (mut world, me) = online_world();
        let peer = summary("Guest1", 0.0);
        world.apply(ServerMessage::NewPlayer(peer.clone()), 0);

        world.apply(ServerMessage::PlayerRenamed(PlayerRenamed {
            id: me.id,
            old_name: me.name.clone(),
            new_name: "Me".to_string(),
        }), 10);
        assert_eq!(world.local_name(), Some("Me"));

        world.apply(ServerMessage::PlayerRenamed(PlayerRenamed {
            id: peer.id,
            old_name: peer.name.clone(),
            new_name: "Them".to_string(),
        }), 10);
        assert_eq!(world.proxy(&peer.id).unwrap().name, "Them");
    }

    #[test]
    fn test_server_full_degrades() {
        let (mut world, _) = online_world();
        world.apply(ServerMessage::NewPlayer(summary("Guest1", 0.0)), 0);
        let notices = world.apply(ServerMessage::ServerFull(ServerFull::default()), 5);
        assert_eq!(world.mode(), ConnectionMode::SinglePlayer);
        assert!(world.is_empty());
        assert!(matches!(&notices[0], Notice::ServerFull(_)));
    }
}
