//! Session registry - the two-partition directory of sessions
//!
//! Joinable sessions (WAITING with a free slot) and active sessions
//! (countdown or running) live in disjoint maps behind one lock; a session
//! moves joinable -> active atomically with the fill of its last slot.

use std::collections::HashMap;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::game::snapshot::build_snapshot;
use crate::game::{GameSession, PlayerState, SessionCommand, SessionHandle, SessionState};
use crate::util::time::unix_millis;
use crate::ws::protocol::{
    Avatar, Difficulty, GameMode, PlayerView, ServerMsg, SessionSnapshot, SessionSummary,
};

/// Join rejection kinds, each surfaced only to the originating connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum JoinError {
    #[error("session not found")]
    NotFound,
    #[error("session is full")]
    Full,
    #[error("session already started")]
    AlreadyStarted,
}

/// Lobby-facing info for a creating or joining player
#[derive(Debug, Clone)]
pub struct PlayerInfo {
    pub player_id: Uuid,
    pub name: String,
    pub avatar: Avatar,
}

/// Registry bookkeeping for one session
struct SessionEntry {
    handle: SessionHandle,
    host_name: String,
    mode: GameMode,
    difficulty: Difficulty,
    created_at_ms: u64,
    players: usize,
    capacity: usize,
}

impl SessionEntry {
    fn summary(&self) -> SessionSummary {
        SessionSummary {
            id: self.handle.id,
            host_name: self.host_name.clone(),
            mode: self.mode,
            difficulty: self.difficulty,
            age_secs: unix_millis().saturating_sub(self.created_at_ms) / 1000,
        }
    }
}

/// Everything the creating connection needs to start serving its session
pub struct CreatedSession {
    pub session_id: Uuid,
    pub player: PlayerView,
    pub snapshot: SessionSnapshot,
    /// Subscribed before the session task spawns; broadcast channels do
    /// not replay, so this must exist before the first publish
    pub events: broadcast::Receiver<ServerMsg>,
}

/// The two disjoint partitions. A session id appears in exactly one map.
#[derive(Default)]
struct Partitions {
    joinable: HashMap<Uuid, SessionEntry>,
    active: HashMap<Uuid, SessionEntry>,
}

/// Process-wide directory of sessions
pub struct SessionRegistry {
    partitions: RwLock<Partitions>,
    /// player id -> session id
    player_index: DashMap<Uuid, Uuid>,
    /// Global channel for joinable-session list updates
    lobby_tx: broadcast::Sender<ServerMsg>,
}

impl SessionRegistry {
    pub fn new() -> Self {
        let (lobby_tx, _) = broadcast::channel(64);
        Self {
            partitions: RwLock::new(Partitions::default()),
            player_index: DashMap::new(),
            lobby_tx,
        }
    }

    /// Create a session with the host as sole player, spawn its task, and
    /// return the assigned id, the host's player record, the initial
    /// snapshot, and the host's event subscription. Always succeeds.
    pub fn create_session(
        self: &Arc<Self>,
        host: PlayerInfo,
        mode: GameMode,
        difficulty: Difficulty,
    ) -> CreatedSession {
        let session_id = Uuid::new_v4();
        let seed = rand::random::<u64>();

        let mut state = SessionState::new(session_id, host.name.clone(), mode, difficulty, seed);
        let player = state
            .add_player(host.player_id, host.name.clone(), host.avatar)
            .to_view();
        let snapshot = build_snapshot(&state);
        let capacity = state.capacity();

        let (session, handle) = GameSession::new(state, self.clone());

        // Subscribe before the task spawns: a single-mode session is full
        // at creation and starts its countdown on the first poll
        let events = handle.subscribe();

        let entry = SessionEntry {
            handle,
            host_name: host.name,
            mode,
            difficulty,
            created_at_ms: unix_millis(),
            players: 1,
            capacity,
        };

        {
            let mut partitions = self.partitions.write();
            // A single-mode session is already full and never listed
            if entry.players == entry.capacity {
                partitions.active.insert(session_id, entry);
            } else {
                partitions.joinable.insert(session_id, entry);
            }
        }

        self.player_index.insert(host.player_id, session_id);

        // Supervise the session task: contain panics to this session and
        // drop the registry entry once the task exits.
        let registry = self.clone();
        tokio::spawn(async move {
            let task = tokio::spawn(session.run());
            if let Err(e) = task.await {
                if e.is_panic() {
                    error!(session_id = %session_id, "Session task panicked");
                }
            }
            registry.remove_session(&session_id);
        });

        info!(session_id = %session_id, mode = ?mode, "Session created");
        self.broadcast_lobby();

        CreatedSession {
            session_id,
            player,
            snapshot,
            events,
        }
    }

    /// Current joinable-session summaries, ordered by creation time
    pub fn list_joinable(&self) -> Vec<SessionSummary> {
        let partitions = self.partitions.read();
        let mut entries: Vec<&SessionEntry> = partitions.joinable.values().collect();
        entries.sort_by_key(|e| e.created_at_ms);
        entries.iter().map(|e| e.summary()).collect()
    }

    /// Admit a player into a waiting session. The capacity check and the
    /// joinable -> active move happen under one write lock, so two racing
    /// joins cannot both fill the last slot. The returned receiver is
    /// subscribed before the admission command is queued, so the joiner
    /// sees every subsequent session broadcast.
    pub async fn join_session(
        &self,
        session_id: &Uuid,
        info: PlayerInfo,
    ) -> Result<(PlayerView, broadcast::Receiver<ServerMsg>), JoinError> {
        let handle = {
            let mut partitions = self.partitions.write();

            if let Some(entry) = partitions.joinable.get_mut(session_id) {
                entry.players += 1;
                let handle = entry.handle.clone();

                if entry.players == entry.capacity {
                    let entry = partitions.joinable.remove(session_id).unwrap();
                    partitions.active.insert(*session_id, entry);
                }

                handle
            } else if let Some(entry) = partitions.active.get(session_id) {
                // A full session reads as Full even mid-countdown; a session
                // running below capacity (opponent left) reads as in-progress
                return if entry.players >= entry.capacity {
                    Err(JoinError::Full)
                } else {
                    Err(JoinError::AlreadyStarted)
                };
            } else {
                return Err(JoinError::NotFound);
            }
        };

        self.player_index.insert(info.player_id, *session_id);

        let view = PlayerState::spawn_view(info.player_id, &info.name, info.avatar);
        let events = handle.subscribe();
        if handle
            .cmd_tx
            .send(SessionCommand::AddPlayer {
                player_id: info.player_id,
                name: info.name,
                avatar: info.avatar,
            })
            .await
            .is_err()
        {
            warn!(session_id = %session_id, "Session task gone during join");
        }

        self.broadcast_lobby();
        Ok((view, events))
    }

    /// Session currently holding the given player, if any
    pub fn find_session_by_player(&self, player_id: &Uuid) -> Option<SessionHandle> {
        let session_id = *self.player_index.get(player_id)?;
        let partitions = self.partitions.read();
        partitions
            .joinable
            .get(&session_id)
            .or_else(|| partitions.active.get(&session_id))
            .map(|e| e.handle.clone())
    }

    /// Drop a session from whichever partition holds it
    pub fn remove_session(&self, session_id: &Uuid) {
        let removed = {
            let mut partitions = self.partitions.write();
            let joinable = partitions.joinable.remove(session_id).is_some();
            partitions.active.remove(session_id).is_some() || joinable
        };

        if removed {
            self.player_index.retain(|_, sid| sid != session_id);
            info!(session_id = %session_id, "Session removed");
            self.broadcast_lobby();
        }
    }

    /// Called by the session task when a player leaves
    pub fn on_player_left(&self, session_id: &Uuid, player_id: &Uuid, remaining: usize) {
        self.player_index.remove(player_id);

        let mut partitions = self.partitions.write();
        if let Some(entry) = partitions.joinable.get_mut(session_id) {
            entry.players = remaining;
        } else if let Some(entry) = partitions.active.get_mut(session_id) {
            entry.players = remaining;
        }
    }

    /// Called by the session task after a reset back to WAITING.
    /// A session with a free slot re-enters the joinable partition.
    pub fn on_session_reset(&self, session_id: &Uuid, players: usize) {
        let moved = {
            let mut partitions = self.partitions.write();
            match partitions.active.remove(session_id) {
                Some(mut entry) if players < entry.capacity => {
                    entry.players = players;
                    partitions.joinable.insert(*session_id, entry);
                    true
                }
                Some(mut entry) => {
                    entry.players = players;
                    partitions.active.insert(*session_id, entry);
                    false
                }
                None => false,
            }
        };

        if moved {
            self.broadcast_lobby();
        }
    }

    /// Called by the session task when its countdown starts; keeps the
    /// countdown-implies-active invariant regardless of the trigger path
    pub fn on_session_started(&self, session_id: &Uuid) {
        let moved = {
            let mut partitions = self.partitions.write();
            if let Some(entry) = partitions.joinable.remove(session_id) {
                partitions.active.insert(*session_id, entry);
                true
            } else {
                false
            }
        };

        if moved {
            self.broadcast_lobby();
        }
    }

    /// Subscribe to global lobby updates
    pub fn subscribe_lobby(&self) -> broadcast::Receiver<ServerMsg> {
        self.lobby_tx.subscribe()
    }

    /// The current lobby list as a protocol message
    pub fn lobby_list_msg(&self) -> ServerMsg {
        ServerMsg::JoinableSessions {
            sessions: self.list_joinable(),
        }
    }

    fn broadcast_lobby(&self) {
        let _ = self.lobby_tx.send(self.lobby_list_msg());
    }

    pub fn joinable_count(&self) -> usize {
        self.partitions.read().joinable.len()
    }

    pub fn active_count(&self) -> usize {
        self.partitions.read().active.len()
    }

    pub fn total_players(&self) -> usize {
        let partitions = self.partitions.read();
        partitions
            .joinable
            .values()
            .chain(partitions.active.values())
            .map(|e| e.players)
            .sum()
    }
}

impl Default for SessionRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn host(name: &str) -> PlayerInfo {
        PlayerInfo {
            player_id: Uuid::new_v4(),
            name: name.to_string(),
            avatar: Avatar::Dino,
        }
    }

    #[tokio::test]
    async fn multi_session_is_listed_until_full() {
        let registry = Arc::new(SessionRegistry::new());

        let session_id = registry
            .create_session(host("alice"), GameMode::Multi, Difficulty::Medium)
            .session_id;

        let listed = registry.list_joinable();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session_id);
        assert_eq!(listed[0].host_name, "alice");

        let joined = registry.join_session(&session_id, host("bob")).await;
        assert!(joined.is_ok());

        // Filling the last slot moved the session to the active partition
        assert!(registry.list_joinable().is_empty());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(registry.total_players(), 2);
    }

    #[tokio::test]
    async fn single_session_never_appears_joinable() {
        let registry = Arc::new(SessionRegistry::new());

        let created = registry.create_session(host("solo"), GameMode::Single, Difficulty::Hard);

        assert!(registry.list_joinable().is_empty());
        assert_eq!(registry.active_count(), 1);
        assert_eq!(created.player.name, "solo");
        assert_eq!(created.snapshot.players.len(), 1);
    }

    #[tokio::test]
    async fn third_join_yields_full() {
        let registry = Arc::new(SessionRegistry::new());

        let session_id = registry
            .create_session(host("alice"), GameMode::Multi, Difficulty::Medium)
            .session_id;
        registry
            .join_session(&session_id, host("bob"))
            .await
            .unwrap();

        let third = registry.join_session(&session_id, host("carol")).await;
        assert_eq!(third.unwrap_err(), JoinError::Full);
        assert_eq!(registry.total_players(), 2);
    }

    #[tokio::test]
    async fn join_unknown_session_leaves_registry_unchanged() {
        let registry = Arc::new(SessionRegistry::new());
        registry.create_session(host("alice"), GameMode::Multi, Difficulty::Medium);

        let result = registry.join_session(&Uuid::new_v4(), host("bob")).await;
        assert_eq!(result.unwrap_err(), JoinError::NotFound);

        assert_eq!(registry.joinable_count(), 1);
        assert_eq!(registry.active_count(), 0);
        assert_eq!(registry.total_players(), 1);
    }

    #[tokio::test]
    async fn join_in_progress_session_below_capacity_is_rejected() {
        let registry = Arc::new(SessionRegistry::new());

        let session_id = registry
            .create_session(host("alice"), GameMode::Multi, Difficulty::Medium)
            .session_id;
        let bob = host("bob");
        let bob_id = bob.player_id;
        registry.join_session(&session_id, bob).await.unwrap();

        // Opponent leaves mid-game: the session stays active below capacity
        registry.on_player_left(&session_id, &bob_id, 1);

        let late = registry.join_session(&session_id, host("carol")).await;
        assert_eq!(late.unwrap_err(), JoinError::AlreadyStarted);
    }

    #[tokio::test]
    async fn find_session_by_player_tracks_membership() {
        let registry = Arc::new(SessionRegistry::new());

        let alice = host("alice");
        let alice_id = alice.player_id;
        let session_id = registry
            .create_session(alice, GameMode::Multi, Difficulty::Medium)
            .session_id;

        let found = registry.find_session_by_player(&alice_id);
        assert_eq!(found.map(|h| h.id), Some(session_id));

        registry.remove_session(&session_id);
        assert!(registry.find_session_by_player(&alice_id).is_none());
    }

    #[tokio::test]
    async fn reset_with_free_slot_returns_session_to_lobby() {
        let registry = Arc::new(SessionRegistry::new());

        let session_id = registry
            .create_session(host("alice"), GameMode::Multi, Difficulty::Medium)
            .session_id;
        registry
            .join_session(&session_id, host("bob"))
            .await
            .unwrap();
        assert!(registry.list_joinable().is_empty());

        // Let the session task pick up the join and enter countdown
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        // One player left before the restart
        registry.on_session_reset(&session_id, 1);

        let listed = registry.list_joinable();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].id, session_id);
    }

    #[tokio::test]
    async fn creator_sees_countdown_start_despite_late_poll() {
        let registry = Arc::new(SessionRegistry::new());

        let mut created =
            registry.create_session(host("solo"), GameMode::Single, Difficulty::Medium);

        // A busy connection task may not poll until well after the
        // session task has started its countdown
        tokio::time::sleep(std::time::Duration::from_millis(100)).await;

        let first = created.events.recv().await.unwrap();
        assert!(
            matches!(first, ServerMsg::SessionStarted),
            "unexpected first broadcast: {first:?}"
        );
        let second = created.events.recv().await.unwrap();
        assert!(
            matches!(second, ServerMsg::Countdown { value: 3 }),
            "unexpected second broadcast: {second:?}"
        );
    }

    #[tokio::test]
    async fn joiner_receives_roster_then_countdown() {
        let registry = Arc::new(SessionRegistry::new());

        let session_id = registry
            .create_session(host("alice"), GameMode::Multi, Difficulty::Medium)
            .session_id;
        let (_, mut events) = registry
            .join_session(&session_id, host("bob"))
            .await
            .unwrap();

        let first = events.recv().await.unwrap();
        assert!(
            matches!(first, ServerMsg::PlayersUpdated { .. }),
            "unexpected first broadcast: {first:?}"
        );
        let second = events.recv().await.unwrap();
        assert!(
            matches!(second, ServerMsg::SessionStarted),
            "unexpected second broadcast: {second:?}"
        );
        let third = events.recv().await.unwrap();
        assert!(
            matches!(third, ServerMsg::Countdown { value: 3 }),
            "unexpected third broadcast: {third:?}"
        );
    }

    #[tokio::test]
    async fn lobby_broadcast_fires_on_create() {
        let registry = Arc::new(SessionRegistry::new());
        let mut lobby_rx = registry.subscribe_lobby();

        registry.create_session(host("alice"), GameMode::Multi, Difficulty::Easy);

        match lobby_rx.recv().await {
            Ok(ServerMsg::JoinableSessions { sessions }) => {
                assert_eq!(sessions.len(), 1);
                assert_eq!(sessions[0].host_name, "alice");
            }
            other => panic!("expected lobby update, got {:?}", other),
        }
    }
}
