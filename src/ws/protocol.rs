//! WebSocket protocol message definitions
//! These are the wire types for client-server communication

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Avatar variants a player can pick in the lobby
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Avatar {
    Dino,
    Robot,
    Bird,
}

impl Default for Avatar {
    fn default() -> Self {
        Self::Dino
    }
}

/// Session game mode
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GameMode {
    /// One player racing the spawner
    Single,
    /// Head-to-head, two players
    Multi,
}

/// Difficulty tag (drives the obstacle spawn interval in single mode)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Difficulty {
    Easy,
    Medium,
    Hard,
}

impl Default for Difficulty {
    fn default() -> Self {
        Self::Medium
    }
}

/// Session lifecycle phase
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionPhase {
    /// Accepting joins
    Waiting,
    /// Slots full, 3-2-1 timer running, simulation frozen
    Countdown,
    /// Ticking, collisions live
    Running,
    /// Terminal display state
    Ended,
}

/// Obstacle variant
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ObstacleKind {
    /// Sits on the ground line, jump over it
    Ground,
    /// Hovers in the altitude band, run under it
    Flying,
}

/// An obstacle as simulated and broadcast
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Obstacle {
    pub id: Uuid,
    pub kind: ObstacleKind,
    pub x: f32,
    pub y: f32,
    pub width: f32,
    pub height: f32,
}

/// Messages sent from client to server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMsg {
    /// Create a session and join it as host
    CreateSession {
        player_name: String,
        mode: GameMode,
        /// Single-player only; multiplayer sessions use the default interval
        difficulty: Option<Difficulty>,
        avatar: Avatar,
    },

    /// Join a waiting session by id
    JoinSession {
        session_id: Uuid,
        player_name: String,
        avatar: Avatar,
    },

    /// Request the current joinable-session list
    ListSessions,

    /// Start a jump (no-op while airborne, dead, or outside RUNNING)
    Jump,

    /// Reset the caller's session back to WAITING
    Restart,

    /// Ping for latency measurement
    Ping {
        /// Client timestamp
        t: u64,
    },
}

/// Messages sent from server to client
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerMsg {
    /// Welcome message after connection
    Welcome {
        player_id: Uuid,
        server_time: u64,
    },

    /// Confirmation of session creation (to the creator)
    SessionCreated {
        session_id: Uuid,
        snapshot: SessionSnapshot,
    },

    /// Confirmation of join (to the joiner)
    Joined {
        player: PlayerView,
    },

    /// Current joinable-session summaries (global broadcast)
    JoinableSessions {
        sessions: Vec<SessionSummary>,
    },

    /// Player mapping after a join or leave
    PlayersUpdated {
        players: HashMap<Uuid, PlayerView>,
    },

    /// Slots filled, countdown begins
    SessionStarted,

    /// Countdown tick: 3, 2, 1, then 0 signaling "go"
    Countdown {
        value: u8,
    },

    /// Full snapshot, sent every tick while RUNNING
    StateUpdate {
        snapshot: SessionSnapshot,
    },

    /// A player just died (fired once per death)
    PlayerDied {
        player_id: Uuid,
    },

    /// All players dead, run is over
    SessionEnded {
        winner: WinnerSummary,
    },

    /// Session reset to WAITING, clients return to lobby
    SessionReset,

    /// Join rejection: unknown session id
    SessionNotFound,

    /// Join rejection: capacity already met
    SessionFull,

    /// Join rejection: session left WAITING
    SessionInProgress,

    /// Create rejection: the connection already belongs to a session
    AlreadyInSession,

    /// Pong response
    Pong {
        /// Echo back client timestamp
        t: u64,
    },
}

/// Player state as broadcast in snapshots
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlayerView {
    pub id: Uuid,
    pub name: String,
    pub avatar: Avatar,
    /// Fixed screen x of the collision box origin
    pub x: f32,
    /// Top of the player box; ground line is 300
    pub y: f32,
    /// Vertical velocity (positive is downward)
    pub velocity: f32,
    pub jumping: bool,
    pub distance: f32,
    /// floor(distance / 10)
    pub score: u32,
    pub alive: bool,
}

/// Joinable-session summary for the lobby list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSummary {
    pub id: Uuid,
    pub host_name: String,
    pub mode: GameMode,
    pub difficulty: Difficulty,
    /// Seconds since the session was created
    pub age_secs: u64,
}

/// Winner summary at game end
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WinnerSummary {
    pub player_id: Uuid,
    pub name: String,
    pub score: u32,
}

/// Full session snapshot, the per-tick broadcast payload
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub players: HashMap<Uuid, PlayerView>,
    pub obstacles: Vec<Obstacle>,
    pub speed: f32,
    pub elapsed_secs: f32,
    pub phase: SessionPhase,
}
