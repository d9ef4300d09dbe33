//! Game simulation modules

pub mod physics;
pub mod session;
pub mod snapshot;
pub mod spawner;

pub use session::{GameSession, PlayerState, SessionHandle, SessionState};

use uuid::Uuid;

use crate::ws::protocol::Avatar;

/// Commands funneled into a session's single-consumer queue.
/// The owning task drains all pending commands before each tick, so
/// command handling and the tick never race on session state.
#[derive(Debug)]
pub enum SessionCommand {
    /// Insert an admitted player (sent by the registry after admission).
    /// The session task assigns position, spawn state, and join order.
    AddPlayer {
        player_id: Uuid,
        name: String,
        avatar: Avatar,
    },
    /// Start a jump for the given player
    Jump { player_id: Uuid },
    /// Reset the session back to WAITING
    Restart,
    /// Remove a disconnected player
    Leave { player_id: Uuid },
}
