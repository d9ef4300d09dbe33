//! Snapshot building for broadcast

use std::collections::HashMap;

use uuid::Uuid;

use crate::util::time::ticks_to_secs;
use crate::ws::protocol::{PlayerView, SessionSnapshot};

use super::session::SessionState;

/// Render the authoritative player map into its wire view
pub fn players_view(state: &SessionState) -> HashMap<Uuid, PlayerView> {
    state
        .players
        .values()
        .map(|p| (p.id, p.to_view()))
        .collect()
}

/// Build the full per-tick snapshot payload
pub fn build_snapshot(state: &SessionState) -> SessionSnapshot {
    SessionSnapshot {
        players: players_view(state),
        obstacles: state.obstacles.clone(),
        speed: state.speed,
        elapsed_secs: ticks_to_secs(state.elapsed_ticks),
        phase: state.phase,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ws::protocol::{Avatar, Difficulty, GameMode, SessionPhase};

    #[test]
    fn snapshot_reflects_session_fields() {
        let mut state = SessionState::new(
            Uuid::new_v4(),
            "host".to_string(),
            GameMode::Multi,
            Difficulty::Medium,
            9,
        );
        let id = Uuid::new_v4();
        state.add_player(id, "runner".into(), Avatar::Bird);
        state.speed = 7.5;
        state.elapsed_ticks = 120;

        let snapshot = build_snapshot(&state);

        assert_eq!(snapshot.phase, SessionPhase::Waiting);
        assert_eq!(snapshot.speed, 7.5);
        assert_eq!(snapshot.elapsed_secs, 2.0);
        assert!(snapshot.obstacles.is_empty());
        let view = &snapshot.players[&id];
        assert_eq!(view.name, "runner");
        assert!(view.alive);
        assert_eq!(view.score, 0);
    }
}
