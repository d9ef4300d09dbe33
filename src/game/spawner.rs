//! Obstacle spawner - timed, probabilistic obstacle generation

use rand::Rng;
use rand_chacha::ChaCha8Rng;
use uuid::Uuid;

use crate::util::time::SIMULATION_TPS;
use crate::ws::protocol::{Difficulty, GameMode, Obstacle, ObstacleKind};

/// Fixed spawn x, just off the right edge of the play field
pub const SPAWN_X: f32 = 400.0;

/// Ground obstacle box
pub const GROUND_OBSTACLE_WIDTH: f32 = 30.0;
pub const GROUND_OBSTACLE_HEIGHT: f32 = 60.0;

/// Flying obstacle box and altitude band
pub const FLYING_OBSTACLE_WIDTH: f32 = 50.0;
pub const FLYING_OBSTACLE_HEIGHT: f32 = 30.0;
pub const FLYING_MIN_Y: f32 = 200.0;
pub const FLYING_BAND: f32 = 100.0;

/// Spawn interval in ticks for a session.
/// Single-player sessions use their difficulty tag; multiplayer sessions
/// always use the medium interval.
pub fn spawn_interval_ticks(mode: GameMode, difficulty: Difficulty) -> u64 {
    let millis: u64 = match mode {
        GameMode::Multi => 2000,
        GameMode::Single => match difficulty {
            Difficulty::Easy => 2500,
            Difficulty::Medium => 2000,
            Difficulty::Hard => 1500,
        },
    };
    millis * SIMULATION_TPS as u64 / 1000
}

/// Spawn one obstacle if the interval has elapsed since the last spawn.
/// Returns the new obstacle and updates `last_spawn_tick` via the return.
pub fn maybe_spawn(
    rng: &mut ChaCha8Rng,
    mode: GameMode,
    difficulty: Difficulty,
    elapsed_ticks: u64,
    last_spawn_tick: u64,
) -> Option<Obstacle> {
    if elapsed_ticks.saturating_sub(last_spawn_tick) <= spawn_interval_ticks(mode, difficulty) {
        return None;
    }

    let kind = if rng.gen_bool(0.5) {
        ObstacleKind::Ground
    } else {
        ObstacleKind::Flying
    };

    Some(spawn(rng, kind))
}

/// Build an obstacle of the given kind at the spawn x
pub fn spawn(rng: &mut ChaCha8Rng, kind: ObstacleKind) -> Obstacle {
    match kind {
        ObstacleKind::Ground => Obstacle {
            id: Uuid::new_v4(),
            kind,
            x: SPAWN_X,
            y: 300.0,
            width: GROUND_OBSTACLE_WIDTH,
            height: GROUND_OBSTACLE_HEIGHT,
        },
        ObstacleKind::Flying => Obstacle {
            id: Uuid::new_v4(),
            kind,
            x: SPAWN_X,
            y: FLYING_MIN_Y + rng.gen_range(0.0..FLYING_BAND),
            width: FLYING_OBSTACLE_WIDTH,
            height: FLYING_OBSTACLE_HEIGHT,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::SeedableRng;

    #[test]
    fn interval_is_monotone_in_difficulty() {
        let easy = spawn_interval_ticks(GameMode::Single, Difficulty::Easy);
        let medium = spawn_interval_ticks(GameMode::Single, Difficulty::Medium);
        let hard = spawn_interval_ticks(GameMode::Single, Difficulty::Hard);
        assert!(easy > medium);
        assert!(medium > hard);
    }

    #[test]
    fn multi_ignores_difficulty_tag() {
        for difficulty in [Difficulty::Easy, Difficulty::Medium, Difficulty::Hard] {
            assert_eq!(
                spawn_interval_ticks(GameMode::Multi, difficulty),
                spawn_interval_ticks(GameMode::Single, Difficulty::Medium)
            );
        }
    }

    #[test]
    fn no_spawn_before_interval_elapses() {
        let mut rng = ChaCha8Rng::seed_from_u64(7);
        let interval = spawn_interval_ticks(GameMode::Single, Difficulty::Medium);

        for tick in 0..=interval {
            assert!(
                maybe_spawn(&mut rng, GameMode::Single, Difficulty::Medium, tick, 0).is_none(),
                "spawned early at tick {}",
                tick
            );
        }

        let spawned =
            maybe_spawn(&mut rng, GameMode::Single, Difficulty::Medium, interval + 1, 0);
        assert!(spawned.is_some());
        assert_eq!(spawned.unwrap().x, SPAWN_X);
    }

    #[test]
    fn flying_y_stays_in_altitude_band() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        for _ in 0..200 {
            let obstacle = spawn(&mut rng, ObstacleKind::Flying);
            assert!(obstacle.y >= FLYING_MIN_Y);
            assert!(obstacle.y < FLYING_MIN_Y + FLYING_BAND);
        }
    }

    #[test]
    fn ground_obstacle_sits_on_ground_line() {
        let mut rng = ChaCha8Rng::seed_from_u64(42);
        let obstacle = spawn(&mut rng, ObstacleKind::Ground);
        assert_eq!(obstacle.y, 300.0);
        assert_eq!(obstacle.width, GROUND_OBSTACLE_WIDTH);
        assert_eq!(obstacle.height, GROUND_OBSTACLE_HEIGHT);
    }
}
