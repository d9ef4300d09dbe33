//! Jump physics, obstacle scroll, and collision detection

/// World constants (screen-space units, 60 ticks per second)
pub const GROUND_Y: f32 = 300.0;
/// Downward acceleration applied per tick while airborne
pub const GRAVITY: f32 = 0.8;
/// Initial vertical velocity of a jump (negative is up)
pub const JUMP_VELOCITY: f32 = -15.0;

/// Player collision box: origin at a fixed screen x, independent of sprite
pub const PLAYER_X: f32 = 50.0;
pub const PLAYER_WIDTH: f32 = 60.0;
pub const PLAYER_HEIGHT: f32 = 50.0;

/// Scroll speed ramp
pub const BASE_SPEED: f32 = 5.0;
pub const SPEED_INCREMENT: f32 = 0.5;
pub const MAX_SPEED: f32 = 15.0;
/// Ticks between speed increments (10 simulation seconds)
pub const SPEED_RAMP_INTERVAL_TICKS: u64 = 600;

/// Obstacles are dropped once fully off-screen past this x
pub const OBSTACLE_REMOVAL_X: f32 = -50.0;

/// Physics system: pure per-tick state transitions
pub struct PhysicsSystem;

impl PhysicsSystem {
    /// Advance one tick of jump physics.
    /// Returns (new_y, new_velocity, still_jumping).
    pub fn step_jump(y: f32, velocity: f32, jumping: bool) -> (f32, f32, bool) {
        if !jumping {
            return (y, velocity, false);
        }

        let new_y = y + velocity;
        let new_velocity = velocity + GRAVITY;

        if new_y >= GROUND_Y {
            // Landed: clamp to the ground line
            (GROUND_Y, 0.0, false)
        } else {
            (new_y, new_velocity, true)
        }
    }

    /// Advance the speed ramp accumulator by one tick.
    /// Fires exactly once per interval regardless of drift.
    /// Returns (new_speed, new_accumulator).
    pub fn step_speed_ramp(speed: f32, ramp_ticks: u64) -> (f32, u64) {
        let ramp_ticks = ramp_ticks + 1;
        if ramp_ticks >= SPEED_RAMP_INTERVAL_TICKS {
            ((speed + SPEED_INCREMENT).min(MAX_SPEED), 0)
        } else {
            (speed, ramp_ticks)
        }
    }

    /// Axis-aligned bounding-box overlap between the player's fixed
    /// collision box (top at player_y) and an obstacle box.
    pub fn player_hits_obstacle(
        player_y: f32,
        obstacle_x: f32,
        obstacle_y: f32,
        obstacle_width: f32,
        obstacle_height: f32,
    ) -> bool {
        PLAYER_X < obstacle_x + obstacle_width
            && PLAYER_X + PLAYER_WIDTH > obstacle_x
            && player_y < obstacle_y + obstacle_height
            && player_y + PLAYER_HEIGHT > obstacle_y
    }
}
