use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::ServerError;

/// Default movement speed in game units per second, used for every newly
/// created player.
pub const DEFAULT_SPEED: f64 = 2.0;

/// A point in free-form 2D game units. Not tiles, not pixels.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Position {
    pub x: f64,
    pub y: f64,
}

impl Position {
    pub const fn new(x: f64, y: f64) -> Self {
        Position { x, y }
    }
}

/// A single axis of travel. Each component is constrained to `{-1, 0, 1}`;
/// anything else fails validation (spec: direction components are
/// validated to be in `{-1, 0, 1}`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Direction {
    pub dx: i8,
    pub dy: i8,
}

impl Direction {
    pub const ZERO: Direction = Direction { dx: 0, dy: 0 };

    pub fn new(dx: i8, dy: i8) -> Result<Self, ServerError> {
        if !matches!(dx, -1..=1) || !matches!(dy, -1..=1) {
            return Err(ServerError::InvalidInput(format!(
                "direction components must be in {{-1,0,1}}, got ({dx}, {dy})"
            )));
        }
        Ok(Direction { dx, dy })
    }
}

/// Everything needed to compute a player's current position by dead
/// reckoning: a known start position, a direction and speed, and the
/// instant the leg of travel began.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MovementState {
    pub direction: Direction,
    pub speed: f64,
    pub start_time: DateTime<Utc>,
    pub start_pos: Position,
    pub is_moving: bool,
}

impl MovementState {
    pub fn idle_at(position: Position, now: DateTime<Utc>) -> Self {
        MovementState {
            direction: Direction::ZERO,
            speed: DEFAULT_SPEED,
            start_time: now,
            start_pos: position,
            is_moving: false,
        }
    }
}

/// `computePosition(state, now)` from the spec: if not moving, the current
/// position is just `startPos`; otherwise it's `startPos` advanced along
/// `direction * speed` for the elapsed time since `startTime`.
///
/// Clamps a negative `now - start_time` (clock skew, or `now` supplied out
/// of order in tests) to zero elapsed time rather than running the
/// dead-reckoning backwards.
pub fn compute_position(state: &MovementState, now: DateTime<Utc>) -> Position {
    if !state.is_moving {
        return state.start_pos;
    }
    let elapsed = (now - state.start_time).num_milliseconds().max(0) as f64 / 1000.0;
    Position {
        x: state.start_pos.x + f64::from(state.direction.dx) * state.speed * elapsed,
        y: state.start_pos.y + f64::from(state.direction.dy) * state.speed * elapsed,
    }
}

/// Collapses any in-flight movement onto `start_pos` without changing
/// `is_moving`. This is the idempotent "freeze where you are right now"
/// step every mutator runs before applying a new command.
pub fn update_position_from_movement(state: &mut MovementState, now: DateTime<Utc>) {
    state.start_pos = compute_position(state, now);
    state.start_time = now;
}

/// `startMovement(state, dx, dy, currentPos, now)`: collapses any in-flight
/// movement, then begins a new leg of travel from the current position.
pub fn start_movement(
    state: &mut MovementState,
    direction: Direction,
    now: DateTime<Utc>,
) -> Result<(), ServerError> {
    update_position_from_movement(state, now);
    state.direction = direction;
    state.start_time = now;
    state.is_moving = true;
    Ok(())
}

/// `stopMovement(state, now)`: collapses any in-flight movement and marks
/// the player as stationary. Idempotent: calling this twice in a row is a
/// no-op the second time, since `is_moving` is already false and
/// `compute_position` on a non-moving state just returns `start_pos`.
pub fn stop_movement(state: &mut MovementState, now: DateTime<Utc>) {
    state.start_pos = compute_position(state, now);
    state.direction = Direction::ZERO;
    state.is_moving = false;
}
