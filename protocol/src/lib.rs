//! Shared domain types used by the game server and by anything that talks
//! to it: positions and dead-reckoned movement, the player aggregate, the
//! domain event union that travels over the event bus, the wire-level
//! notification envelope, and the error taxonomy.
//!
//! This crate has no I/O of its own. It is the thing both the HTTP/SSE
//! layer and the storage/bus layer agree on.

mod error;
mod event;
mod json_patch;
mod notification;
mod palette;
mod player;
mod position;
mod user_id;

pub use error::ServerError;
pub use event::{DomainEvent, NotificationKind, ALL_TOPICS};
pub use json_patch::diff as json_merge_patch_diff;
pub use notification::Notification;
pub use palette::{random_color, COLOR_PALETTE};
pub use player::{MovingEntry, Player, DEFAULT_SPAWN_POSITION};
pub use position::{
    compute_position, start_movement, stop_movement, update_position_from_movement, Direction,
    MovementState, Position, DEFAULT_SPEED,
};
pub use user_id::UserId;
