//! The Moving-Player Registry: a distributed TTL set of currently-moving
//! [`UserId`]s, shared across every instance in the fleet (spec.md §4.3).

mod memory_registry;
mod redis_registry;

pub use memory_registry::InMemoryMovingRegistry;
pub use redis_registry::RedisMovingRegistry;

use async_trait::async_trait;
use protocol::{MovingEntry, ServerError, UserId};

/// TTL applied to every moving-player entry, per spec.md §3/§4.3.
pub const MOVING_ENTRY_TTL_SECS: u64 = 30;

#[async_trait]
pub trait MovingRegistry: Send + Sync {
    /// Upserts `userID -> "userID:color"` with a fresh TTL.
    async fn add(&self, user_id: &UserId, color: &str) -> Result<(), ServerError>;
    async fn remove(&self, user_id: &UserId) -> Result<(), ServerError>;
    /// Extends the TTL without changing the stored value.
    async fn refresh(&self, user_id: &UserId) -> Result<(), ServerError>;
    /// No ordering guarantees relative to concurrent add/remove.
    async fn enumerate(&self) -> Result<Vec<MovingEntry>, ServerError>;
}

pub fn moving_key(user_id: &UserId) -> String {
    format!("moving:trainer:{user_id}")
}
