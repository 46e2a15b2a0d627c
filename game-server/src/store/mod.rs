//! The Player Aggregate Store: atomic read-modify-write of a player record
//! keyed by [`UserId`] via optimistic concurrency (spec.md §4.2).

mod memory_store;
mod redis_store;

pub use memory_store::InMemoryPlayerStore;
pub use redis_store::RedisPlayerStore;

use async_trait::async_trait;
use protocol::{Player, Position, ServerError, UserId};

/// A mutator closure for `find_one_and_update`: given the current player,
/// return `Ok(Some(next))` to persist `next`, `Ok(None)` to no-op, or
/// `Err` to abort the update with that error.
pub type Mutator<'a> = dyn FnMut(Player) -> Result<Option<Player>, ServerError> + Send + 'a;

#[async_trait]
pub trait PlayerStore: Send + Sync {
    /// Fails with `AlreadyExists` if `player.id` is already present.
    async fn find_one_and_insert(&self, player: Player) -> Result<Player, ServerError>;

    /// Fails with `NotFound` if `id` is absent. Loads the current player,
    /// calls `mutator`, and atomically persists the result (or no-ops if
    /// the mutator returned `None`). Returns the player as it exists after
    /// the call.
    async fn find_one_and_update(
        &self,
        id: &UserId,
        mutator: &mut Mutator<'_>,
    ) -> Result<Player, ServerError>;

    async fn get_by_id(&self, id: &UserId) -> Result<Option<Player>, ServerError>;
    async fn get_all(&self) -> Result<Vec<Player>, ServerError>;
    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<Player>, ServerError>;
    async fn get_by_position(&self, position: Position) -> Result<Vec<Player>, ServerError>;
}

/// Position-cell index key, one decimal place of precision per spec.md §6:
/// `"idx:trainer:position:<x.x>:<y.y>"`.
pub fn position_cell_key(position: Position) -> String {
    format!("idx:trainer:position:{:.1}:{:.1}", position.x, position.y)
}

pub fn nickname_key(nickname: &str) -> String {
    format!("idx:trainer:nickname:{nickname}")
}

pub fn player_key(id: &UserId) -> String {
    format!("trainer:{id}")
}
