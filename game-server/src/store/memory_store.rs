use std::collections::HashMap;

use async_trait::async_trait;
use tokio::sync::Mutex;

use protocol::{Player, Position, ServerError, UserId};

use super::{Mutator, PlayerStore};

/// In-memory double used in tests so the core can be exercised without a
/// live Redis. Holds the whole map behind one lock for the duration of a
/// mutation, which trivially satisfies the linearizability contract the
/// real store provides via `WATCH`/`MULTI`/`EXEC`.
#[derive(Default)]
pub struct InMemoryPlayerStore {
    players: Mutex<HashMap<UserId, Player>>,
}

impl InMemoryPlayerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PlayerStore for InMemoryPlayerStore {
    async fn find_one_and_insert(&self, player: Player) -> Result<Player, ServerError> {
        let mut players = self.players.lock().await;
        if players.contains_key(&player.id) {
            return Err(ServerError::AlreadyExists);
        }
        players.insert(player.id.clone(), player.clone());
        Ok(player)
    }

    async fn find_one_and_update(
        &self,
        id: &UserId,
        mutator: &mut Mutator<'_>,
    ) -> Result<Player, ServerError> {
        let mut players = self.players.lock().await;
        let current = players.get(id).cloned().ok_or(ServerError::NotFound)?;
        match mutator(current.clone())? {
            Some(next) => {
                players.insert(id.clone(), next.clone());
                Ok(next)
            }
            None => Ok(current),
        }
    }

    async fn get_by_id(&self, id: &UserId) -> Result<Option<Player>, ServerError> {
        Ok(self.players.lock().await.get(id).cloned())
    }

    async fn get_all(&self) -> Result<Vec<Player>, ServerError> {
        Ok(self.players.lock().await.values().cloned().collect())
    }

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<Player>, ServerError> {
        Ok(self
            .players
            .lock()
            .await
            .values()
            .find(|p| p.nickname == nickname)
            .cloned())
    }

    async fn get_by_position(&self, position: Position) -> Result<Vec<Player>, ServerError> {
        Ok(self
            .players
            .lock()
            .await
            .values()
            .filter(|p| p.position.x == position.x && p.position.y == position.y)
            .cloned()
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use protocol::MovementState;
    use std::sync::Arc;

    fn player(id: &str) -> Player {
        let now = Utc::now();
        Player {
            id: UserId::from(id),
            nickname: format!("Player{id}"),
            color: "#e6194b".into(),
            position: Position::new(0.0, 0.0),
            movement: MovementState::idle_at(Position::new(0.0, 0.0), now),
            extra: serde_json::json!({}),
            created_at: now,
            updated_at: now,
        }
    }

    #[tokio::test]
    async fn insert_then_insert_again_fails_already_exists() {
        let store = InMemoryPlayerStore::new();
        store.find_one_and_insert(player("alice")).await.unwrap();
        let err = store
            .find_one_and_insert(player("alice"))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::AlreadyExists));
    }

    #[tokio::test]
    async fn update_missing_player_fails_not_found() {
        let store = InMemoryPlayerStore::new();
        let err = store
            .find_one_and_update(&UserId::from("ghost"), &mut |p| Ok(Some(p)))
            .await
            .unwrap_err();
        assert!(matches!(err, ServerError::NotFound));
    }

    #[tokio::test]
    async fn concurrent_updates_do_not_lose_writes() {
        // Invariant 4: N concurrent mutators produce a serial history
        // equivalent to some ordering -- here, N increments must all land.
        let store = Arc::new(InMemoryPlayerStore::new());
        store.find_one_and_insert(player("alice")).await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..50 {
            let store = store.clone();
            handles.push(tokio::spawn(async move {
                store
                    .find_one_and_update(&UserId::from("alice"), &mut |mut p| {
                        let count = p.extra["count"].as_i64().unwrap_or(0);
                        p.extra = serde_json::json!({ "count": count + 1 });
                        Ok(Some(p))
                    })
                    .await
                    .unwrap();
            }));
        }
        for h in handles {
            h.await.unwrap();
        }

        let final_player = store.get_by_id(&UserId::from("alice")).await.unwrap().unwrap();
        assert_eq!(final_player.extra["count"], 50);
    }
}
