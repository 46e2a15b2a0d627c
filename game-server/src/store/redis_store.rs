use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use protocol::{Player, Position, ServerError, UserId};

use super::{nickname_key, player_key, position_cell_key, Mutator, PlayerStore};

/// The storage representation is a single serialized JSON document per key
/// (`"trainer:"+userID`) plus secondary string indices. Atomicity of
/// `find_one_and_update` is implemented with Redis `WATCH`/`MULTI`/`EXEC`:
/// watch the key, read current state, apply the mutator, commit in a
/// conditional transaction, retry the whole sequence on conflict.
pub struct RedisPlayerStore {
    conn: ConnectionManager,
}

const MAX_RETRIES: u32 = 50;

impl RedisPlayerStore {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisPlayerStore { conn }
    }

    fn io_err(err: redis::RedisError) -> ServerError {
        ServerError::StorageUnavailable(err.to_string())
    }

    fn deserialize(raw: &str) -> Result<Player, ServerError> {
        serde_json::from_str(raw)
            .map_err(|e| ServerError::Internal(format!("corrupt player document: {e}")))
    }

    fn serialize(player: &Player) -> Result<String, ServerError> {
        serde_json::to_string(player)
            .map_err(|e| ServerError::Internal(format!("failed to serialize player: {e}")))
    }
}

#[async_trait]
impl PlayerStore for RedisPlayerStore {
    async fn find_one_and_insert(&self, player: Player) -> Result<Player, ServerError> {
        let mut conn = self.conn.clone();
        let key = player_key(&player.id);

        let exists: bool = conn.exists(&key).await.map_err(Self::io_err)?;
        if exists {
            return Err(ServerError::AlreadyExists);
        }

        let serialized = Self::serialize(&player)?;
        let mut pipe = redis::pipe();
        pipe.atomic()
            .set(&key, &serialized)
            .set(nickname_key(&player.nickname), player.id.as_str())
            .sadd(position_cell_key(player.position), player.id.as_str());
        let committed: Option<()> = pipe.query_async(&mut conn).await.map_err(Self::io_err)?;
        if committed.is_none() {
            // Someone raced us between the EXISTS check and the write.
            return Err(ServerError::AlreadyExists);
        }
        Ok(player)
    }

    async fn find_one_and_update(
        &self,
        id: &UserId,
        mutator: &mut Mutator<'_>,
    ) -> Result<Player, ServerError> {
        let mut conn = self.conn.clone();
        let key = player_key(id);

        for _ in 0..MAX_RETRIES {
            redis::cmd("WATCH")
                .arg(&key)
                .query_async::<()>(&mut conn)
                .await
                .map_err(Self::io_err)?;

            let raw: Option<String> = conn.get(&key).await.map_err(Self::io_err)?;
            let Some(raw) = raw else {
                redis::cmd("UNWATCH")
                    .query_async::<()>(&mut conn)
                    .await
                    .map_err(Self::io_err)?;
                return Err(ServerError::NotFound);
            };
            let current = Self::deserialize(&raw)?;

            let next = match mutator(current.clone()) {
                Ok(Some(next)) => next,
                Ok(None) => {
                    redis::cmd("UNWATCH")
                        .query_async::<()>(&mut conn)
                        .await
                        .map_err(Self::io_err)?;
                    return Ok(current);
                }
                Err(err) => {
                    redis::cmd("UNWATCH")
                        .query_async::<()>(&mut conn)
                        .await
                        .map_err(Self::io_err)?;
                    return Err(err);
                }
            };

            let serialized = Self::serialize(&next)?;
            let mut pipe = redis::pipe();
            pipe.atomic().set(&key, &serialized);
            if current.nickname != next.nickname {
                pipe.del(nickname_key(&current.nickname))
                    .set(nickname_key(&next.nickname), next.id.as_str());
            }
            if current.position.x != next.position.x || current.position.y != next.position.y {
                pipe.srem(position_cell_key(current.position), next.id.as_str())
                    .sadd(position_cell_key(next.position), next.id.as_str());
            }

            let committed: Option<()> = pipe.query_async(&mut conn).await.map_err(Self::io_err)?;
            match committed {
                Some(()) => return Ok(next),
                None => continue, // watched key changed concurrently, retry
            }
        }

        Err(ServerError::Conflict)
    }

    async fn get_by_id(&self, id: &UserId) -> Result<Option<Player>, ServerError> {
        let mut conn = self.conn.clone();
        let raw: Option<String> = conn.get(player_key(id)).await.map_err(Self::io_err)?;
        raw.map(|raw| Self::deserialize(&raw)).transpose()
    }

    async fn get_all(&self) -> Result<Vec<Player>, ServerError> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<'_, String> = conn
            .scan_match("trainer:*")
            .await
            .map_err(Self::io_err)?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        drop(iter);

        let mut players = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.map_err(Self::io_err)?;
            if let Some(raw) = raw {
                players.push(Self::deserialize(&raw)?);
            }
        }
        Ok(players)
    }

    async fn find_by_nickname(&self, nickname: &str) -> Result<Option<Player>, ServerError> {
        let mut conn = self.conn.clone();
        let id: Option<String> = conn.get(nickname_key(nickname)).await.map_err(Self::io_err)?;
        match id {
            Some(id) => self.get_by_id(&UserId::from(id)).await,
            None => Ok(None),
        }
    }

    async fn get_by_position(&self, position: Position) -> Result<Vec<Player>, ServerError> {
        let mut conn = self.conn.clone();
        let ids: Vec<String> = conn
            .smembers(position_cell_key(position))
            .await
            .map_err(Self::io_err)?;
        let mut players = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(player) = self.get_by_id(&UserId::from(id)).await? {
                players.push(player);
            }
        }
        Ok(players)
    }
}
