use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::AsyncCommands;

use protocol::{MovingEntry, ServerError, UserId};

use super::{moving_key, MovingRegistry, MOVING_ENTRY_TTL_SECS};

pub struct RedisMovingRegistry {
    conn: ConnectionManager,
}

impl RedisMovingRegistry {
    pub fn new(conn: ConnectionManager) -> Self {
        RedisMovingRegistry { conn }
    }

    fn io_err(err: redis::RedisError) -> ServerError {
        ServerError::StorageUnavailable(err.to_string())
    }
}

#[async_trait]
impl MovingRegistry for RedisMovingRegistry {
    async fn add(&self, user_id: &UserId, color: &str) -> Result<(), ServerError> {
        let mut conn = self.conn.clone();
        let entry = MovingEntry {
            user_id: user_id.clone(),
            color: color.to_owned(),
        };
        conn.set_ex::<_, _, ()>(moving_key(user_id), entry.encode(), MOVING_ENTRY_TTL_SECS)
            .await
            .map_err(Self::io_err)
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), ServerError> {
        let mut conn = self.conn.clone();
        conn.del::<_, ()>(moving_key(user_id))
            .await
            .map_err(Self::io_err)
    }

    async fn refresh(&self, user_id: &UserId) -> Result<(), ServerError> {
        let mut conn = self.conn.clone();
        conn.expire::<_, ()>(moving_key(user_id), MOVING_ENTRY_TTL_SECS as i64)
            .await
            .map_err(Self::io_err)
    }

    async fn enumerate(&self) -> Result<Vec<MovingEntry>, ServerError> {
        let mut conn = self.conn.clone();
        let mut iter: redis::AsyncIter<'_, String> = conn
            .scan_match("moving:trainer:*")
            .await
            .map_err(Self::io_err)?;
        let mut keys = Vec::new();
        while let Some(key) = iter.next_item().await {
            keys.push(key);
        }
        drop(iter);

        let mut entries = Vec::with_capacity(keys.len());
        for key in keys {
            let raw: Option<String> = conn.get(&key).await.map_err(Self::io_err)?;
            if let Some(raw) = raw {
                entries.push(MovingEntry::decode(&raw)?);
            }
        }
        Ok(entries)
    }
}
