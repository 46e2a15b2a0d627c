use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Mutex;
use tokio::time::Instant;

use protocol::{MovingEntry, ServerError, UserId};

use super::{MovingRegistry, MOVING_ENTRY_TTL_SECS};

struct Entry {
    color: String,
    expires_at: Instant,
}

/// In-memory double with the same lazy-expiry semantics as Redis TTL keys.
/// Uses `tokio::time::Instant` so tests can drive expiry deterministically
/// with `tokio::time::pause()` / `advance()` instead of real sleeps.
#[derive(Default)]
pub struct InMemoryMovingRegistry {
    entries: Mutex<HashMap<UserId, Entry>>,
}

impl InMemoryMovingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    fn ttl() -> Duration {
        Duration::from_secs(MOVING_ENTRY_TTL_SECS)
    }
}

#[async_trait]
impl MovingRegistry for InMemoryMovingRegistry {
    async fn add(&self, user_id: &UserId, color: &str) -> Result<(), ServerError> {
        let mut entries = self.entries.lock().await;
        entries.insert(
            user_id.clone(),
            Entry {
                color: color.to_owned(),
                expires_at: Instant::now() + Self::ttl(),
            },
        );
        Ok(())
    }

    async fn remove(&self, user_id: &UserId) -> Result<(), ServerError> {
        self.entries.lock().await.remove(user_id);
        Ok(())
    }

    async fn refresh(&self, user_id: &UserId) -> Result<(), ServerError> {
        let mut entries = self.entries.lock().await;
        if let Some(entry) = entries.get_mut(user_id) {
            entry.expires_at = Instant::now() + Self::ttl();
        }
        Ok(())
    }

    async fn enumerate(&self) -> Result<Vec<MovingEntry>, ServerError> {
        let mut entries = self.entries.lock().await;
        let now = Instant::now();
        entries.retain(|_, entry| entry.expires_at > now);
        Ok(entries
            .iter()
            .map(|(user_id, entry)| MovingEntry {
                user_id: user_id.clone(),
                color: entry.color.clone(),
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn refresh_keeps_an_entry_alive_past_its_original_ttl() {
        let registry = InMemoryMovingRegistry::new();
        let alice = UserId::from("alice");
        registry.add(&alice, "#e6194b").await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        registry.refresh(&alice).await.unwrap();

        tokio::time::advance(Duration::from_secs(20)).await;
        let entries = registry.enumerate().await.unwrap();
        assert!(entries.iter().any(|e| e.user_id == alice));
    }

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl_with_no_refresh() {
        // Invariant 5 / scenario S3.
        let registry = InMemoryMovingRegistry::new();
        let alice = UserId::from("alice");
        registry.add(&alice, "#e6194b").await.unwrap();

        tokio::time::advance(Duration::from_secs(31)).await;
        let entries = registry.enumerate().await.unwrap();
        assert!(entries.is_empty());
    }

    #[tokio::test]
    async fn remove_drops_the_entry_immediately() {
        let registry = InMemoryMovingRegistry::new();
        let alice = UserId::from("alice");
        registry.add(&alice, "#e6194b").await.unwrap();
        registry.remove(&alice).await.unwrap();
        assert!(registry.enumerate().await.unwrap().is_empty());
    }
}
