//! The Live-Stream Connection Registry: per-instance map of open SSE
//! client streams, indexed by client id and by user id (spec.md §4.7).

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use axum::response::sse::Event;
use tokio::sync::{mpsc, Mutex, RwLock};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use protocol::UserId;

const ALL_CHANNEL_CAPACITY: usize = 1000;
const USER_CHANNEL_CAPACITY: usize = 1000;
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);
const STALE_AFTER: Duration = Duration::from_secs(60);

/// One open SSE stream. The outbound sender is wrapped in a mutex so
/// concurrent fan-out tasks (the "all" broadcaster and the per-user
/// broadcaster) never interleave partial frames on the same connection,
/// generalizing the relay server's `Arc<Mutex<SplitSink>>` write
/// discipline to an SSE outbound channel.
pub struct ClientConnection {
    pub client_id: String,
    pub user_id: UserId,
    writer: Mutex<mpsc::Sender<Event>>,
    last_seen: Mutex<Instant>,
}

impl ClientConnection {
    pub async fn touch(&self) {
        *self.last_seen.lock().await = Instant::now();
    }

    async fn is_stale(&self, now: Instant) -> bool {
        now.duration_since(*self.last_seen.lock().await) > STALE_AFTER
    }

    /// Sends one frame. Returns `false` if the connection's receiver has
    /// gone away, in which case the caller should remove it.
    async fn write(&self, event: Event) -> bool {
        let writer = self.writer.lock().await;
        writer.send(event).await.is_ok()
    }
}

enum FanOutMessage {
    All(String),
    Users(Vec<UserId>, String),
}

/// Owns every locally-open SSE connection on this process.
pub struct ConnectionRegistry {
    by_client: RwLock<HashMap<String, Arc<ClientConnection>>>,
    by_user: RwLock<HashMap<UserId, HashSet<String>>>,
    fan_out: mpsc::Sender<FanOutMessage>,
}

impl ConnectionRegistry {
    /// Spawns the "all"/"per-user" fan-out drain task and the 30s
    /// staleness sweep, both stopped by `shutdown`.
    pub fn new(shutdown: CancellationToken) -> Arc<Self> {
        let (fan_out_tx, mut fan_out_rx) = mpsc::channel(ALL_CHANNEL_CAPACITY.max(USER_CHANNEL_CAPACITY));

        let registry = Arc::new(ConnectionRegistry {
            by_client: RwLock::new(HashMap::new()),
            by_user: RwLock::new(HashMap::new()),
            fan_out: fan_out_tx,
        });

        let drain_registry = registry.clone();
        let drain_shutdown = shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = drain_shutdown.cancelled() => return,
                    message = fan_out_rx.recv() => {
                        match message {
                            Some(FanOutMessage::All(payload)) => {
                                drain_registry.deliver_to_all(&payload).await;
                            }
                            Some(FanOutMessage::Users(targets, payload)) => {
                                drain_registry.deliver_to_users(&targets, &payload).await;
                            }
                            None => return,
                        }
                    }
                }
            }
        });

        let sweep_registry = registry.clone();
        let sweep_shutdown = shutdown;
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(SWEEP_INTERVAL);
            loop {
                tokio::select! {
                    _ = sweep_shutdown.cancelled() => return,
                    _ = interval.tick() => sweep_registry.sweep_stale().await,
                }
            }
        });

        registry
    }

    pub async fn add_client(&self, client_id: String, user_id: UserId) -> mpsc::Receiver<Event> {
        let (tx, rx) = mpsc::channel(32);
        let connection = Arc::new(ClientConnection {
            client_id: client_id.clone(),
            user_id: user_id.clone(),
            writer: Mutex::new(tx),
            last_seen: Mutex::new(Instant::now()),
        });

        self.by_client
            .write()
            .await
            .insert(client_id.clone(), connection);
        self.by_user
            .write()
            .await
            .entry(user_id)
            .or_default()
            .insert(client_id);

        rx
    }

    /// Idempotent: a second call for an already-removed client id is a
    /// no-op.
    pub async fn remove_client(&self, client_id: &str) {
        let Some(connection) = self.by_client.write().await.remove(client_id) else {
            return;
        };

        let mut by_user = self.by_user.write().await;
        if let Some(set) = by_user.get_mut(&connection.user_id) {
            set.remove(client_id);
            if set.is_empty() {
                by_user.remove(&connection.user_id);
            }
        }
    }

    pub async fn touch(&self, client_id: &str) {
        if let Some(connection) = self.by_client.read().await.get(client_id) {
            connection.touch().await;
        }
    }

    /// Enqueues `payload` for delivery to every local connection. Drops
    /// (and logs) if the fan-out channel is saturated.
    pub fn broadcast_to_all(&self, payload: String) {
        if self.fan_out.try_send(FanOutMessage::All(payload)).is_err() {
            tracing::warn!("fan-out channel full, dropped broadcast-to-all payload");
        }
    }

    /// Enqueues `payload` for delivery to every local connection owned by
    /// one of `target_users`. Silently drops if none of them have a local
    /// connection.
    pub fn broadcast_to_users(&self, target_users: Vec<UserId>, payload: String) {
        if target_users.is_empty() {
            return;
        }
        if self
            .fan_out
            .try_send(FanOutMessage::Users(target_users, payload))
            .is_err()
        {
            tracing::warn!("fan-out channel full, dropped broadcast-to-users payload");
        }
    }

    async fn deliver_to_all(&self, payload: &str) {
        let connections: Vec<Arc<ClientConnection>> =
            self.by_client.read().await.values().cloned().collect();
        let mut dead = Vec::new();
        for connection in connections {
            if !connection.write(Event::default().data(payload)).await {
                dead.push(connection.client_id.clone());
            }
        }
        for client_id in dead {
            self.remove_client(&client_id).await;
        }
    }

    async fn deliver_to_users(&self, target_users: &[UserId], payload: &str) {
        let client_ids: HashSet<String> = {
            let by_user = self.by_user.read().await;
            target_users
                .iter()
                .filter_map(|user_id| by_user.get(user_id))
                .flatten()
                .cloned()
                .collect()
        };
        if client_ids.is_empty() {
            return;
        }

        let connections: Vec<Arc<ClientConnection>> = {
            let by_client = self.by_client.read().await;
            client_ids
                .iter()
                .filter_map(|id| by_client.get(id).cloned())
                .collect()
        };

        let mut dead = Vec::new();
        for connection in connections {
            if !connection.write(Event::default().data(payload)).await {
                dead.push(connection.client_id.clone());
            }
        }
        for client_id in dead {
            self.remove_client(&client_id).await;
        }
    }

    async fn sweep_stale(&self) {
        let now = Instant::now();
        let connections: Vec<Arc<ClientConnection>> =
            self.by_client.read().await.values().cloned().collect();
        let mut stale = Vec::new();
        for connection in connections {
            if connection.is_stale(now).await {
                stale.push(connection.client_id.clone());
            }
        }
        for client_id in stale {
            tracing::info!(client_id, "removing stale SSE connection");
            self.remove_client(&client_id).await;
        }
    }

    #[cfg(test)]
    pub async fn local_client_count(&self) -> usize {
        self.by_client.read().await.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn broadcast_to_all_reaches_every_local_connection() {
        let registry = ConnectionRegistry::new(CancellationToken::new());
        let mut rx_a = registry
            .add_client("client-a".into(), UserId::from("alice"))
            .await;
        let mut rx_b = registry
            .add_client("client-b".into(), UserId::from("bob"))
            .await;

        registry.broadcast_to_all("hello".into());

        assert!(rx_a.recv().await.is_some());
        assert!(rx_b.recv().await.is_some());
    }

    #[tokio::test]
    async fn broadcast_to_users_only_reaches_targeted_user() {
        let registry = ConnectionRegistry::new(CancellationToken::new());
        let mut rx_alice = registry
            .add_client("client-a".into(), UserId::from("alice"))
            .await;
        let mut rx_bob = registry
            .add_client("client-b".into(), UserId::from("bob"))
            .await;

        registry.broadcast_to_users(vec![UserId::from("alice")], "for-alice".into());

        assert!(rx_alice.recv().await.is_some());
        tokio::time::timeout(Duration::from_millis(50), rx_bob.recv())
            .await
            .expect_err("bob should not have received alice's notification");
    }

    #[tokio::test]
    async fn remove_client_is_idempotent() {
        let registry = ConnectionRegistry::new(CancellationToken::new());
        registry
            .add_client("client-a".into(), UserId::from("alice"))
            .await;
        registry.remove_client("client-a").await;
        registry.remove_client("client-a").await;
        assert_eq!(registry.local_client_count().await, 0);
    }

    #[tokio::test]
    async fn removing_the_last_connection_for_a_user_drops_the_user_entry() {
        let registry = ConnectionRegistry::new(CancellationToken::new());
        registry
            .add_client("client-a".into(), UserId::from("alice"))
            .await;
        registry.remove_client("client-a").await;
        assert!(registry.by_user.read().await.is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_removes_connections_stale_for_more_than_sixty_seconds() {
        let registry = ConnectionRegistry::new(CancellationToken::new());
        registry
            .add_client("client-a".into(), UserId::from("alice"))
            .await;

        tokio::time::advance(Duration::from_secs(61)).await;
        registry.sweep_stale().await;

        assert_eq!(registry.local_client_count().await, 0);
    }
}
