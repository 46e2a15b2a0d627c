//! The Movement Broadcaster: a single long-lived 60 Hz tick loop per
//! process, grounded on the relay server's watchdog ticker
//! (`main.rs::cleanup_dead_rooms`) but re-purposed from a 20-minute sweep
//! to a 60 Hz kinematics re-publish (spec.md §4.4).

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio_util::sync::CancellationToken;

use protocol::{compute_position, DomainEvent};

use crate::bus::EventBus;
use crate::registry::MovingRegistry;
use crate::store::PlayerStore;

const TICK_HZ: u64 = 60;

pub struct Broadcaster {
    player_store: Arc<dyn PlayerStore>,
    moving_registry: Arc<dyn MovingRegistry>,
    event_bus: Arc<dyn EventBus>,
}

impl Broadcaster {
    pub fn new(
        player_store: Arc<dyn PlayerStore>,
        moving_registry: Arc<dyn MovingRegistry>,
        event_bus: Arc<dyn EventBus>,
    ) -> Self {
        Broadcaster {
            player_store,
            moving_registry,
            event_bus,
        }
    }

    /// Runs until `shutdown` is cancelled. The in-flight tick always
    /// completes before the loop exits.
    pub async fn run(&self, shutdown: CancellationToken) {
        let mut interval = tokio::time::interval(Duration::from_micros(1_000_000 / TICK_HZ));
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                _ = interval.tick() => self.tick().await,
            }
        }
    }

    async fn tick(&self) {
        let entries = match self.moving_registry.enumerate().await {
            Ok(entries) => entries,
            Err(err) => {
                tracing::warn!(error = %err, "failed to enumerate moving-player registry");
                return;
            }
        };

        for entry in entries {
            let player = match self.player_store.get_by_id(&entry.user_id).await {
                Ok(Some(player)) => player,
                Ok(None) => {
                    if let Err(err) = self.moving_registry.remove(&entry.user_id).await {
                        tracing::warn!(error = %err, user_id = %entry.user_id, "failed to clear stale moving entry");
                    }
                    continue;
                }
                Err(err) => {
                    tracing::warn!(error = %err, user_id = %entry.user_id, "failed to load player for broadcast tick");
                    if let Err(err) = self.moving_registry.remove(&entry.user_id).await {
                        tracing::warn!(error = %err, user_id = %entry.user_id, "failed to clear moving entry after load failure");
                    }
                    continue;
                }
            };

            if !player.movement.is_moving {
                if let Err(err) = self.moving_registry.remove(&entry.user_id).await {
                    tracing::warn!(error = %err, user_id = %entry.user_id, "failed to clear idle moving entry");
                }
                continue;
            }

            let now = Utc::now();
            let position = compute_position(&player.movement, now);

            let event = DomainEvent::Moved {
                user_id: player.id.clone(),
                nickname: player.nickname.clone(),
                color: player.color.clone(),
                position,
                movement: player.movement.clone(),
                timestamp: now,
                request_id: DomainEvent::broadcast_request_id(&player.id, now),
                changes: None,
            };

            if let Err(err) = self.event_bus.publish(event).await {
                tracing::warn!(error = %err, user_id = %entry.user_id, "failed to publish broadcast tick");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use protocol::{Direction, MovementState, Player, Position, UserId};

    use crate::bus::{EventHandler, InMemoryEventBus};
    use crate::registry::InMemoryMovingRegistry;
    use crate::store::InMemoryPlayerStore;

    use super::*;

    struct RecordingHandler {
        received: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait::async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: DomainEvent) {
            self.received.lock().unwrap().push(event);
        }
    }

    fn moving_player(id: &str) -> Player {
        let now = Utc::now();
        let user_id = UserId::from(id);
        let mut player = Player::new(
            user_id.clone(),
            Player::default_nickname(&user_id),
            "#e6194b".to_owned(),
            now,
        );
        player.movement = MovementState {
            direction: Direction::new(1, 0).unwrap(),
            speed: protocol::DEFAULT_SPEED,
            start_time: now,
            start_pos: Position::new(0.0, 0.0),
            is_moving: true,
        };
        player
    }

    #[tokio::test]
    async fn tick_publishes_moved_for_every_registered_entry() {
        let store = Arc::new(InMemoryPlayerStore::default());
        let registry = Arc::new(InMemoryMovingRegistry::new());
        let bus = Arc::new(InMemoryEventBus::new());

        let player = moving_player("alice");
        store.find_one_and_insert(player.clone()).await.unwrap();
        registry.add(&player.id, &player.color).await.unwrap();

        let handler = Arc::new(RecordingHandler {
            received: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();
        let sub_bus = bus.clone();
        let sub_handler = handler.clone();
        let sub_shutdown = shutdown.clone();
        let subscriber = tokio::spawn(async move {
            sub_bus.run_subscriber(sub_handler, sub_shutdown).await;
        });
        tokio::task::yield_now().await;

        let broadcaster = Broadcaster::new(store, registry, bus);
        broadcaster.tick().await;
        tokio::task::yield_now().await;

        shutdown.cancel();
        subscriber.await.unwrap();

        let received = handler.received.lock().unwrap();
        assert_eq!(received.len(), 1);
        assert!(matches!(received[0], DomainEvent::Moved { .. }));
    }

    #[tokio::test]
    async fn tick_clears_registry_entry_once_player_has_stopped() {
        let store = Arc::new(InMemoryPlayerStore::default());
        let registry = Arc::new(InMemoryMovingRegistry::new());
        let bus = Arc::new(InMemoryEventBus::new());

        let mut player = moving_player("alice");
        player.movement.is_moving = false;
        store.find_one_and_insert(player.clone()).await.unwrap();
        registry.add(&player.id, &player.color).await.unwrap();

        let broadcaster = Broadcaster::new(store, registry.clone(), bus);
        broadcaster.tick().await;

        assert!(registry.enumerate().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn tick_clears_registry_entry_for_a_player_that_no_longer_exists() {
        let store = Arc::new(InMemoryPlayerStore::default());
        let registry = Arc::new(InMemoryMovingRegistry::new());
        let bus = Arc::new(InMemoryEventBus::new());

        let ghost = UserId::from("ghost");
        registry.add(&ghost, "#e6194b").await.unwrap();

        let broadcaster = Broadcaster::new(store, registry.clone(), bus);
        broadcaster.tick().await;

        assert!(registry.enumerate().await.unwrap().is_empty());
    }
}
