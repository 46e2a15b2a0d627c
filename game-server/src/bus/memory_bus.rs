use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::broadcast;
use tokio_util::sync::CancellationToken;

use protocol::{DomainEvent, ServerError};

use super::{EventBus, EventHandler};

const CHANNEL_CAPACITY: usize = 1024;

/// In-process stand-in for the Redis Streams bus, used by tests. A single
/// `tokio::sync::broadcast` channel gives every subscriber its own copy of
/// every published event, the same fan-out guarantee the real bus gives
/// every instance's consumer group.
pub struct InMemoryEventBus {
    sender: broadcast::Sender<DomainEvent>,
}

impl InMemoryEventBus {
    pub fn new() -> Self {
        let (sender, _receiver) = broadcast::channel(CHANNEL_CAPACITY);
        InMemoryEventBus { sender }
    }
}

impl Default for InMemoryEventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl EventBus for InMemoryEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), ServerError> {
        // No receivers is not an error: a bus with nobody subscribed yet is
        // normal at startup.
        let _ = self.sender.send(event);
        Ok(())
    }

    async fn run_subscriber(&self, handler: Arc<dyn EventHandler>, shutdown: CancellationToken) {
        let mut receiver = self.sender.subscribe();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => return,
                received = receiver.recv() => {
                    match received {
                        Ok(event) => handler.handle(event).await,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use super::*;

    struct RecordingHandler {
        received: Mutex<Vec<DomainEvent>>,
    }

    #[async_trait]
    impl EventHandler for RecordingHandler {
        async fn handle(&self, event: DomainEvent) {
            self.received.lock().unwrap().push(event);
        }
    }

    fn sample_event() -> DomainEvent {
        DomainEvent::Notification {
            kind: protocol::NotificationKind::Broadcast,
            target_users: None,
            method: "trainer.connected".into(),
            params: serde_json::json!({}),
            timestamp: chrono::Utc::now(),
            request_id: "r1".into(),
        }
    }

    #[tokio::test]
    async fn subscriber_receives_published_events() {
        let bus = Arc::new(InMemoryEventBus::new());
        let handler = Arc::new(RecordingHandler {
            received: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();

        let running_bus = bus.clone();
        let running_handler = handler.clone();
        let running_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            running_bus
                .run_subscriber(running_handler, running_shutdown)
                .await;
        });

        // Give the subscriber a moment to register before publishing.
        tokio::task::yield_now().await;
        bus.publish(sample_event()).await.unwrap();
        tokio::task::yield_now().await;

        shutdown.cancel();
        task.await.unwrap();

        assert_eq!(handler.received.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn shutdown_stops_the_subscriber_loop() {
        let bus = Arc::new(InMemoryEventBus::new());
        let handler = Arc::new(RecordingHandler {
            received: Mutex::new(Vec::new()),
        });
        let shutdown = CancellationToken::new();

        let running_bus = bus.clone();
        let running_handler = handler.clone();
        let running_shutdown = shutdown.clone();
        let task = tokio::spawn(async move {
            running_bus
                .run_subscriber(running_handler, running_shutdown)
                .await;
        });

        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(1), task)
            .await
            .expect("subscriber loop did not exit after cancellation")
            .unwrap();
    }
}
