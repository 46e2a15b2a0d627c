//! The Event Bus: durable publish/subscribe over named streams, one
//! consumer group per instance (spec.md §4.5).

mod memory_bus;
mod redis_bus;

pub use memory_bus::InMemoryEventBus;
pub use redis_bus::RedisEventBus;

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use protocol::{DomainEvent, ServerError};

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle(&self, event: DomainEvent);
}

#[async_trait]
pub trait EventBus: Send + Sync {
    /// Fire-and-forget publish with at-least-once semantics.
    async fn publish(&self, event: DomainEvent) -> Result<(), ServerError>;

    /// Runs the consumer loop until `shutdown` is cancelled. Every message
    /// on every topic is delivered to `handler` exactly once per instance
    /// (because the consumer group is unique per instance, every instance
    /// still gets a full copy of the stream).
    async fn run_subscriber(&self, handler: Arc<dyn EventHandler>, shutdown: CancellationToken);
}

/// Builds this instance's unique consumer group name:
/// `"game-server-" + hostname + "-" + unix-nanoseconds`. Unique per
/// process, so every instance ends up with its own independent read
/// cursor over every topic (spec.md §4.5/§6 "Consumer group").
pub fn instance_consumer_group() -> String {
    let hostname = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "unknown-host".to_owned());
    let nanos = chrono::Utc::now()
        .timestamp_nanos_opt()
        .unwrap_or_default();
    format!("game-server-{hostname}-{nanos}")
}
