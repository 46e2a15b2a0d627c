use std::sync::Arc;

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use redis::streams::{StreamReadOptions, StreamReadReply};
use redis::AsyncCommands;
use tokio_util::sync::CancellationToken;

use protocol::{DomainEvent, ServerError, ALL_TOPICS};

use super::{EventBus, EventHandler};

const PAYLOAD_FIELD: &str = "payload";
const READ_COUNT: usize = 50;
const BLOCK_MILLIS: usize = 2000;

pub struct RedisEventBus {
    conn: ConnectionManager,
    consumer_group: String,
}

impl RedisEventBus {
    /// Creates the consumer group (if missing) on every topic, so
    /// `run_subscriber` can assume the groups already exist.
    pub async fn new(
        conn: ConnectionManager,
        consumer_group: String,
    ) -> Result<Self, ServerError> {
        let mut setup_conn = conn.clone();
        for topic in ALL_TOPICS {
            let result: redis::RedisResult<()> = setup_conn
                .xgroup_create_mkstream(topic, &consumer_group, "$")
                .await;
            if let Err(err) = result {
                // BUSYGROUP means the group already exists -- fine, every
                // other error is a real connectivity problem.
                if !err.to_string().contains("BUSYGROUP") {
                    return Err(ServerError::BusUnavailable(err.to_string()));
                }
            }
        }
        Ok(RedisEventBus {
            conn,
            consumer_group,
        })
    }

    fn io_err(err: redis::RedisError) -> ServerError {
        ServerError::BusUnavailable(err.to_string())
    }
}

#[async_trait]
impl EventBus for RedisEventBus {
    async fn publish(&self, event: DomainEvent) -> Result<(), ServerError> {
        let mut conn = self.conn.clone();
        let payload = serde_json::to_string(&event)
            .map_err(|e| ServerError::Internal(format!("failed to serialize event: {e}")))?;
        let _reply: String = conn
            .xadd(event.topic(), "*", &[(PAYLOAD_FIELD, payload)])
            .await
            .map_err(Self::io_err)?;
        Ok(())
    }

    async fn run_subscriber(&self, handler: Arc<dyn EventHandler>, shutdown: CancellationToken) {
        let mut conn = self.conn.clone();
        let consumer_name = format!("{}-worker", self.consumer_group);
        let opts = StreamReadOptions::default()
            .group(&self.consumer_group, &consumer_name)
            .count(READ_COUNT)
            .block(BLOCK_MILLIS);
        let ids = vec![">"; ALL_TOPICS.len()];

        loop {
            if shutdown.is_cancelled() {
                return;
            }

            let read: Result<StreamReadReply, _> = tokio::select! {
                _ = shutdown.cancelled() => return,
                result = conn.xread_options(&ALL_TOPICS, &ids, &opts) => result,
            };

            let reply = match read {
                Ok(reply) => reply,
                Err(err) => {
                    tracing::warn!(error = %err, "event bus read failed, retrying");
                    continue;
                }
            };

            for stream in reply.keys {
                for stream_id in stream.ids {
                    let Some(payload) = stream_id.map.get(PAYLOAD_FIELD) else {
                        tracing::warn!(id = %stream_id.id, "stream entry missing payload field");
                        continue;
                    };
                    let payload: String = match redis::from_redis_value(payload) {
                        Ok(p) => p,
                        Err(err) => {
                            tracing::warn!(error = %err, "non-string payload on event bus");
                            continue;
                        }
                    };
                    match serde_json::from_str::<DomainEvent>(&payload) {
                        Ok(event) => handler.handle(event).await,
                        Err(err) => {
                            tracing::warn!(error = %err, "failed to decode domain event");
                        }
                    }

                    let ack: Result<i64, _> = conn
                        .xack(&stream.key, &self.consumer_group, &[&stream_id.id])
                        .await;
                    if let Err(err) = ack {
                        tracing::warn!(error = %err, "failed to ack event bus message");
                    }
                }
            }
        }
    }
}
