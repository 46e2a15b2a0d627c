//! Top-level server builder: owns every component and runs the start and
//! shutdown order from spec.md §4.9. Start order: storage client → event
//! bus publisher+subscriber → live-stream registry → SSE event handler
//! (registered on the bus) → movement broadcaster → HTTP server. Shutdown
//! runs the reverse, each step bounded by a timeout and idempotent.

use std::sync::Arc;
use std::time::Duration;

use redis::aio::ConnectionManager;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use protocol::ServerError;

use crate::broadcaster::Broadcaster;
use crate::bus::{instance_consumer_group, EventBus, RedisEventBus};
use crate::config::Config;
use crate::http;
use crate::registry::{MovingRegistry, RedisMovingRegistry};
use crate::sse_handler::SseEventHandler;
use crate::state::AppState;
use crate::store::{PlayerStore, RedisPlayerStore};

const SHUTDOWN_TIMEOUT: Duration = Duration::from_secs(5);

fn redis_err(err: redis::RedisError) -> ServerError {
    ServerError::StorageUnavailable(err.to_string())
}

/// A server instance, fully wired and ready to `run()`. Every shutdown
/// step is idempotent: calling `shutdown()` twice (or racing it with a
/// signal handler) is safe.
pub struct Server {
    state: AppState,
    broadcaster: Arc<Broadcaster>,
    broadcaster_token: CancellationToken,
    bus_subscriber_token: CancellationToken,
    registry_token: CancellationToken,
    listener: TcpListener,
}

impl Server {
    pub async fn build(config: Config) -> Result<Self, ServerError> {
        let client = redis::Client::open(config.redis_url.clone()).map_err(redis_err)?;
        let conn = ConnectionManager::new(client).await.map_err(redis_err)?;

        let player_store: Arc<dyn PlayerStore> = Arc::new(RedisPlayerStore::new(conn.clone()));
        let moving_registry: Arc<dyn MovingRegistry> =
            Arc::new(RedisMovingRegistry::new(conn.clone()));

        let consumer_group = instance_consumer_group();
        tracing::info!(consumer_group, "starting event bus consumer group");
        let event_bus: Arc<dyn EventBus> =
            Arc::new(RedisEventBus::new(conn, consumer_group).await?);

        let registry_token = CancellationToken::new();
        let state = AppState::new(
            config.clone(),
            player_store.clone(),
            moving_registry.clone(),
            event_bus.clone(),
            registry_token.clone(),
        );

        let bus_subscriber_token = CancellationToken::new();
        let sse_handler = Arc::new(SseEventHandler::new(state.connections.clone()));
        let subscriber_bus = event_bus.clone();
        let subscriber_token = bus_subscriber_token.clone();
        tokio::spawn(async move {
            subscriber_bus.run_subscriber(sse_handler, subscriber_token).await;
        });

        let broadcaster = Arc::new(Broadcaster::new(player_store, moving_registry, event_bus.clone()));
        let broadcaster_token = CancellationToken::new();

        let listener = TcpListener::bind(("0.0.0.0", config.server_port))
            .await
            .map_err(|e| ServerError::Internal(format!("failed to bind HTTP listener: {e}")))?;

        Ok(Server {
            state,
            broadcaster,
            broadcaster_token,
            bus_subscriber_token,
            registry_token,
            listener,
        })
    }

    /// Starts the broadcaster, then serves HTTP until `shutdown` fires.
    pub async fn run(self, shutdown: CancellationToken) -> Result<(), ServerError> {
        let broadcaster = self.broadcaster.clone();
        let broadcaster_token = self.broadcaster_token.clone();
        let broadcaster_task: JoinHandle<()> =
            tokio::spawn(async move { broadcaster.run(broadcaster_token).await });

        let app = http::router(self.state);
        let server_shutdown = shutdown.clone();
        let serve_result = axum::serve(self.listener, app)
            .with_graceful_shutdown(async move { server_shutdown.cancelled().await })
            .await;

        self.broadcaster_token.cancel();
        if tokio::time::timeout(SHUTDOWN_TIMEOUT, broadcaster_task)
            .await
            .is_err()
        {
            tracing::warn!("movement broadcaster did not stop within the shutdown timeout");
        }

        self.registry_token.cancel();

        self.bus_subscriber_token.cancel();

        serve_result.map_err(|e| ServerError::Internal(format!("HTTP server error: {e}")))
    }
}
