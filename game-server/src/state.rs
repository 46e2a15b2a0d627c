//! The application state shared across HTTP handlers, grounded on the
//! relay server's `lobby::AppState` (a cheap-to-clone handle wrapping the
//! actual shared data in an `Arc`).

use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::bus::EventBus;
use crate::config::Config;
use crate::registry::MovingRegistry;
use crate::store::PlayerStore;
use crate::streams::ConnectionRegistry;

pub struct Inner {
    pub config: Config,
    pub player_store: Arc<dyn PlayerStore>,
    pub moving_registry: Arc<dyn MovingRegistry>,
    pub event_bus: Arc<dyn EventBus>,
    pub connections: Arc<ConnectionRegistry>,
}

#[derive(Clone)]
pub struct AppState(Arc<Inner>);

impl AppState {
    pub fn new(
        config: Config,
        player_store: Arc<dyn PlayerStore>,
        moving_registry: Arc<dyn MovingRegistry>,
        event_bus: Arc<dyn EventBus>,
        shutdown: CancellationToken,
    ) -> Self {
        AppState(Arc::new(Inner {
            config,
            player_store,
            moving_registry,
            event_bus,
            connections: ConnectionRegistry::new(shutdown),
        }))
    }
}

impl std::ops::Deref for AppState {
    type Target = Inner;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}
