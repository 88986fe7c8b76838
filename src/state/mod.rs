pub mod hub;
pub mod session;

use std::{sync::Arc, time::Duration};

use tokio_util::sync::CancellationToken;

use crate::{config::AppConfig, dao::festival_store::FestivalStore};

pub use self::hub::{Hub, HubClosed};
pub use self::session::{Channel, DisconnectCause, SessionHandle};

pub type SharedState = Arc<AppState>;

/// Central application state: configuration, the store and the connection hub.
pub struct AppState {
    config: Arc<AppConfig>,
    store: Arc<dyn FestivalStore>,
    hub: Hub,
    shutdown: CancellationToken,
}

impl AppState {
    /// Construct a new [`AppState`] wrapped in an [`Arc`] so it can be cloned cheaply.
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn FestivalStore>,
        hub: Hub,
        shutdown: CancellationToken,
    ) -> SharedState {
        Arc::new(Self {
            config,
            store,
            hub,
            shutdown,
        })
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn store(&self) -> &Arc<dyn FestivalStore> {
        &self.store
    }

    pub fn hub(&self) -> &Hub {
        &self.hub
    }

    /// Process-wide shutdown token. Session tokens are children of it.
    pub fn shutdown_token(&self) -> &CancellationToken {
        &self.shutdown
    }

    /// Timeout applied to store round-trips.
    pub fn operation_timeout(&self) -> Duration {
        self.config.operation_timeout()
    }
}
