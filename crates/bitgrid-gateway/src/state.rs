//! Gateway shared state.

use std::sync::Arc;

use bitgrid_core::config::{Config, StorageKind};
use bitgrid_core::grid::GridStore;
use bitgrid_core::moderation::ModerationList;
use bitgrid_core::store::{BitStore, FileBitStore, MemoryBitStore};

use crate::commands::Dispatcher;
use crate::hub::Hub;

/// Shared gateway state accessible from all connections and handlers.
pub struct GatewayState {
    pub config: Arc<Config>,
    pub grid: Arc<GridStore>,
    pub hub: Hub,
    pub moderation: Arc<ModerationList>,
    pub dispatcher: Dispatcher,
    #[cfg(feature = "metrics")]
    pub metrics: Option<metrics_exporter_prometheus::PrometheusHandle>,
}

impl GatewayState {
    /// Build the state and spawn the hub loop. Must be called inside a Tokio runtime.
    pub fn new(config: Arc<Config>, grid: Arc<GridStore>) -> Self {
        let moderation = Arc::new(ModerationList::new());
        let (hub, event_loop) = Hub::new(moderation.clone(), config.event_capacity());
        tokio::spawn(event_loop.run());

        let dispatcher = Dispatcher::new(hub.clone(), grid.clone(), config.throttle_interval());

        Self {
            config,
            grid,
            hub,
            moderation,
            dispatcher,
            #[cfg(feature = "metrics")]
            metrics: None,
        }
    }

    #[cfg(feature = "metrics")]
    pub fn with_metrics(mut self, handle: metrics_exporter_prometheus::PrometheusHandle) -> Self {
        self.metrics = Some(handle);
        self
    }
}

/// Open the bit store selected by `config`.
pub fn open_store(config: &Config) -> Arc<dyn BitStore> {
    match config.storage_kind() {
        StorageKind::Memory => Arc::new(MemoryBitStore::new()),
        StorageKind::File => Arc::new(FileBitStore::new(config.grid_data_dir())),
    }
}

/// Open the configured store and make sure the grid exists in it.
pub async fn open_grid(config: &Config) -> bitgrid_core::error::Result<Arc<GridStore>> {
    let grid = GridStore::new(open_store(config), config.grid_key(), config.grid_size());
    grid.init().await?;
    Ok(Arc::new(grid))
}
