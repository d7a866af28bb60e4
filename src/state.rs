//! Application state management

use std::sync::Arc;

use crate::assets::AssetService;
use crate::config::Config;
use crate::store::ChunkStore;

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    inner: Arc<AppStateInner>,
}

struct AppStateInner {
    store: ChunkStore,
    assets: AssetService,
}

impl AppState {
    pub fn new(config: &Config, store: ChunkStore) -> Self {
        let assets = AssetService::new(store.clone(), &config.assets);

        Self {
            inner: Arc::new(AppStateInner { store, assets }),
        }
    }

    /// Get the chunk store
    pub fn store(&self) -> &ChunkStore {
        &self.inner.store
    }

    /// Get the asset service
    pub fn assets(&self) -> &AssetService {
        &self.inner.assets
    }
}
