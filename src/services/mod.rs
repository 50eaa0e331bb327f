//! Services layer
//!
//! Business logic over the repositories and the filesystem. Everything is
//! constructed explicitly from [`Config`] and a [`Database`] handle; there
//! is no global state.

pub mod asset_store;
pub mod derivative_cache;
pub mod render;
pub mod render_locks;
pub mod storage;

pub use asset_store::AssetStore;
pub use derivative_cache::{CacheLookup, CacheValidator, CachedDerivative, DerivativeCache};
pub use render::{RenderPipeline, RenderResponse, RenderedImage};
pub use render_locks::RenderLocks;
pub use storage::OriginalStorage;

use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::config::Config;
use crate::database::Database;
use crate::errors::AppResult;
use crate::imaging::{ImageCodec, RasterCodec};

/// The service graph shared by the web layer.
#[derive(Clone)]
pub struct Services {
    pub assets: AssetStore,
    pub cache: DerivativeCache,
    pub render: RenderPipeline,
}

impl Services {
    /// Build with the production codec.
    pub async fn new(config: &Config, database: &Database) -> AppResult<Self> {
        Self::with_codec(config, database, Arc::new(RasterCodec::new())).await
    }

    pub async fn with_codec(
        config: &Config,
        database: &Database,
        codec: Arc<dyn ImageCodec>,
    ) -> AppResult<Self> {
        let storage = OriginalStorage::new(config.storage.image_dir.clone());
        storage.ensure_storage_dir().await?;

        let cache = DerivativeCache::new(
            database.pool(),
            database.tables().clone(),
            config.storage.cache_dir.clone(),
        );
        cache.ensure_cache_dir().await?;

        info!(
            "Storage ready: originals in {}, derivatives in {}",
            storage.image_dir().display(),
            cache.cache_dir().display()
        );

        let assets = AssetStore::new(
            database.pool(),
            database.tables().clone(),
            cache.clone(),
            storage,
            Arc::clone(&codec),
            config
                .database
                .transaction_timeout_secs
                .map(Duration::from_secs),
        );
        let render = RenderPipeline::new(assets.clone(), cache.clone(), codec, &config.render);

        Ok(Self {
            assets,
            cache,
            render,
        })
    }
}
