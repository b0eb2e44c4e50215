//! ABOUTME: Cache store abstraction and the service that views read through
//! ABOUTME: Stores hold JSON documents addressed by folder and key

pub mod file;
pub mod memory;
pub mod writer;

pub use file::FileCacheStore;
pub use memory::{CacheStats, MemoryCacheStore};
pub use writer::CacheWriter;

use crate::metrics::CacheMetrics;
use async_trait::async_trait;
use mx_config::{CacheBackend, CacheConfig};
use mx_core::Result;
use std::sync::Arc;
use tracing::info;

/// Storage for serialized views. Missing entries are `Ok(None)`, and removing
/// an absent entry is not an error.
#[async_trait]
pub trait CacheStore: Send + Sync + 'static {
    async fn get(&self, folder: &str, key: &str) -> Result<Option<String>>;

    async fn set(&self, folder: &str, key: &str, json: String) -> Result<()>;

    async fn remove(&self, folder: &str, key: &str) -> Result<()>;

    async fn clear_folder(&self, folder: &str) -> Result<()>;
}

/// A store, its write queue, and the counters both report into
#[derive(Clone)]
pub struct CacheService {
    store: Arc<dyn CacheStore>,
    writer: CacheWriter,
    metrics: Arc<CacheMetrics>,
}

impl CacheService {
    /// Must be called inside a tokio runtime; the write queue runs as a task
    pub fn new(store: Arc<dyn CacheStore>, queue_size: usize) -> Result<Self> {
        let metrics = Arc::new(CacheMetrics::new());
        let writer = CacheWriter::spawn(store.clone(), metrics.clone(), queue_size)?;
        Ok(Self {
            store,
            writer,
            metrics,
        })
    }

    /// `None` when caching is switched off
    pub fn from_config(config: &CacheConfig) -> Result<Option<Self>> {
        if !config.enabled {
            info!("View cache disabled");
            return Ok(None);
        }

        let store: Arc<dyn CacheStore> = match config.backend {
            CacheBackend::Memory => {
                Arc::new(MemoryCacheStore::new(config.max_entries, config.ttl()))
            }
            CacheBackend::File => Arc::new(FileCacheStore::new(&config.directory, config.ttl())),
        };
        info!(
            "View cache enabled: backend={:?}, ttl={}s",
            config.backend, config.ttl_seconds
        );
        Self::new(store, config.write_queue_size).map(Some)
    }

    pub fn store(&self) -> &Arc<dyn CacheStore> {
        &self.store
    }

    pub fn writer(&self) -> &CacheWriter {
        &self.writer
    }

    pub fn metrics(&self) -> &Arc<CacheMetrics> {
        &self.metrics
    }

    /// Wait for queued writes to land in the store
    pub async fn flush(&self) {
        self.writer.flush().await;
    }
}

impl std::fmt::Debug for CacheService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheService")
            .field("writer", &self.writer)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn disabled_config_has_no_service() {
        let config = CacheConfig {
            enabled: false,
            ..CacheConfig::default()
        };
        assert!(CacheService::from_config(&config).unwrap().is_none());
    }

    #[tokio::test]
    async fn file_backend_writes_under_directory() {
        let dir = tempfile::TempDir::new().unwrap();
        let config = CacheConfig {
            enabled: true,
            backend: CacheBackend::File,
            directory: dir.path().to_string_lossy().into_owned(),
            ..CacheConfig::default()
        };
        let service = CacheService::from_config(&config).unwrap().unwrap();
        service.writer().enqueue_set("pages", "_1", "{}".into());
        service.flush().await;

        assert!(dir.path().join("pages").join("_1.json").exists());
        assert_eq!(service.metrics().writes.get(), 1);
    }
}
