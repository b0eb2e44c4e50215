//! ABOUTME: Background cache write queue
//! ABOUTME: Sets are fire-and-forget; removals are ordered behind them and awaited

use super::CacheStore;
use crate::metrics::CacheMetrics;
use mx_core::{Error, Result};
use std::sync::Arc;
use tokio::runtime::Handle;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

enum CacheCommand {
    Set {
        folder: String,
        key: String,
        json: String,
    },
    Remove {
        folder: String,
        key: String,
        done: oneshot::Sender<Result<()>>,
    },
    Flush {
        done: oneshot::Sender<()>,
    },
}

/// Handle to the task that owns cache writes. Cheap to clone.
#[derive(Clone)]
pub struct CacheWriter {
    tx: mpsc::Sender<CacheCommand>,
    store: Arc<dyn CacheStore>,
    metrics: Arc<CacheMetrics>,
}

impl CacheWriter {
    /// Start the writer task on the current tokio runtime
    pub fn spawn(
        store: Arc<dyn CacheStore>,
        metrics: Arc<CacheMetrics>,
        queue_size: usize,
    ) -> Result<Self> {
        let handle = Handle::try_current()
            .map_err(|e| Error::Cache(format!("Cache writer needs a tokio runtime: {}", e)))?;
        let (tx, rx) = mpsc::channel(queue_size.max(1));
        handle.spawn(run(rx, store.clone(), metrics.clone()));
        debug!("Started cache writer with queue size {}", queue_size);
        Ok(Self { tx, store, metrics })
    }

    /// Queue a store write without waiting for it. Dropped when the queue is full.
    pub fn enqueue_set(&self, folder: &str, key: &str, json: String) {
        let command = CacheCommand::Set {
            folder: folder.to_string(),
            key: key.to_string(),
            json,
        };
        if let Err(e) = self.tx.try_send(command) {
            self.metrics.record_dropped_write();
            match e {
                mpsc::error::TrySendError::Full(_) => {
                    warn!("Cache write queue full, dropping {}/{}", folder, key)
                }
                mpsc::error::TrySendError::Closed(_) => {
                    warn!("Cache writer stopped, dropping {}/{}", folder, key)
                }
            }
        }
    }

    /// Remove an entry after every write queued before it
    pub async fn invalidate(&self, folder: &str, key: &str) -> Result<()> {
        let (done, ack) = oneshot::channel();
        let command = CacheCommand::Remove {
            folder: folder.to_string(),
            key: key.to_string(),
            done,
        };

        let result = if self.tx.send(command).await.is_ok() {
            match ack.await {
                Ok(result) => result,
                Err(_) => self.store.remove(folder, key).await,
            }
        } else {
            // Nothing is queued once the writer is gone
            self.store.remove(folder, key).await
        };

        match &result {
            Ok(()) => self.metrics.record_invalidation(),
            Err(e) => {
                self.metrics.record_invalidation_failure();
                warn!("Failed to invalidate {}/{}: {}", folder, key, e);
            }
        }
        result
    }

    /// Wait until everything queued so far has reached the store
    pub async fn flush(&self) {
        let (done, ack) = oneshot::channel();
        if self.tx.send(CacheCommand::Flush { done }).await.is_ok() {
            let _ = ack.await;
        }
    }
}

impl std::fmt::Debug for CacheWriter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheWriter")
            .field("capacity", &self.tx.max_capacity())
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

async fn run(
    mut rx: mpsc::Receiver<CacheCommand>,
    store: Arc<dyn CacheStore>,
    metrics: Arc<CacheMetrics>,
) {
    while let Some(command) = rx.recv().await {
        match command {
            CacheCommand::Set { folder, key, json } => {
                match store.set(&folder, &key, json).await {
                    Ok(()) => metrics.record_write(),
                    Err(e) => {
                        metrics.record_write_failure();
                        warn!("Failed to write cache entry {}/{}: {}", folder, key, e);
                    }
                }
            }
            CacheCommand::Remove { folder, key, done } => {
                let _ = done.send(store.remove(&folder, &key).await);
            }
            CacheCommand::Flush { done } => {
                let _ = done.send(());
            }
        }
    }
    debug!("Cache writer stopped");
}
