//! ABOUTME: Read-through view cache keyed by primary-key values
//! ABOUTME: Hits are re-expanded, committed misses are re-read and written back in the background

use crate::cache::CacheService;
use crate::cache_key::{build_key, cache_folder, key_filter};
use crate::query::Query;
use crate::session::DataSession;
use crate::view::{View, ViewModel};
use mx_core::Result;
use std::marker::PhantomData;
use tracing::{debug, warn};

/// Cache of one view type, stored under the folder derived from its type name.
///
/// The cache never decides an outcome: store failures are logged and the
/// read falls through to the session.
pub struct CacheOverlay<V> {
    service: CacheService,
    folder: String,
    _view: PhantomData<fn() -> V>,
}

impl<V: View> CacheOverlay<V> {
    pub fn new(service: CacheService) -> Self {
        Self {
            service,
            folder: cache_folder::<V>(),
            _view: PhantomData,
        }
    }

    pub fn folder(&self) -> &str {
        &self.folder
    }

    pub fn service(&self) -> &CacheService {
        &self.service
    }

    /// Cached view for `model`'s key, read straight from the store
    pub async fn lookup(&self, model: &V::Model) -> Result<Option<V>> {
        let key = build_key(model)?;
        match self.service.store().get(&self.folder, &key).await? {
            Some(json) => Ok(Some(serde_json::from_str(&json)?)),
            None => Ok(None),
        }
    }

    /// View for the row `model` identifies; `None` when that row is gone.
    ///
    /// A miss is written back only when `write_back` is set. Pass `false`
    /// while reading through a session that may hold uncommitted changes.
    pub async fn get_view<S>(
        &self,
        model: &V::Model,
        session: &mut S,
        write_back: bool,
    ) -> Result<Option<V>>
    where
        S: DataSession,
        V: ViewModel<S>,
    {
        let key = build_key(model)?;

        if let Some(mut view) = self.cached(&key).await {
            debug!("View cache hit: {}/{}", self.folder, key);
            self.service.metrics().record_hit();
            view.expand_view(session).await?;
            return Ok(Some(view));
        }

        debug!("View cache miss: {}/{}", self.folder, key);
        self.service.metrics().record_miss();

        // The caller's copy may be partial; read the canonical row
        let query = Query::<V::Model>::new(key_filter(model)?).take(1);
        let row = match session.fetch(&query).await?.into_iter().next() {
            Some(row) => row,
            None => return Ok(None),
        };

        let view = V::from_model(row, session).await?;
        if !write_back {
            debug!("Skipping write-back of {}/{} read in a borrowed session", self.folder, key);
        } else if view.is_cache() {
            match serde_json::to_string(&view) {
                Ok(json) => self.service.writer().enqueue_set(&self.folder, &key, json),
                Err(e) => warn!("Failed to serialize view {}/{}: {}", self.folder, key, e),
            }
        }
        Ok(Some(view))
    }

    /// Views for each model in order, skipping rows that no longer exist
    pub async fn get_views<S>(
        &self,
        models: &[V::Model],
        session: &mut S,
        write_back: bool,
    ) -> Result<Vec<V>>
    where
        S: DataSession,
        V: ViewModel<S>,
    {
        let mut views = Vec::with_capacity(models.len());
        for model in models {
            if let Some(view) = self.get_view(model, session, write_back).await? {
                views.push(view);
            }
        }
        Ok(views)
    }

    /// Drop the entry for `model`. Failures are logged and counted only.
    pub async fn invalidate(&self, model: &V::Model) {
        let key = match build_key(model) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot build cache key for invalidation: {}", e);
                return;
            }
        };
        if self.service.writer().invalidate(&self.folder, &key).await.is_ok() {
            debug!("Invalidated view cache entry {}/{}", self.folder, key);
        }
    }

    /// Drop every entry of this view type
    pub async fn clear(&self) -> Result<()> {
        self.service.flush().await;
        self.service.store().clear_folder(&self.folder).await?;
        debug!("Cleared view cache folder {}", self.folder);
        Ok(())
    }

    async fn cached(&self, key: &str) -> Option<V> {
        let json = match self.service.store().get(&self.folder, key).await {
            Ok(json) => json?,
            Err(e) => {
                warn!("View cache read failed for {}/{}: {}", self.folder, key, e);
                return None;
            }
        };
        match serde_json::from_str(&json) {
            Ok(view) => Some(view),
            Err(e) => {
                warn!("Discarding unreadable cache entry {}/{}: {}", self.folder, key, e);
                None
            }
        }
    }
}

impl<V> Clone for CacheOverlay<V> {
    fn clone(&self) -> Self {
        Self {
            service: self.service.clone(),
            folder: self.folder.clone(),
            _view: PhantomData,
        }
    }
}

impl<V> std::fmt::Debug for CacheOverlay<V> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CacheOverlay")
            .field("folder", &self.folder)
            .finish()
    }
}
