//! ABOUTME: In-memory cache store with LRU eviction and TTL expiry
//! ABOUTME: Holds serialized views keyed by "folder/key"

use super::CacheStore;
use async_trait::async_trait;
use linked_hash_map::LinkedHashMap;
use mx_core::{Error, Result};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::{Duration, Instant};
use tracing::debug;

/// Cache entry with TTL support
#[derive(Debug, Clone)]
struct CacheEntry<T> {
    value: T,
    expires_at: Instant,
}

impl<T> CacheEntry<T> {
    fn new(value: T, ttl: Duration) -> Self {
        Self {
            value,
            expires_at: Instant::now() + ttl,
        }
    }

    fn is_expired(&self) -> bool {
        Instant::now() > self.expires_at
    }
}

/// Generic LRU cache with TTL support
#[derive(Debug)]
struct LruCache<T: Clone> {
    data: HashMap<String, CacheEntry<T>>,
    access_order: LinkedHashMap<String, ()>,
    max_size: usize,
    ttl: Duration,
}

impl<T: Clone> LruCache<T> {
    fn new(max_size: usize, ttl: Duration) -> Self {
        Self {
            data: HashMap::new(),
            access_order: LinkedHashMap::new(),
            max_size: max_size.max(1),
            ttl,
        }
    }

    fn get(&mut self, key: &str) -> Option<T> {
        let expired = match self.data.get(key) {
            None => return None,
            Some(entry) => entry.is_expired(),
        };

        if expired {
            self.data.remove(key);
            self.access_order.remove(key);
            debug!("Cache entry expired: {}", key);
            return None;
        }

        // Move to back (most recently used)
        self.access_order.remove(key);
        self.access_order.insert(key.to_string(), ());
        self.data.get(key).map(|entry| entry.value.clone())
    }

    fn put(&mut self, key: String, value: T) {
        // Remove existing entry if present
        if self.data.remove(&key).is_some() {
            self.access_order.remove(&key);
        }

        // Evict least recently used if at capacity
        while self.data.len() >= self.max_size {
            if let Some((lru_key, _)) = self.access_order.pop_front() {
                self.data.remove(&lru_key);
                debug!("Evicted LRU key: {}", lru_key);
            } else {
                break;
            }
        }

        self.data.insert(key.clone(), CacheEntry::new(value, self.ttl));
        self.access_order.insert(key, ());
    }

    fn invalidate(&mut self, key: &str) -> bool {
        if self.data.remove(key).is_some() {
            self.access_order.remove(key);
            return true;
        }
        false
    }

    fn invalidate_prefix(&mut self, prefix: &str) -> usize {
        let doomed: Vec<String> = self
            .data
            .keys()
            .filter(|k| k.starts_with(prefix))
            .cloned()
            .collect();
        for key in &doomed {
            self.invalidate(key);
        }
        doomed.len()
    }

    fn size(&self) -> usize {
        self.data.len()
    }
}

/// Cache statistics for monitoring
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub entries: usize,
    pub capacity: usize,
}

/// Process-local view cache
#[derive(Debug)]
pub struct MemoryCacheStore {
    entries: RwLock<LruCache<String>>,
}

impl MemoryCacheStore {
    pub fn new(max_entries: usize, ttl: Duration) -> Self {
        Self {
            entries: RwLock::new(LruCache::new(max_entries, ttl)),
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.entries
            .read()
            .map(|cache| CacheStats {
                entries: cache.size(),
                capacity: cache.max_size,
            })
            .unwrap_or(CacheStats {
                entries: 0,
                capacity: 0,
            })
    }

    fn path(folder: &str, key: &str) -> String {
        format!("{}/{}", folder, key)
    }

    fn lock_error(e: impl std::fmt::Display) -> Error {
        Error::Cache(format!("Failed to acquire view cache lock: {}", e))
    }
}

#[async_trait]
impl CacheStore for MemoryCacheStore {
    async fn get(&self, folder: &str, key: &str) -> Result<Option<String>> {
        // LRU bookkeeping needs the write lock even for reads
        let mut cache = self.entries.write().map_err(Self::lock_error)?;
        Ok(cache.get(&Self::path(folder, key)))
    }

    async fn set(&self, folder: &str, key: &str, json: String) -> Result<()> {
        let mut cache = self.entries.write().map_err(Self::lock_error)?;
        cache.put(Self::path(folder, key), json);
        Ok(())
    }

    async fn remove(&self, folder: &str, key: &str) -> Result<()> {
        let mut cache = self.entries.write().map_err(Self::lock_error)?;
        if cache.invalidate(&Self::path(folder, key)) {
            debug!("Invalidated cache key: {}/{}", folder, key);
        }
        Ok(())
    }

    async fn clear_folder(&self, folder: &str) -> Result<()> {
        let mut cache = self.entries.write().map_err(Self::lock_error)?;
        let removed = cache.invalidate_prefix(&format!("{}/", folder));
        debug!("Cleared {} cache entries under {}", removed, folder);
        Ok(())
    }
}
