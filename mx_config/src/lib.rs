//! ABOUTME: Configuration management with validation and environment loading
//! ABOUTME: Handles database, cache, and repository settings from environment variables and files

use config::{Config as ConfigBuilder, Environment, File};
use mx_core::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use validator::Validate;

/// Main configuration struct
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct Config {
    #[validate(nested)]
    pub database: DatabaseConfig,
    #[validate(nested)]
    pub cache: CacheConfig,
    #[validate(nested)]
    pub repository: RepositoryConfig,
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct DatabaseConfig {
    #[validate(length(min = 1))]
    pub path: String,
    #[validate(range(min = 1, max = 100))]
    pub pool_size: u32,
    pub sqlite_wal: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "mixrepo.db".to_string(),
            pool_size: 10,
            sqlite_wal: true,
        }
    }
}

/// Where cached views are kept
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CacheBackend {
    #[default]
    Memory,
    File,
}

/// View cache configuration
#[derive(Debug, Clone, Deserialize, Serialize, Validate)]
#[serde(default)]
pub struct CacheConfig {
    /// Master switch; repositories read straight through when off
    pub enabled: bool,
    pub backend: CacheBackend,
    /// Root directory for the file backend
    #[validate(length(min = 1))]
    pub directory: String,
    /// Capacity of the memory backend
    #[validate(range(min = 1, max = 1000000))]
    pub max_entries: usize,
    #[validate(range(min = 1, max = 86400))]
    pub ttl_seconds: u64,
    /// Pending background cache writes before new ones are dropped
    #[validate(range(min = 1, max = 65536))]
    pub write_queue_size: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: CacheBackend::Memory,
            directory: "./data/cache".to_string(),
            max_entries: 1000,
            ttl_seconds: 300, // 5 min
            write_queue_size: 256,
        }
    }
}

impl CacheConfig {
    pub fn ttl(&self) -> Duration {
        Duration::from_secs(self.ttl_seconds)
    }
}

/// Repository behaviour defaults
#[derive(Debug, Clone, Deserialize, Serialize, Validate, Default)]
#[serde(default)]
pub struct RepositoryConfig {
    /// Page size applied when a caller pages without choosing one
    #[validate(range(min = 1, max = 1000))]
    pub default_page_size: Option<i64>,
}

impl Config {
    /// Load configuration from environment variables and optional .env file
    pub fn load() -> Result<Self> {
        let mut builder = ConfigBuilder::builder();

        // Set defaults first
        builder = builder
            .set_default("database.path", "mixrepo.db")?
            .set_default("database.pool_size", 10)?
            .set_default("database.sqlite_wal", true)?
            .set_default("cache.enabled", true)?
            .set_default("cache.backend", "memory")?
            .set_default("cache.directory", "./data/cache")?
            .set_default("cache.max_entries", 1000)?
            .set_default("cache.ttl_seconds", 300)?
            .set_default("cache.write_queue_size", 256)?;

        // Multi-word keys collide with the "_" separator, map them explicitly
        for (var, key) in [
            ("MIXREPO_DATABASE_POOL_SIZE", "database.pool_size"),
            ("MIXREPO_DATABASE_SQLITE_WAL", "database.sqlite_wal"),
            ("MIXREPO_CACHE_MAX_ENTRIES", "cache.max_entries"),
            ("MIXREPO_CACHE_TTL_SECONDS", "cache.ttl_seconds"),
            ("MIXREPO_CACHE_WRITE_QUEUE_SIZE", "cache.write_queue_size"),
            (
                "MIXREPO_REPOSITORY_DEFAULT_PAGE_SIZE",
                "repository.default_page_size",
            ),
        ] {
            if let Ok(value) = std::env::var(var) {
                builder = builder.set_override(key, value)?;
            }
        }

        // Try to load from .env file if it exists (optional)
        if std::path::Path::new(".env").exists() {
            builder = builder.add_source(File::with_name(".env").required(false));
        }

        // Load from environment variables with MIXREPO_ prefix (highest priority)
        builder = builder.add_source(
            Environment::with_prefix("MIXREPO")
                .try_parsing(true)
                .separator("_"),
        );

        let config = builder
            .build()
            .map_err(|e| Error::Config(format!("Failed to build config: {}", e)))?;

        let parsed: Config = config
            .try_deserialize()
            .map_err(|e| Error::Config(format!("Failed to deserialize config: {}", e)))?;

        parsed
            .validate()
            .map_err(|e| Error::Config(format!("Config validation failed: {}", e)))?;

        Ok(parsed)
    }
}
