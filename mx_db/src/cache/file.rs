//! ABOUTME: File-backed cache store, one JSON document per entry
//! ABOUTME: Entries live at <root>/<folder>/<key>.json and expire by modification time

use super::CacheStore;
use async_trait::async_trait;
use mx_core::{Error, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tokio::fs;
use tracing::debug;

/// View cache shared by every process that points at the same directory
#[derive(Debug, Clone)]
pub struct FileCacheStore {
    root: PathBuf,
    ttl: Duration,
}

impl FileCacheStore {
    pub fn new(root: impl Into<PathBuf>, ttl: Duration) -> Self {
        Self {
            root: root.into(),
            ttl,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn folder_path(&self, folder: &str) -> PathBuf {
        self.root.join(encode_segment(folder))
    }

    fn entry_path(&self, folder: &str, key: &str) -> PathBuf {
        self.folder_path(folder)
            .join(format!("{}.json", encode_segment(key)))
    }

    async fn is_stale(&self, path: &Path) -> Result<bool> {
        let modified = fs::metadata(path).await?.modified()?;
        let age = SystemTime::now()
            .duration_since(modified)
            .unwrap_or_default();
        Ok(age > self.ttl)
    }
}

/// Percent-encode anything outside `[A-Za-z0-9._-]` so keys stay one path segment
fn encode_segment(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    for byte in raw.bytes() {
        if byte.is_ascii_alphanumeric() || matches!(byte, b'.' | b'_' | b'-') {
            out.push(byte as char);
        } else {
            out.push_str(&format!("%{:02X}", byte));
        }
    }
    // "." and ".." would escape the folder
    if out.chars().all(|c| c == '.') {
        out = out.replace('.', "%2E");
    }
    out
}

fn io_error(action: &str, path: &Path, e: std::io::Error) -> Error {
    Error::Cache(format!("Failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl CacheStore for FileCacheStore {
    async fn get(&self, folder: &str, key: &str) -> Result<Option<String>> {
        let path = self.entry_path(folder, key);

        match self.is_stale(&path).await {
            Ok(false) => {}
            Ok(true) => {
                debug!("Cache file expired: {}", path.display());
                self.remove(folder, key).await?;
                return Ok(None);
            }
            Err(Error::Io(e)) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e),
        }

        match fs::read_to_string(&path).await {
            Ok(json) => Ok(Some(json)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(io_error("read", &path, e)),
        }
    }

    async fn set(&self, folder: &str, key: &str, json: String) -> Result<()> {
        let dir = self.folder_path(folder);
        fs::create_dir_all(&dir)
            .await
            .map_err(|e| io_error("create", &dir, e))?;

        // Write then rename so readers never see a partial document
        let path = self.entry_path(folder, key);
        let tmp = path.with_extension(format!("json.{}.tmp", std::process::id()));
        fs::write(&tmp, json)
            .await
            .map_err(|e| io_error("write", &tmp, e))?;
        fs::rename(&tmp, &path)
            .await
            .map_err(|e| io_error("rename", &path, e))?;
        Ok(())
    }

    async fn remove(&self, folder: &str, key: &str) -> Result<()> {
        let path = self.entry_path(folder, key);
        match fs::remove_file(&path).await {
            Ok(()) => {
                debug!("Removed cache file {}", path.display());
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("remove", &path, e)),
        }
    }

    async fn clear_folder(&self, folder: &str) -> Result<()> {
        let dir = self.folder_path(folder);
        match fs::remove_dir_all(&dir).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(io_error("clear", &dir, e)),
        }
    }
}
