//! Incremental cache backends.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use super::{CacheEntry, CacheError, CacheValue};
use crate::actor::Clock;

/// Storage for rendered values, keyed by cache path (`/blog/a`, `/index`).
#[async_trait]
pub trait IncrementalCache: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError>;

    /// Store `value`, stamping it with the current time.
    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;
}

#[derive(Debug)]
pub struct MemoryCache {
    entries: DashMap<String, CacheEntry>,
    clock: Arc<dyn Clock>,
}

impl MemoryCache {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: DashMap::new(),
            clock,
        }
    }

    /// Insert an entry with an explicit `last_modified`.
    pub fn insert(&self, key: &str, entry: CacheEntry) {
        self.entries.insert(key.to_string(), entry);
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[async_trait]
impl IncrementalCache for MemoryCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        Ok(self.entries.get(key).map(|e| e.value().clone()))
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        let entry = CacheEntry {
            value,
            last_modified: self.clock.now_ms(),
            should_bypass_tag_cache: false,
        };
        self.entries.insert(key.to_string(), entry);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.remove(key);
        Ok(())
    }
}

/// JSON entries under `<dir>/<build id>/<key>.cache`.
#[derive(Debug)]
pub struct FilesystemCache {
    root: PathBuf,
    clock: Arc<dyn Clock>,
}

impl FilesystemCache {
    pub fn new(dir: &Path, build_id: &str, clock: Arc<dyn Clock>) -> Self {
        Self {
            root: dir.join(build_id),
            clock,
        }
    }

    fn path_for(&self, key: &str) -> Result<PathBuf, CacheError> {
        let relative = key.trim_start_matches('/');
        if relative.is_empty()
            || relative
                .split('/')
                .any(|segment| segment.is_empty() || segment == "." || segment == "..")
        {
            return Err(CacheError::InvalidKey(key.to_string()));
        }
        Ok(self.root.join(format!("{relative}.cache")))
    }
}

#[async_trait]
impl IncrementalCache for FilesystemCache {
    async fn get(&self, key: &str) -> Result<Option<CacheEntry>, CacheError> {
        let path = self.path_for(key)?;
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }

    async fn set(&self, key: &str, value: CacheValue) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        let entry = CacheEntry {
            value,
            last_modified: self.clock.now_ms(),
            should_bypass_tag_cache: false,
        };
        let bytes = serde_json::to_vec(&entry)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|source| CacheError::Io {
                    path: parent.to_path_buf(),
                    source,
                })?;
        }
        tokio::fs::write(&path, bytes)
            .await
            .map_err(|source| CacheError::Io { path, source })
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(source) => Err(CacheError::Io { path, source }),
        }
    }
}
