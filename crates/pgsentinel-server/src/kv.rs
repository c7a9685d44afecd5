//! Typed façade over the tree-structured KV store.
//!
//! The daemon is read-mostly: cluster definitions are loaded once at
//! startup, and the only write is the primary-endpoint rewrite during
//! promotion. Two backends ship here: [`MemoryKv`] for tests and embedding,
//! and [`DirKv`], which maps keys onto a directory tree so the definitions
//! can be a mounted config volume.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use dashmap::DashMap;
use thiserror::Error;
use tokio::fs;

/// Errors from a KV backend.
#[derive(Debug, Error)]
pub enum KvError {
    #[error("kv i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// A tree-structured string store keyed by `/`-separated paths.
#[async_trait]
pub trait KvStore: Send + Sync + 'static {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError>;

    async fn put(&self, key: &str, value: &str) -> Result<(), KvError>;

    /// All keys strictly below `prefix`, recursively, in sorted order.
    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvError>;
}

/// In-memory KV store.
#[derive(Debug, Default)]
pub struct MemoryKv {
    entries: DashMap<String, String>,
}

impl MemoryKv {
    pub fn new() -> Self {
        Self::default()
    }

    /// Deletes a key. Not part of the store trait (the daemon never
    /// deletes), but tests and embedders tear down state with it.
    pub fn remove(&self, key: &str) {
        self.entries.remove(key);
    }
}

#[async_trait]
impl KvStore for MemoryKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let want = format!("{prefix}/");
        let mut keys: Vec<String> = self
            .entries
            .iter()
            .map(|e| e.key().clone())
            .filter(|k| k.starts_with(&want))
            .collect();
        keys.sort();
        Ok(keys)
    }
}

/// Filesystem-backed KV store: one file per key under a root directory.
#[derive(Debug)]
pub struct DirKv {
    root: PathBuf,
}

impl DirKv {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }

    /// Rebuilds the `/`-separated key from a path below the root.
    fn key_for(&self, path: &Path) -> Option<String> {
        let rel = path.strip_prefix(&self.root).ok()?;
        let segments: Vec<String> = rel
            .components()
            .map(|c| c.as_os_str().to_string_lossy().into_owned())
            .collect();
        Some(segments.join("/"))
    }
}

#[async_trait]
impl KvStore for DirKv {
    async fn get(&self, key: &str) -> Result<Option<String>, KvError> {
        match fs::read_to_string(self.path_for(key)).await {
            // hand-edited files usually end in a newline; the values here
            // are single tokens or JSON, so trailing whitespace is noise
            Ok(content) => Ok(Some(content.trim_end().to_string())),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn put(&self, key: &str, value: &str) -> Result<(), KvError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).await?;
        }
        fs::write(path, value).await?;
        Ok(())
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>, KvError> {
        let base = self.path_for(prefix);
        let mut keys = Vec::new();
        let mut stack = vec![base.clone()];

        while let Some(dir) = stack.pop() {
            let mut entries = match fs::read_dir(&dir).await {
                Ok(entries) => entries,
                // an absent prefix is an empty subtree, not an error
                Err(err) if err.kind() == std::io::ErrorKind::NotFound && dir == base => {
                    return Ok(Vec::new());
                }
                Err(err) => return Err(err.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    stack.push(path);
                } else if let Some(key) = self.key_for(&path) {
                    keys.push(key);
                }
            }
        }

        keys.sort();
        Ok(keys)
    }
}
