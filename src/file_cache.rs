//! Per-node memoized file reads.
//!
//! A `FileCache` maps a path to whatever the owning node learned about the
//! file (existence, content, a version fingerprint). Entries only go away
//! through explicit invalidation; nothing here watches the filesystem.

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::cache::key::hash_content;

/// What a node remembers about one file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FileCacheEntry {
    pub exists: Option<bool>,
    pub content: Option<String>,
    /// Fingerprint of `content`, filled in by [`FileCache::set`].
    pub version: Option<String>,
}

#[derive(Debug, Default)]
pub struct FileCache {
    entries: HashMap<String, FileCacheEntry>,
}

impl FileCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, path: impl AsRef<Path>) -> Option<&FileCacheEntry> {
        self.entries.get(&normalize(path.as_ref()))
    }

    /// Records file content, replacing any previous entry for the path.
    pub fn set(&mut self, path: impl AsRef<Path>, content: impl Into<String>) {
        let content = content.into();
        let entry = FileCacheEntry {
            exists: Some(true),
            version: Some(hash_content(&content)),
            content: Some(content),
        };
        self.entries.insert(normalize(path.as_ref()), entry);
    }

    /// Records that a file is known to be missing.
    pub fn set_missing(&mut self, path: impl AsRef<Path>) {
        self.entries.insert(
            normalize(path.as_ref()),
            FileCacheEntry {
                exists: Some(false),
                ..Default::default()
            },
        );
    }

    /// Drops the entry for one path. Returns whether anything was cached.
    pub fn invalidate(&mut self, path: impl AsRef<Path>) -> bool {
        self.entries.remove(&normalize(path.as_ref())).is_some()
    }

    pub fn invalidate_all(&mut self) {
        debug!(entries = self.entries.len(), "file cache cleared");
        self.entries.clear();
    }

    /// What the cache already knows about `path`: `Some(Some(content))`,
    /// `Some(None)` for a file known to be missing, `None` when the file has
    /// to be read.
    pub fn lookup(&self, path: impl AsRef<Path>) -> Option<Option<String>> {
        let entry = self.get(path)?;
        match (entry.exists, &entry.content) {
            (Some(false), _) => Some(None),
            (_, Some(content)) => Some(Some(content.clone())),
            _ => None,
        }
    }

    /// Remembers the outcome of reading `path`. A missing file is
    /// remembered as missing; other read failures are returned without
    /// touching the cache.
    pub fn record(
        &mut self,
        path: impl AsRef<Path>,
        outcome: std::io::Result<String>,
    ) -> std::io::Result<Option<String>> {
        match outcome {
            Ok(content) => {
                self.set(path, content.clone());
                Ok(Some(content))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                self.set_missing(path);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Returns cached content or reads the file and remembers it.
    pub async fn read(&mut self, path: impl AsRef<Path>) -> std::io::Result<Option<String>> {
        let path = path.as_ref();
        if let Some(known) = self.lookup(path) {
            return Ok(known);
        }
        let outcome = tokio::fs::read_to_string(path).await;
        self.record(path, outcome)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Cache keys use forward slashes regardless of platform.
fn normalize(path: &Path) -> String {
    path.to_string_lossy().replace('\\', "/")
}
