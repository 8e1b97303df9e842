//! Content-addressed transform cache
//!
//! Maps a fingerprint of transform input (see [`key::generate_key`]) to the
//! serialized transform result and the diagnostics produced while computing
//! it. Entries outlive the process; they are only ever superseded by a
//! fingerprint mismatch or removed by eviction.
//!
//! The cache never decides whether a build succeeds: any I/O or decoding
//! failure is logged and reported as a miss, and a failed write is dropped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::BuildError;
use crate::logging::{operations, services, status};

pub mod eviction;
pub mod key;
pub mod store;

pub use eviction::{EvictionConfig, EvictionManager, EvictionPolicyType, EvictionReport};
pub use key::{generate_key, hash_content};
pub use store::{CacheStore, DiskStore, StoredObject};

/// Bumped whenever the envelope layout changes; older entries become misses.
pub const CACHE_FORMAT_VERSION: u32 = 2;

/// A cached transform result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheRecord {
    pub output: String,
    /// Non-fatal diagnostics, replayed on every hit.
    pub diagnostics: Vec<String>,
}

/// On-disk envelope around a record
#[derive(Debug, Serialize, Deserialize)]
struct CacheEnvelope {
    format_version: u32,
    key: String,
    created_at: DateTime<Utc>,
    record: CacheRecord,
}

/// Cache statistics
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheStats {
    pub total_entries: u64,
    pub total_bytes: u64,
    pub cache_dir: PathBuf,
}

#[derive(Clone)]
pub struct ContentCache {
    store: Arc<dyn CacheStore>,
}

impl ContentCache {
    /// Cache backed by a directory on disk.
    pub fn on_disk(cache_dir: impl Into<PathBuf>) -> Self {
        Self::with_store(Arc::new(DiskStore::new(cache_dir)))
    }

    pub fn with_store(store: Arc<dyn CacheStore>) -> Self {
        Self { store }
    }

    pub fn location(&self) -> &Path {
        self.store.location()
    }

    /// Looks up `key`. Failures degrade to `None`.
    pub async fn read(&self, key: &str) -> Option<CacheRecord> {
        match self.try_read(key).await {
            Ok(Some(record)) => {
                debug!(
                    service = services::CONTENT_CACHE,
                    operation = operations::GET,
                    status = status::SUCCESS,
                    key = %key,
                    "cache hit"
                );
                Some(record)
            }
            Ok(None) => {
                debug!(
                    service = services::CONTENT_CACHE,
                    operation = operations::GET,
                    status = status::MISS,
                    key = %key,
                    "cache miss"
                );
                None
            }
            Err(e) => {
                warn!(
                    service = services::CONTENT_CACHE,
                    operation = operations::GET,
                    status = status::ERROR,
                    key = %key,
                    "Cache read failed, treating as miss: {}",
                    e
                );
                None
            }
        }
    }

    /// Stores `record` under `key`. Failures are logged and dropped.
    pub async fn write(&self, key: &str, record: &CacheRecord) {
        match self.try_write(key, record).await {
            Ok(size_bytes) => debug!(
                service = services::CONTENT_CACHE,
                operation = operations::PUT,
                status = status::SUCCESS,
                key = %key,
                size_bytes,
                "cache write"
            ),
            Err(e) => warn!(
                service = services::CONTENT_CACHE,
                operation = operations::PUT,
                status = status::ERROR,
                key = %key,
                "Cache write failed, result not cached: {}",
                e
            ),
        }
    }

    /// Like [`read`](Self::read) but surfaces I/O failures.
    ///
    /// Undecodable entries and entries written by another format version are
    /// reported as misses, not errors.
    pub async fn try_read(&self, key: &str) -> Result<Option<CacheRecord>, BuildError> {
        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        let bytes = tokio::task::spawn_blocking(move || store.get(&owned_key))
            .await
            .map_err(|e| self.join_error(e))??;

        let Some(bytes) = bytes else {
            return Ok(None);
        };

        match serde_json::from_slice::<CacheEnvelope>(&bytes) {
            Ok(envelope)
                if envelope.format_version == CACHE_FORMAT_VERSION && envelope.key == key =>
            {
                Ok(Some(envelope.record))
            }
            Ok(envelope) => {
                debug!(
                    "Ignoring cache entry {} (format version {}, key {})",
                    key, envelope.format_version, envelope.key
                );
                Ok(None)
            }
            Err(e) => {
                warn!("Ignoring unreadable cache entry {}: {}", key, e);
                Ok(None)
            }
        }
    }

    /// Like [`write`](Self::write) but surfaces I/O failures. Returns the
    /// number of bytes written.
    pub async fn try_write(&self, key: &str, record: &CacheRecord) -> Result<usize, BuildError> {
        let envelope = CacheEnvelope {
            format_version: CACHE_FORMAT_VERSION,
            key: key.to_string(),
            created_at: Utc::now(),
            record: record.clone(),
        };
        let bytes = serde_json::to_vec(&envelope).map_err(|e| BuildError::CacheIo {
            path: self.location().to_path_buf(),
            source: e.into(),
        })?;
        let size = bytes.len();

        let store = Arc::clone(&self.store);
        let owned_key = key.to_string();
        tokio::task::spawn_blocking(move || store.put(&owned_key, &bytes))
            .await
            .map_err(|e| self.join_error(e))??;

        Ok(size)
    }

    fn join_error(&self, e: tokio::task::JoinError) -> BuildError {
        BuildError::CacheIo {
            path: self.location().to_path_buf(),
            source: std::io::Error::other(e),
        }
    }

    pub fn stats(&self) -> Result<CacheStats, BuildError> {
        let objects = self.store.list()?;
        Ok(CacheStats {
            total_entries: objects.len() as u64,
            total_bytes: objects.iter().map(|o| o.size).sum(),
            cache_dir: self.location().to_path_buf(),
        })
    }

    /// Runs one eviction pass. Entries that fail to delete are logged and
    /// skipped.
    pub fn evict(&self, config: &EvictionConfig) -> Result<EvictionReport, BuildError> {
        let objects = self.store.list()?;
        let bytes_before = objects.iter().map(|o| o.size).sum();

        let manager = EvictionManager::new(config.clone());
        let mut report = EvictionReport {
            bytes_before,
            ..Default::default()
        };

        for candidate in manager.select_candidates(objects) {
            match self.store.delete(&candidate.key) {
                Ok(()) => {
                    debug!("Evicted entry {} ({} bytes)", candidate.key, candidate.size);
                    report.bytes_evicted += candidate.size;
                    report.evicted.push(candidate.key);
                }
                Err(e) => warn!("Failed to evict entry {}: {}", candidate.key, e),
            }
        }

        Ok(report)
    }

    /// Runs [`evict`](Self::evict) on the blocking pool. Failures are logged
    /// and reported as `None`; a cache over its limit never fails a build.
    pub async fn trim(&self, config: &EvictionConfig) -> Option<EvictionReport> {
        let cache = self.clone();
        let config = config.clone();
        let outcome = tokio::task::spawn_blocking(move || cache.evict(&config))
            .await
            .map_err(|e| self.join_error(e))
            .and_then(|result| result);

        match outcome {
            Ok(report) => {
                if !report.evicted.is_empty() {
                    info!(
                        service = services::CONTENT_CACHE,
                        evicted = report.evicted.len(),
                        bytes_evicted = report.bytes_evicted,
                        "content cache trimmed"
                    );
                }
                Some(report)
            }
            Err(e) => {
                warn!(
                    service = services::CONTENT_CACHE,
                    status = status::ERROR,
                    "Cache eviction failed: {}",
                    e
                );
                None
            }
        }
    }

    /// Removes every entry. Returns how many were removed.
    pub fn clear(&self) -> Result<usize, BuildError> {
        let objects = self.store.list()?;
        for object in &objects {
            self.store.delete(&object.key)?;
        }
        Ok(objects.len())
    }
}

impl std::fmt::Debug for ContentCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCache")
            .field("location", &self.location())
            .finish()
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Store whose every operation fails like an unreadable disk.
    #[derive(Default)]
    pub struct FailingStore {
        pub reads: AtomicUsize,
        pub writes: AtomicUsize,
    }

    impl FailingStore {
        fn failure(&self) -> BuildError {
            BuildError::CacheIo {
                path: PathBuf::from("/unavailable"),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
            }
        }
    }

    impl CacheStore for FailingStore {
        fn get(&self, _key: &str) -> Result<Option<Vec<u8>>, BuildError> {
            self.reads.fetch_add(1, Ordering::SeqCst);
            Err(self.failure())
        }

        fn put(&self, _key: &str, _data: &[u8]) -> Result<(), BuildError> {
            self.writes.fetch_add(1, Ordering::SeqCst);
            Err(self.failure())
        }

        fn delete(&self, _key: &str) -> Result<(), BuildError> {
            Err(self.failure())
        }

        fn list(&self) -> Result<Vec<StoredObject>, BuildError> {
            Err(self.failure())
        }

        fn location(&self) -> &Path {
            Path::new("/unavailable")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::testing::FailingStore;
    use super::*;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    fn record(output: &str) -> CacheRecord {
        CacheRecord {
            output: output.to_string(),
            diagnostics: vec!["autoprefixer: gradient syntax is outdated".to_string()],
        }
    }

    #[tokio::test]
    async fn test_write_then_read() {
        let temp = TempDir::new().unwrap();
        let cache = ContentCache::on_disk(temp.path());
        let key = generate_key(".a{}", ["chrome 120"]);

        assert_eq!(cache.read(&key).await, None);
        cache.write(&key, &record(".a{}")).await;
        assert_eq!(cache.read(&key).await, Some(record(".a{}")));
    }

    #[tokio::test]
    async fn test_entries_survive_new_instance() {
        let temp = TempDir::new().unwrap();
        let key = generate_key(".b{}", Vec::<String>::new());

        ContentCache::on_disk(temp.path())
            .write(&key, &record(".b{}"))
            .await;

        let reopened = ContentCache::on_disk(temp.path());
        assert_eq!(reopened.read(&key).await, Some(record(".b{}")));
    }

    #[tokio::test]
    async fn test_corrupt_entry_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let store = Arc::new(DiskStore::new(temp.path()));
        store.put("abcdef", b"{not json").unwrap();

        let cache = ContentCache::with_store(store);
        assert_eq!(cache.try_read("abcdef").await.unwrap(), None);
    }

    #[tokio::test]
    async fn test_entry_under_wrong_key_is_a_miss() {
        let temp = TempDir::new().unwrap();
        let cache = ContentCache::on_disk(temp.path());
        cache.write("abcdef", &record("x")).await;

        // Simulate a file copied to the wrong location
        let store = DiskStore::new(temp.path());
        let bytes = store.get("abcdef").unwrap().unwrap();
        store.put("fedcba", &bytes).unwrap();

        assert_eq!(cache.read("fedcba").await, None);
    }

    #[tokio::test]
    async fn test_failing_store_degrades_to_miss() {
        let store = Arc::new(FailingStore::default());
        let cache = ContentCache::with_store(store.clone());

        assert_eq!(cache.read("abcdef").await, None);
        cache.write("abcdef", &record("x")).await;
        assert!(cache.try_read("abcdef").await.is_err());

        assert_eq!(store.reads.load(Ordering::SeqCst), 2);
        assert_eq!(store.writes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_stats_and_clear() {
        let temp = TempDir::new().unwrap();
        let cache = ContentCache::on_disk(temp.path());
        cache.write(&generate_key("a", ["x"]), &record("a")).await;
        cache.write(&generate_key("b", ["x"]), &record("b")).await;

        let stats = cache.stats().unwrap();
        assert_eq!(stats.total_entries, 2);
        assert!(stats.total_bytes > 0);

        assert_eq!(cache.clear().unwrap(), 2);
        assert_eq!(cache.stats().unwrap().total_entries, 0);
    }

    #[tokio::test]
    async fn test_evict_down_to_target() {
        let temp = TempDir::new().unwrap();
        let cache = ContentCache::on_disk(temp.path());
        for i in 0..10 {
            let key = generate_key(&format!(".c{} {{}}", i), ["x"]);
            cache.write(&key, &record(&"x".repeat(100))).await;
        }

        let before = cache.stats().unwrap().total_bytes;
        let config = EvictionConfig {
            max_size_bytes: before / 2,
            ..Default::default()
        };

        let report = cache.evict(&config).unwrap();
        assert!(!report.evicted.is_empty());
        assert_eq!(report.bytes_before, before);

        let after = cache.stats().unwrap().total_bytes;
        assert!(after <= config.target_size_bytes());
        assert_eq!(after, before - report.bytes_evicted);
    }

    #[tokio::test]
    async fn test_trim_keeps_cache_under_limit() {
        let temp = TempDir::new().unwrap();
        let cache = ContentCache::on_disk(temp.path());
        for i in 0..6 {
            let key = generate_key(&format!(".t{} {{}}", i), ["x"]);
            cache.write(&key, &record(&"y".repeat(200))).await;
        }
        let before = cache.stats().unwrap().total_bytes;

        let roomy = EvictionConfig::default();
        assert!(cache.trim(&roomy).await.unwrap().evicted.is_empty());

        let tight = EvictionConfig {
            max_size_bytes: before / 3,
            ..Default::default()
        };
        let report = cache.trim(&tight).await.unwrap();
        assert!(!report.evicted.is_empty());
        assert!(cache.stats().unwrap().total_bytes <= tight.target_size_bytes());
    }

    #[tokio::test]
    async fn test_trim_on_failing_store_is_logged_not_raised() {
        let cache = ContentCache::with_store(Arc::new(FailingStore::default()));
        assert_eq!(cache.trim(&EvictionConfig::default()).await, None);
    }
}
