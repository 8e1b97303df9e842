use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{SystemTime, UNIX_EPOCH};

use tracing::debug;
use walkdir::WalkDir;

use crate::error::BuildError;

/// Backend for content cache entries.
///
/// Implementations are synchronous; `ContentCache` moves calls onto the
/// blocking thread pool.
pub trait CacheStore: Send + Sync {
    /// Retrieve an entry by key
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BuildError>;

    /// Store an entry, replacing any previous value for the key
    fn put(&self, key: &str, data: &[u8]) -> Result<(), BuildError>;

    /// Delete an entry. Deleting a missing entry is not an error.
    fn delete(&self, key: &str) -> Result<(), BuildError>;

    /// List all entries with the metadata eviction needs
    fn list(&self) -> Result<Vec<StoredObject>, BuildError>;

    /// Where the entries live
    fn location(&self) -> &Path;
}

/// An entry as seen by a store listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredObject {
    pub key: String,
    pub size: u64,
    /// Last access timestamp (Unix seconds)
    pub accessed_at: i64,
    /// Creation timestamp (Unix seconds)
    pub created_at: i64,
}

/// Filesystem-backed store.
///
/// Layout: `<dir>/objects/ab/cd1234...` (first 2 key chars = subdir). The
/// entry's modification time is its creation time; its access time is
/// refreshed explicitly on every read so LRU eviction does not depend on
/// the mount's atime settings.
pub struct DiskStore {
    root: PathBuf,
    objects_dir: PathBuf,
}

impl DiskStore {
    /// Directories are created lazily on first write, so constructing a
    /// store never fails.
    pub fn new(cache_dir: impl Into<PathBuf>) -> Self {
        let root = cache_dir.into();
        let objects_dir = root.join("objects");
        Self { root, objects_dir }
    }

    fn key_to_path(&self, key: &str) -> PathBuf {
        if key.len() > 2 {
            let (prefix, suffix) = key.split_at(2);
            self.objects_dir.join(prefix).join(suffix)
        } else {
            self.objects_dir.join(key)
        }
    }

    fn io_error(path: &Path, source: std::io::Error) -> BuildError {
        BuildError::CacheIo {
            path: path.to_path_buf(),
            source,
        }
    }

    fn touch(path: &Path) {
        let result = fs::File::options()
            .write(true)
            .open(path)
            .and_then(|file| {
                file.set_times(fs::FileTimes::new().set_accessed(SystemTime::now()))
            });
        if let Err(e) = result {
            debug!("Failed to refresh access time for {}: {}", path.display(), e);
        }
    }
}

impl CacheStore for DiskStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, BuildError> {
        let path = self.key_to_path(key);

        match fs::read(&path) {
            Ok(data) => {
                Self::touch(&path);
                Ok(Some(data))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    fn put(&self, key: &str, data: &[u8]) -> Result<(), BuildError> {
        let path = self.key_to_path(key);
        let parent = path.parent().unwrap_or(self.objects_dir.as_path());
        fs::create_dir_all(parent).map_err(|e| Self::io_error(parent, e))?;

        // Write to a temp file then rename, so readers never see a partial entry.
        // PID + thread ID keeps concurrent writers of the same key apart.
        let temp_path = parent.join(format!(
            "{}.tmp.{}.{:?}",
            key,
            std::process::id(),
            thread::current().id()
        ));

        let mut file = fs::File::create(&temp_path).map_err(|e| Self::io_error(&temp_path, e))?;
        file.write_all(data)
            .and_then(|_| file.sync_all())
            .map_err(|e| Self::io_error(&temp_path, e))?;
        fs::rename(&temp_path, &path).map_err(|e| Self::io_error(&path, e))?;

        Ok(())
    }

    fn delete(&self, key: &str) -> Result<(), BuildError> {
        let path = self.key_to_path(key);
        match fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(Self::io_error(&path, e)),
        }
    }

    fn list(&self) -> Result<Vec<StoredObject>, BuildError> {
        let mut objects = Vec::new();

        if !self.objects_dir.exists() {
            return Ok(objects);
        }

        for entry in WalkDir::new(&self.objects_dir).min_depth(1) {
            let entry = entry.map_err(|e| {
                let path = e.path().unwrap_or(self.objects_dir.as_path()).to_path_buf();
                Self::io_error(&path, e.into())
            })?;

            if !entry.file_type().is_file() {
                continue;
            }

            let file_name = entry.file_name().to_string_lossy();
            if file_name.contains(".tmp.") {
                continue;
            }

            // Rebuild the key from the shard directory + file name
            let key = match entry.path().parent() {
                Some(parent) if parent != self.objects_dir.as_path() => {
                    let prefix = parent
                        .file_name()
                        .map(|p| p.to_string_lossy().into_owned())
                        .unwrap_or_default();
                    format!("{}{}", prefix, file_name)
                }
                _ => file_name.into_owned(),
            };

            let metadata = entry
                .metadata()
                .map_err(|e| Self::io_error(entry.path(), e.into()))?;
            let created_at = metadata.modified().map(unix_seconds).unwrap_or(0);
            let accessed_at = metadata
                .accessed()
                .map(unix_seconds)
                .unwrap_or(created_at);

            objects.push(StoredObject {
                key,
                size: metadata.len(),
                accessed_at,
                created_at,
            });
        }

        objects.sort_by(|a, b| a.key.cmp(&b.key));
        Ok(objects)
    }

    fn location(&self) -> &Path {
        &self.root
    }
}

fn unix_seconds(time: SystemTime) -> i64 {
    time.duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
