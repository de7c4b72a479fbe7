use std::path::{Path, PathBuf};

use async_trait::async_trait;
use directories::ProjectDirs;
use tokio::fs;
use tracing::{debug, instrument};

use super::CacheStore;
use crate::cache_key::CacheKey;
use crate::error::{SyncError, SyncResult};

const KEY_SEPARATOR_ON_DISK: &str = "__";

/// File system implementation of [`CacheStore`].
///
/// Stores one JSON document per key:
/// ```text
/// base_path/
/// ├── snapshot-count__1f0c…e2.json
/// └── burndown__9ab4…07.json
/// ```
#[derive(Debug, Clone)]
pub struct FileSystemCacheStore {
    base_path: PathBuf,
}

impl FileSystemCacheStore {
    /// Creates a store rooted at `base_path`, creating the directory if needed.
    pub fn new<P: AsRef<Path>>(base_path: P) -> SyncResult<Self> {
        let base_path = base_path.as_ref().to_path_buf();

        std::fs::create_dir_all(&base_path)
            .map_err(|e| SyncError::store(format!("Failed to create state directory: {e}")))?;

        Ok(Self { base_path })
    }

    /// Creates a store in the platform cache directory
    /// (e.g. `~/.cache/snapsync/state` on Linux).
    pub fn in_default_location() -> SyncResult<Self> {
        Self::new(Self::default_base_path()?)
    }

    /// Returns the default platform-specific base path.
    pub fn default_base_path() -> SyncResult<PathBuf> {
        ProjectDirs::from("dev", "snapsync", "snapsync")
            .map(|dirs| dirs.cache_dir().join("state"))
            .ok_or_else(|| SyncError::configuration("Could not determine cache directory"))
    }

    /// Directory the entries live in.
    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn entry_path(&self, key: &CacheKey) -> PathBuf {
        let file_stem = key.as_str().replace(':', KEY_SEPARATOR_ON_DISK);
        self.base_path.join(format!("{file_stem}.json"))
    }
}

#[async_trait]
impl CacheStore for FileSystemCacheStore {
    #[instrument(skip(self), fields(key = %key))]
    async fn get(&self, key: &CacheKey) -> SyncResult<Option<Vec<u8>>> {
        let path = self.entry_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                debug!(bytes = bytes.len(), "Loaded cached state");
                Ok(Some(bytes))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No cached state found");
                Ok(None)
            }
            Err(e) => Err(SyncError::store(format!("Failed to read state file: {e}"))),
        }
    }

    #[instrument(skip(self, state), fields(key = %key, bytes = state.len()))]
    async fn set(&self, key: &CacheKey, state: Vec<u8>) -> SyncResult<()> {
        let path = self.entry_path(key);
        let tmp_path = path.with_extension("json.tmp");

        fs::write(&tmp_path, state)
            .await
            .map_err(|e| SyncError::store(format!("Failed to write state file: {e}")))?;
        fs::rename(&tmp_path, &path)
            .await
            .map_err(|e| SyncError::store(format!("Failed to replace state file: {e}")))?;

        debug!("Saved cached state");
        Ok(())
    }

    #[instrument(skip(self), fields(key = %key))]
    async fn remove(&self, key: &CacheKey) -> SyncResult<()> {
        match fs::remove_file(self.entry_path(key)).await {
            Ok(()) => {
                debug!("Removed cached state");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SyncError::store(format!("Failed to remove state file: {e}"))),
        }
    }

    #[instrument(skip(self))]
    async fn keys(&self) -> SyncResult<Vec<CacheKey>> {
        let mut keys = Vec::new();

        let mut entries = fs::read_dir(&self.base_path)
            .await
            .map_err(|e| SyncError::store(format!("Failed to read state directory: {e}")))?;

        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| SyncError::store(format!("Failed to read directory entry: {e}")))?
        {
            let path = entry.path();
            if path.extension().and_then(|s| s.to_str()) != Some("json") {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                keys.push(CacheKey::from_raw(
                    stem.replacen(KEY_SEPARATOR_ON_DISK, ":", 1),
                ));
            }
        }

        keys.sort();
        Ok(keys)
    }
}
