use std::collections::HashMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use bytes::Bytes;
use parking_lot::Mutex;
use tokio::fs as async_fs;
use tokio::io::AsyncWriteExt;

use super::CacheKey;
use super::maintenance::{TEMP_PREFIX, purge_orphans};

/// Backing storage for cached response bytes.
///
/// Implementations need not be synchronised per key: the cache calls them only while holding
/// its index lock.
#[async_trait]
pub trait BlobStore: Send + Sync + std::fmt::Debug {
    async fn put(&self, key: &CacheKey, data: &[u8]) -> Result<()>;

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>>;

    /// Removing a missing key is not an error.
    async fn remove(&self, key: &CacheKey) -> Result<()>;

    async fn contains(&self, key: &CacheKey) -> Result<bool>;
}

/// One file per key inside a single directory.
#[derive(Debug, Clone)]
pub struct DiskStore {
    dir: PathBuf,
}

impl DiskStore {
    /// Creates `dir` if needed. With `purge` set, files left behind by an earlier process are
    /// deleted, since nothing maps to them any more.
    pub async fn open(dir: impl Into<PathBuf>, purge: bool) -> Result<Self> {
        let dir = dir.into();
        async_fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("failed to create cache dir {}", dir.display()))?;
        if purge {
            let removed = purge_orphans(&dir).await?;
            if removed > 0 {
                tracing::info!(removed, dir = %dir.display(), "purged orphaned cache files");
            }
            crate::metrics::record_cache_purged(removed);
        }
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, key: &CacheKey) -> PathBuf {
        self.dir.join(key.as_str())
    }

    fn temp_path(&self) -> PathBuf {
        self.dir
            .join(format!("{TEMP_PREFIX}{}", uuid::Uuid::new_v4()))
    }
}

#[async_trait]
impl BlobStore for DiskStore {
    async fn put(&self, key: &CacheKey, data: &[u8]) -> Result<()> {
        let temp_path = self.temp_path();
        let final_path = self.path_for(key);

        let mut options = async_fs::OpenOptions::new();
        options.create(true).truncate(true).write(true);
        #[cfg(unix)]
        {
            options.mode(0o600);
        }
        let write = async {
            let mut file = options.open(&temp_path).await?;
            file.write_all(data).await?;
            file.flush().await?;
            async_fs::rename(&temp_path, &final_path).await
        };
        if let Err(err) = write.await {
            async_fs::remove_file(&temp_path).await.ok();
            return Err(err)
                .with_context(|| format!("failed to write cache file {}", final_path.display()));
        }
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        let path = self.path_for(key);
        match async_fs::read(&path).await {
            Ok(data) => Ok(Some(Bytes::from(data))),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => {
                Err(err).with_context(|| format!("failed to read cache file {}", path.display()))
            }
        }
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        let path = self.path_for(key);
        match async_fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(()),
            Err(err) => {
                Err(err).with_context(|| format!("failed to remove cache file {}", path.display()))
            }
        }
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(async_fs::try_exists(self.path_for(key)).await?)
    }
}

/// Keeps blobs in process memory; nothing survives a restart.
#[derive(Debug, Default)]
pub struct MemoryStore {
    blobs: Mutex<HashMap<CacheKey, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.blobs.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.blobs.lock().is_empty()
    }
}

#[async_trait]
impl BlobStore for MemoryStore {
    async fn put(&self, key: &CacheKey, data: &[u8]) -> Result<()> {
        self.blobs
            .lock()
            .insert(key.clone(), Bytes::copy_from_slice(data));
        Ok(())
    }

    async fn get(&self, key: &CacheKey) -> Result<Option<Bytes>> {
        Ok(self.blobs.lock().get(key).cloned())
    }

    async fn remove(&self, key: &CacheKey) -> Result<()> {
        self.blobs.lock().remove(key);
        Ok(())
    }

    async fn contains(&self, key: &CacheKey) -> Result<bool> {
        Ok(self.blobs.lock().contains_key(key))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn disk_store_round_trip_and_remove() -> Result<()> {
        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path(), false).await?;
        let key = CacheKey::for_uri("/200");

        store.put(&key, b"HTTP/1.1 200 OK\r\n\r\n").await?;
        assert_eq!(store.path_for(&key), dir.path().join("_200"));
        assert!(store.contains(&key).await?);
        assert_eq!(
            store.get(&key).await?.as_deref(),
            Some(&b"HTTP/1.1 200 OK\r\n\r\n"[..])
        );

        store.remove(&key).await?;
        assert!(!store.contains(&key).await?);
        assert!(store.get(&key).await?.is_none());
        // second remove is a no-op
        store.remove(&key).await?;
        Ok(())
    }

    #[tokio::test]
    async fn disk_store_overwrites_in_place() -> Result<()> {
        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path(), false).await?;
        let key = CacheKey::for_uri("/300");

        store.put(&key, b"first").await?;
        store.put(&key, b"second").await?;
        assert_eq!(store.get(&key).await?.as_deref(), Some(&b"second"[..]));

        let leftovers: Vec<_> = std::fs::read_dir(dir.path())?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.file_name().to_string_lossy().to_string())
            .collect();
        assert_eq!(leftovers, vec!["_300".to_string()]);
        Ok(())
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn disk_store_files_use_restrictive_permissions() -> Result<()> {
        use std::os::unix::fs::PermissionsExt;

        let dir = TempDir::new()?;
        let store = DiskStore::open(dir.path(), false).await?;
        let key = CacheKey::for_uri("/perm");
        store.put(&key, b"payload").await?;

        let mode = std::fs::metadata(store.path_for(&key))?.permissions().mode() & 0o777;
        assert_eq!(mode, 0o600);
        Ok(())
    }

    #[tokio::test]
    async fn memory_store_round_trip() -> Result<()> {
        let store = MemoryStore::new();
        let key = CacheKey::for_uri("/1");
        assert!(store.is_empty());

        store.put(&key, b"abc").await?;
        assert_eq!(store.len(), 1);
        assert_eq!(store.get(&key).await?.as_deref(), Some(&b"abc"[..]));

        store.remove(&key).await?;
        assert!(!store.contains(&key).await?);
        Ok(())
    }
}
