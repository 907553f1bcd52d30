//! Bounded response cache keyed by request URI.
//!
//! The URI index and its insertion order sit behind one async mutex. Every operation that
//! touches both the index and the backing store holds that lock for its whole duration, so
//! an index entry never exists without its blob (and a blob is never deleted while a writer
//! for the same key is running).

use std::num::NonZeroUsize;
use std::sync::Arc;

use anyhow::{Context, Result};
use bytes::Bytes;
use tokio::sync::Mutex;
use tracing::{debug, warn};

mod index;
mod key;
mod maintenance;
mod store;

use index::FifoIndex;
pub use key::CacheKey;
pub use store::{BlobStore, DiskStore, MemoryStore};

use crate::settings::{CacheStorage, Settings};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub uri: String,
    pub key: CacheKey,
    /// Byte length of the stored response.
    pub len: u64,
}

impl CacheEntry {
    /// Odd-length entries stand in for "unchanged since last fetch" and are answered with 304.
    pub fn is_odd_length(&self) -> bool {
        self.len % 2 == 1
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreOutcome {
    pub entry: CacheEntry,
    /// The oldest entry, removed to make room.
    pub evicted: Option<CacheEntry>,
    /// True when `entry` overwrote an existing entry for the same URI.
    pub replaced: bool,
}

#[derive(Debug)]
pub struct ResponseCache {
    index: Mutex<FifoIndex>,
    store: Arc<dyn BlobStore>,
}

impl ResponseCache {
    pub fn new(capacity: NonZeroUsize, store: Arc<dyn BlobStore>) -> Self {
        Self {
            index: Mutex::new(FifoIndex::new(capacity)),
            store,
        }
    }

    pub async fn from_settings(settings: &Settings) -> Result<Self> {
        let capacity = settings.cache_capacity()?;
        let store: Arc<dyn BlobStore> = match settings.cache_storage {
            CacheStorage::Disk => Arc::new(
                DiskStore::open(settings.cache_dir.clone(), settings.cache_purge_on_start).await?,
            ),
            CacheStorage::Memory => Arc::new(MemoryStore::new()),
        };
        crate::metrics::set_cache_entries(0);
        Ok(Self::new(capacity, store))
    }

    pub async fn capacity(&self) -> usize {
        self.index.lock().await.capacity()
    }

    pub async fn len(&self) -> usize {
        self.index.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Cached URIs, oldest first.
    pub async fn keys(&self) -> Vec<String> {
        self.index.lock().await.uris()
    }

    pub async fn lookup(&self, uri: &str) -> Option<CacheEntry> {
        let entry = self.index.lock().await.get(uri).cloned();
        crate::metrics::record_cache_lookup(entry.is_some());
        entry
    }

    /// Returns the entry for `uri` with its stored bytes.
    ///
    /// An index entry whose blob has gone missing is dropped and reported as a miss.
    pub async fn read(&self, uri: &str) -> Result<Option<(CacheEntry, Bytes)>> {
        let mut index = self.index.lock().await;
        let Some(entry) = index.get(uri).cloned() else {
            return Ok(None);
        };
        match self.store.get(&entry.key).await? {
            Some(data) => Ok(Some((entry, data))),
            None => {
                warn!(uri, key = %entry.key, "cached blob missing from storage");
                index.remove(uri);
                crate::metrics::set_cache_entries(index.len());
                Ok(None)
            }
        }
    }

    /// Stores `data` for `uri`, evicting the oldest entry first if a new URI would overflow the
    /// cache. On error the index still matches the blobs on storage; an eviction that already
    /// happened stays done.
    pub async fn insert(&self, uri: &str, data: Bytes) -> Result<StoreOutcome> {
        let mut index = self.index.lock().await;
        let replaced = index.contains(uri);
        let evicted = if !replaced && index.is_full() {
            self.evict_locked(&mut index).await?
        } else {
            None
        };

        let key = CacheKey::for_uri(uri);
        if let Err(err) = self.store.put(&key, &data).await {
            crate::metrics::set_cache_entries(index.len());
            return Err(err);
        }

        let entry = CacheEntry {
            uri: uri.to_string(),
            key,
            len: data.len() as u64,
        };
        if let Some((displaced, _)) = index.insert(uri.to_string(), entry.clone()) {
            warn!(uri = %displaced, "cache index displaced an entry without eviction");
        }
        crate::metrics::record_cache_store();
        crate::metrics::set_cache_entries(index.len());
        debug!(uri, len = entry.len, replaced, "cached upstream response");

        Ok(StoreOutcome {
            entry,
            evicted,
            replaced,
        })
    }

    /// Removes the earliest-inserted entry and its blob.
    pub async fn evict_oldest(&self) -> Result<Option<CacheEntry>> {
        let mut index = self.index.lock().await;
        let evicted = self.evict_locked(&mut index).await?;
        crate::metrics::set_cache_entries(index.len());
        Ok(evicted)
    }

    /// The blob goes first; if it cannot be deleted the entry stays indexed.
    async fn evict_locked(&self, index: &mut FifoIndex) -> Result<Option<CacheEntry>> {
        let Some(victim) = index.oldest() else {
            return Ok(None);
        };
        self.store
            .remove(&victim.key)
            .await
            .with_context(|| format!("failed to evict cached {}", victim.uri))?;

        let Some((uri, victim)) = index.pop_oldest() else {
            return Ok(None);
        };
        crate::metrics::record_cache_eviction();
        debug!(uri = %uri, "evicted oldest cache entry");
        Ok(Some(victim))
    }

    pub fn store(&self) -> &Arc<dyn BlobStore> {
        &self.store
    }
}
