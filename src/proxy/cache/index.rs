use std::num::NonZeroUsize;

use lru::LruCache;

use super::CacheEntry;

/// Insertion-ordered URI index with a hard entry limit.
///
/// Backed by an `LruCache` that is only ever read through `peek`/`peek_mut`, so recency never
/// changes after insertion and the "least recently used" end is always the oldest insert.
#[derive(Debug)]
pub(super) struct FifoIndex {
    entries: LruCache<String, CacheEntry>,
}

impl FifoIndex {
    pub(super) fn new(capacity: NonZeroUsize) -> Self {
        Self {
            entries: LruCache::new(capacity),
        }
    }

    pub(super) fn capacity(&self) -> usize {
        self.entries.cap().get()
    }

    pub(super) fn get(&self, uri: &str) -> Option<&CacheEntry> {
        self.entries.peek(uri)
    }

    pub(super) fn contains(&self, uri: &str) -> bool {
        self.entries.contains(uri)
    }

    pub(super) fn is_full(&self) -> bool {
        self.entries.len() >= self.capacity()
    }

    pub(super) fn len(&self) -> usize {
        self.entries.len()
    }

    pub(super) fn oldest(&self) -> Option<&CacheEntry> {
        self.entries.peek_lru().map(|(_, entry)| entry)
    }

    /// Removes and returns the earliest-inserted entry.
    pub(super) fn pop_oldest(&mut self) -> Option<(String, CacheEntry)> {
        self.entries.pop_lru()
    }

    pub(super) fn remove(&mut self, uri: &str) -> Option<CacheEntry> {
        self.entries.pop(uri)
    }

    /// Inserts or updates `uri`. An existing entry is updated in place and keeps its position.
    /// Callers evict before inserting a new key into a full index; if they do not, the displaced
    /// oldest entry is returned.
    pub(super) fn insert(&mut self, uri: String, entry: CacheEntry) -> Option<(String, CacheEntry)> {
        if let Some(existing) = self.entries.peek_mut(&uri) {
            *existing = entry;
            return None;
        }
        self.entries.push(uri, entry)
    }

    /// URIs from oldest to newest.
    pub(super) fn uris(&self) -> Vec<String> {
        self.entries.iter().rev().map(|(uri, _)| uri.clone()).collect()
    }
}
