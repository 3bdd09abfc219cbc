//! In-memory cache with per-entry expiry
//!
//! Entries live in a sharded concurrent map so lookups and writes on
//! different keys do not contend. An entry past its deadline is invisible
//! to readers and is dropped on the first access that observes it.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use kubemeta_common::{CacheKey, MetadataMapperBundle};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;

/// Per-node bundles keyed by `CacheKey::metadata_mapping(node)`
pub type MetadataCache = TtlCache<Arc<MetadataMapperBundle>>;

#[derive(Debug, Clone)]
struct CacheEntry<V> {
    value: V,
    expires_at: Instant,
    generation: u64,
}

impl<V> CacheEntry<V> {
    fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }
}

/// Thread-safe cache whose entries expire a fixed duration after being set
#[derive(Clone)]
pub struct TtlCache<V> {
    inner: Arc<DashMap<String, CacheEntry<V>>>,
}

impl<V: Clone> TtlCache<V> {
    pub fn new() -> Self {
        Self {
            inner: Arc::new(DashMap::new()),
        }
    }

    /// Look up a live entry
    pub fn get(&self, key: &CacheKey) -> Option<V> {
        let key = key.to_string();
        let now = Instant::now();

        let expired = match self.inner.get(&key) {
            Some(entry) if !entry.is_expired(now) => return Some(entry.value.clone()),
            Some(_) => true,
            None => false,
        };

        // the read guard is released above; removing while holding it deadlocks
        if expired {
            self.inner.remove_if(&key, |_, entry| entry.is_expired(now));
        }
        None
    }

    /// Store `value` under `key` for `ttl` from now, replacing any previous
    /// entry. Returns the entry's generation, starting at 1 and bumped by
    /// every write to the same key.
    pub fn set(&self, key: &CacheKey, value: V, ttl: Duration) -> u64 {
        let expires_at = Instant::now() + ttl;
        match self.inner.entry(key.to_string()) {
            Entry::Occupied(mut occupied) => {
                let generation = occupied.get().generation + 1;
                occupied.insert(CacheEntry {
                    value,
                    expires_at,
                    generation,
                });
                generation
            }
            Entry::Vacant(vacant) => {
                vacant.insert(CacheEntry {
                    value,
                    expires_at,
                    generation: 1,
                });
                1
            }
        }
    }

    /// Generation of the live entry under `key`
    pub fn generation(&self, key: &CacheKey) -> Option<u64> {
        let now = Instant::now();
        self.inner
            .get(&key.to_string())
            .filter(|entry| !entry.is_expired(now))
            .map(|entry| entry.generation)
    }

    /// Drop every expired entry, returning how many were removed
    pub fn purge_expired(&self) -> usize {
        let now = Instant::now();
        let before = self.inner.len();
        self.inner.retain(|_, entry| !entry.is_expired(now));
        before.saturating_sub(self.inner.len())
    }

    /// Number of stored entries, including expired ones not yet purged
    pub fn len(&self) -> usize {
        self.inner.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.is_empty()
    }
}

impl<V: Clone> Default for TtlCache<V> {
    fn default() -> Self {
        Self::new()
    }
}
