//! Bounded concurrent entry store.
//!
//! A capacity-limited map from encoded key to [`CacheEntry`], backed by
//! moka's TinyLFU cache so reads and writes scale without a global lock.
//! Admission is approximate: under pressure a cold key may be rejected or an
//! entry evicted at any time, so absence always means "unknown".
//!
//! Single operations are thread-safe. There is no compare-and-swap; callers
//! that need a conditional overwrite wrap get+set in their own critical
//! section (see the resolver's write-back).

use std::sync::Arc;

use moka::sync::Cache;

use crate::entry::CacheEntry;

#[derive(Clone)]
pub struct BoundedStore {
    entries: Cache<Vec<u8>, Arc<CacheEntry>>,
}

impl BoundedStore {
    /// Create a store holding roughly `max_entries` entries. Every entry has
    /// unit weight, so capacity counts entries rather than bytes.
    pub fn new(max_entries: u64) -> Self {
        Self {
            entries: Cache::builder().max_capacity(max_entries).build(),
        }
    }

    pub fn get(&self, key: &[u8]) -> Option<Arc<CacheEntry>> {
        self.entries.get(key)
    }

    pub fn insert(&self, key: Vec<u8>, entry: CacheEntry) {
        self.entries.insert(key, Arc::new(entry));
    }

    pub fn delete(&self, key: &[u8]) {
        self.entries.invalidate(key);
    }

    /// Approximate number of live entries.
    pub fn entry_count(&self) -> u64 {
        self.entries.entry_count()
    }

    /// Apply pending admission and eviction work. Mostly useful in tests,
    /// where `entry_count` otherwise lags behind writes.
    pub fn sync(&self) {
        self.entries.run_pending_tasks();
    }
}

impl std::fmt::Debug for BoundedStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BoundedStore")
            .field("entry_count", &self.entries.entry_count())
            .finish()
    }
}
