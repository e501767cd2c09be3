//! Resolver counters.

use std::sync::atomic::{AtomicU64, Ordering};

/// Snapshot of resolver activity since construction.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ResolverStats {
    /// Lookups answered from the cache.
    pub hits: u64,
    /// Lookups that had to go through the fill path.
    pub misses: u64,
    /// Background refreshes scheduled by stale hits.
    pub stale_refreshes: u64,
    /// Outbound registry calls actually made.
    pub registry_calls: u64,
    /// Registry calls that failed or timed out.
    pub registry_failures: u64,
    /// Fills that joined another caller's in-flight registry call.
    pub coalesced_waits: u64,
    /// Registry responses rejected for containing an excluded server.
    pub invariant_violations: u64,
    /// Approximate number of cached entities.
    pub entry_count: u64,
}

impl ResolverStats {
    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

#[derive(Debug, Default)]
pub(crate) struct StatsRecorder {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stale_refreshes: AtomicU64,
    pub registry_calls: AtomicU64,
    pub registry_failures: AtomicU64,
    pub coalesced_waits: AtomicU64,
    pub invariant_violations: AtomicU64,
}

impl StatsRecorder {
    pub fn incr(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self, entry_count: u64) -> ResolverStats {
        ResolverStats {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stale_refreshes: self.stale_refreshes.load(Ordering::Relaxed),
            registry_calls: self.registry_calls.load(Ordering::Relaxed),
            registry_failures: self.registry_failures.load(Ordering::Relaxed),
            coalesced_waits: self.coalesced_waits.load(Ordering::Relaxed),
            invariant_violations: self.invariant_violations.load(Ordering::Relaxed),
            entry_count,
        }
    }
}
