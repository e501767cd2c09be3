//! Cached activation entries.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use waypoint_core::{InstanceReference, VersionStamp};

/// Activation locations cached for one entity.
///
/// Invariant: no element of `references` is hosted on a server listed in
/// `excluded_server_ids`. The resolver checks this before every write.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub references: Vec<InstanceReference>,
    /// Last successful fill, or last failed refresh attempt (backoff).
    /// Monotonic, so clock steps never move staleness.
    pub cached_at: Instant,
    /// Wall-clock time of the fill that produced `references`. Diagnostic
    /// only; a backoff touch leaves it alone.
    pub filled_at: DateTime<Utc>,
    pub version_stamp: VersionStamp,
    /// Exclusion set of the request that produced this entry.
    pub excluded_server_ids: Vec<String>,
}

impl CacheEntry {
    pub fn new(
        references: Vec<InstanceReference>,
        version_stamp: VersionStamp,
        excluded_server_ids: Vec<String>,
    ) -> Self {
        Self {
            references,
            cached_at: Instant::now(),
            filled_at: Utc::now(),
            version_stamp,
            excluded_server_ids,
        }
    }

    /// How long ago this entry was filled (or touched).
    pub fn staleness(&self) -> Duration {
        self.cached_at.elapsed()
    }

    /// Copy of this entry with `cached_at` reset to now. References, version
    /// stamp and `filled_at` are untouched.
    pub fn touched(&self) -> Self {
        Self {
            cached_at: Instant::now(),
            ..self.clone()
        }
    }

    /// Whether this entry can answer a request for `1 + extra_replicas`
    /// activations that avoids `excluded_server_ids`.
    ///
    /// An entry filled without accounting for one of the requested
    /// exclusions is not served, even if its references look safe, since it
    /// may predate the reason for the exclusion.
    pub fn satisfies(&self, extra_replicas: u64, excluded_server_ids: &[String]) -> bool {
        let enough = (self.references.len() as u64) >= extra_replicas.saturating_add(1);
        enough
            && excluded_server_ids
                .iter()
                .all(|id| self.excluded_server_ids.contains(id))
    }
}
