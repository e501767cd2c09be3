//! Waypoint activation cache.
//!
//! Resolves where an actor currently has live activations by asking an
//! authoritative but expensive registry, and caches the answer.
//!
//! # Design
//!
//! The cache never hides the registry's authority; it only bounds how often
//! and how hard the registry is asked:
//!
//! - concurrent lookups for the same actor and exclusion set share one
//!   registry call ([`RequestCoalescer`]),
//! - outbound calls are capped process-wide ([`ConcurrencyLimiter`]),
//! - stale hits are served immediately and refreshed in the background, so
//!   registry outages do not take down already-resolved actors,
//! - concurrent writes to one entry are ordered by the registry's version
//!   stamp, and an answer containing an excluded server is never returned.
//!
//! # Example
//!
//! ```ignore
//! let resolver = ActivationResolver::new(registry, ResolverConfig::from_env())?;
//!
//! let identity = EntityIdentity::new("ns1", "mod1", "actor1");
//! let references = resolver.resolve(&identity, 0, &[]).await?;
//!
//! // Route around a server that is shedding load.
//! let references = resolver
//!     .resolve(&identity, 0, &["server-2".to_string()])
//!     .await?;
//! ```

pub mod coalescer;
pub mod entry;
pub mod key;
pub mod limiter;
pub mod resolver;
pub mod stats;
pub mod store;

pub use coalescer::{FlightAborted, RequestCoalescer};
pub use entry::CacheEntry;
pub use key::{dedupe_key, encode_key, encode_key_into, KeyBufferPool, PooledBuffer};
pub use limiter::{ConcurrencyLimiter, LimiterPermit};
pub use resolver::{ActivationResolver, ActivationResolverBuilder};
pub use stats::ResolverStats;
pub use store::BoundedStore;

// Re-export core types used in the public API.
pub use waypoint_core::{
    ConfigError, EnsureActivationRequest, EnsureActivationResponse, EntityIdentity,
    InstanceReference, Registry, RegistryError, ResolveError, ResolveResult, ResolverConfig,
};
