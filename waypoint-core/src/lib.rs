//! Waypoint Core - Entity Types
//!
//! Pure data structures and collaborator seams shared by the activation
//! cache and its tests. This crate contains no caching policy.

pub mod config;
pub mod error;
pub mod identity;
pub mod registry;

pub use config::ResolverConfig;
pub use error::{
    ConfigError, RegistryError, ResolveError, ResolveResult, WaypointError, WaypointResult,
};
pub use identity::{EntityIdentity, InstanceReference};
pub use registry::{EnsureActivationRequest, EnsureActivationResponse, Registry};

/// Registry-supplied ordering marker for concurrent cache writes.
pub type VersionStamp = i64;
