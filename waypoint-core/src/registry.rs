//! Registry collaborator seam.
//!
//! The registry is the authoritative directory mapping entities to their
//! live activations. It is expensive and fallible; the activation cache sits
//! in front of it and is the only intended caller.

use async_trait::async_trait;

use crate::error::RegistryError;
use crate::identity::{EntityIdentity, InstanceReference};
use crate::VersionStamp;

/// Request to ensure an entity has at least `1 + extra_replicas` activations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureActivationRequest {
    pub identity: EntityIdentity,
    pub extra_replicas: u64,
    /// Servers that must not appear in the response.
    pub excluded_server_ids: Vec<String>,
    /// Servers the caller already knows about, as a hint for the registry.
    pub cached_activation_server_ids: Vec<String>,
}

/// Registry answer for an [`EnsureActivationRequest`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnsureActivationResponse {
    pub references: Vec<InstanceReference>,
    /// Monotonic-intent marker used to order concurrent cache writes.
    /// Registries that cannot provide one may return a constant.
    pub version_stamp: VersionStamp,
}

/// Authoritative directory service for actor activations.
///
/// Implementations must be thread-safe; the cache calls them from many tasks
/// concurrently (bounded by its concurrency limiter).
#[async_trait]
pub trait Registry: Send + Sync + 'static {
    /// Ensure the entity is activated and return where it lives.
    async fn ensure_activation(
        &self,
        request: EnsureActivationRequest,
    ) -> Result<EnsureActivationResponse, RegistryError>;
}
