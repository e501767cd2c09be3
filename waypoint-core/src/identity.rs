//! Entity identity and instance reference types.

use serde::{Deserialize, Serialize};
use std::fmt;

/// Immutable `(namespace, module_id, entity_id)` triple naming one actor.
///
/// This is the logical cache key before encoding.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct EntityIdentity {
    namespace: String,
    module_id: String,
    entity_id: String,
}

impl EntityIdentity {
    pub fn new(
        namespace: impl Into<String>,
        module_id: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            namespace: namespace.into(),
            module_id: module_id.into(),
            entity_id: entity_id.into(),
        }
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn module_id(&self) -> &str {
        &self.module_id
    }

    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }
}

impl fmt::Display for EntityIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.namespace, self.module_id, self.entity_id)
    }
}

/// Handle to one live execution location of an entity.
///
/// Produced by a [`Registry`](crate::Registry); the cache only stores and
/// returns these, it never constructs them.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InstanceReference {
    identity: EntityIdentity,
    server_id: String,
    server_version: i64,
    address: String,
}

impl InstanceReference {
    pub fn new(
        identity: EntityIdentity,
        server_id: impl Into<String>,
        server_version: i64,
        address: impl Into<String>,
    ) -> Self {
        Self {
            identity,
            server_id: server_id.into(),
            server_version,
            address: address.into(),
        }
    }

    /// The entity this activation belongs to.
    pub fn identity(&self) -> &EntityIdentity {
        &self.identity
    }

    /// Identifier of the server hosting this activation.
    pub fn server_id(&self) -> &str {
        &self.server_id
    }

    /// Version of the hosting server process, as reported by the registry.
    pub fn server_version(&self) -> i64 {
        self.server_version
    }

    /// Network address at which the activation can be reached.
    pub fn address(&self) -> &str {
        &self.address
    }
}
