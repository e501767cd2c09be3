//! Error types for waypoint operations

use std::time::Duration;
use thiserror::Error;

/// Errors a registry collaborator may return.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum RegistryError {
    #[error("Registry unavailable: {reason}")]
    Unavailable { reason: String },

    #[error("Registry call timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("Registry rejected request: {reason}")]
    Rejected { reason: String },
}

/// Errors returned by activation resolution.
///
/// `Clone` because a single coalesced registry call delivers the same error
/// to every waiter.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ResolveError {
    #[error("error ensuring activation of actor {entity_id} in registry: {source}")]
    Registry {
        entity_id: String,
        #[source]
        source: RegistryError,
    },

    #[error("[invariant violated] registry returned excluded server ID {server_id} in references (excluded: {excluded:?})")]
    InvariantViolated {
        server_id: String,
        excluded: Vec<String>,
    },

    #[error("context expired after {waited:?} while waiting for a registry call slot")]
    LimiterTimeout { waited: Duration },

    #[error("registry call limiter is closed")]
    LimiterClosed,

    #[error("activation resolution timed out after {after:?}")]
    Timeout { after: Duration },

    #[error("shared registry call for {key} was aborted before completing")]
    FlightAborted { key: String },

    #[error("activation cache lock poisoned")]
    LockPoisoned,
}

impl ResolveError {
    /// Failures worth retrying later: registry trouble and deadline expiry.
    pub fn is_transient(&self) -> bool {
        matches!(
            self,
            Self::Registry { .. } | Self::LimiterTimeout { .. } | Self::Timeout { .. }
        )
    }

    /// The registry returned a location the caller asked to avoid. This is a
    /// registry bug, not something to retry.
    pub fn is_invariant_violation(&self) -> bool {
        matches!(self, Self::InvariantViolated { .. })
    }
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Missing required configuration field: {field}")]
    MissingField { field: String },

    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Master error type for all waypoint errors.
#[derive(Debug, Clone, Error)]
pub enum WaypointError {
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    #[error("Resolve error: {0}")]
    Resolve(#[from] ResolveError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

/// Result type alias for activation resolution.
pub type ResolveResult<T> = Result<T, ResolveError>;

/// Result type alias for waypoint operations.
pub type WaypointResult<T> = Result<T, WaypointError>;

// =============================================================================
// TESTS
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invariant_violation_is_clearly_labeled() {
        let err = ResolveError::InvariantViolated {
            server_id: "S2".to_string(),
            excluded: vec!["S2".to_string()],
        };
        let msg = format!("{}", err);
        assert!(msg.starts_with("[invariant violated]"));
        assert!(msg.contains("S2"));
        assert!(err.is_invariant_violation());
        assert!(!err.is_transient());
    }

    #[test]
    fn test_registry_error_wraps_source() {
        let err = ResolveError::Registry {
            entity_id: "actor1".to_string(),
            source: RegistryError::Unavailable {
                reason: "connection refused".to_string(),
            },
        };
        let msg = format!("{}", err);
        assert!(msg.contains("actor1"));
        assert!(msg.contains("connection refused"));
        assert!(err.is_transient());
    }

    #[test]
    fn test_limiter_timeout_is_transient() {
        let err = ResolveError::LimiterTimeout {
            waited: Duration::from_millis(250),
        };
        assert!(err.is_transient());
        assert!(format!("{}", err).contains("250ms"));
        assert!(!ResolveError::LockPoisoned.is_transient());
    }

    #[test]
    fn test_config_error_display_invalid_value() {
        let err = ConfigError::InvalidValue {
            field: "max_concurrent_registry_calls".to_string(),
            value: "0".to_string(),
            reason: "must be greater than 0".to_string(),
        };
        let msg = format!("{}", err);
        assert!(msg.contains("max_concurrent_registry_calls"));
        assert!(msg.contains("must be greater than 0"));
    }

    #[test]
    fn test_waypoint_error_from_variants() {
        let registry = WaypointError::from(RegistryError::Rejected {
            reason: "bad namespace".to_string(),
        });
        assert!(matches!(registry, WaypointError::Registry(_)));

        let resolve = WaypointError::from(ResolveError::LimiterClosed);
        assert!(matches!(resolve, WaypointError::Resolve(_)));

        let config = WaypointError::from(ConfigError::MissingField {
            field: "registry".to_string(),
        });
        assert!(matches!(config, WaypointError::Config(_)));
    }
}
