//! Resolver configuration.
//!
//! Configuration is a plain struct with sensible defaults, chainable setters
//! and an environment loader. Nothing here reads files.

use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::ConfigError;

/// Registry calls allowed in flight per available CPU.
const REGISTRY_CALLS_PER_CPU: usize = 16;

/// Approximate upper bound on cached entities.
pub const DEFAULT_MAX_CACHE_ENTRIES: u64 = 1_000_000;

/// Configuration for the activation resolver.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResolverConfig {
    /// Age after which a cache hit also schedules a background refresh.
    pub ideal_cache_staleness: Duration,
    /// Bypass the cache entirely and always ask the registry.
    pub disable_cache: bool,
    /// Process-wide cap on in-flight registry calls.
    pub max_concurrent_registry_calls: usize,
    /// Budget for limiter admission plus the outbound registry call.
    pub registry_call_timeout: Duration,
    /// Budget for the whole synchronous `resolve` path.
    pub resolve_timeout: Duration,
    /// Budget for a detached background refresh.
    pub refresh_timeout: Duration,
    /// Upper bound of random extra staleness before a refresh is scheduled.
    /// Zero disables jitter.
    pub refresh_jitter: Duration,
    /// Approximate capacity of the bounded store, in entries.
    pub max_cache_entries: u64,
}

impl Default for ResolverConfig {
    fn default() -> Self {
        Self {
            ideal_cache_staleness: Duration::from_secs(1),
            disable_cache: false,
            max_concurrent_registry_calls: default_max_concurrent_registry_calls(),
            registry_call_timeout: Duration::from_secs(5),
            resolve_timeout: Duration::from_secs(5),
            refresh_timeout: Duration::from_secs(5),
            refresh_jitter: Duration::ZERO,
            max_cache_entries: DEFAULT_MAX_CACHE_ENTRIES,
        }
    }
}

fn default_max_concurrent_registry_calls() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * REGISTRY_CALLS_PER_CPU
}

impl ResolverConfig {
    /// Create a new config with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create ResolverConfig from environment variables.
    ///
    /// Environment variables (durations in milliseconds):
    /// - `WAYPOINT_IDEAL_CACHE_STALENESS_MS` (default: 1000)
    /// - `WAYPOINT_DISABLE_CACHE`: "true" or "false" (default: false)
    /// - `WAYPOINT_MAX_CONCURRENT_REGISTRY_CALLS` (default: 16 per CPU)
    /// - `WAYPOINT_REGISTRY_CALL_TIMEOUT_MS` (default: 5000)
    /// - `WAYPOINT_RESOLVE_TIMEOUT_MS` (default: 5000)
    /// - `WAYPOINT_REFRESH_TIMEOUT_MS` (default: 5000)
    /// - `WAYPOINT_REFRESH_JITTER_MS` (default: 0)
    /// - `WAYPOINT_MAX_CACHE_ENTRIES` (default: 1000000)
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let millis = |name: &str, fallback: Duration| {
            lookup(name)
                .and_then(|s| s.trim().parse::<u64>().ok())
                .map(Duration::from_millis)
                .unwrap_or(fallback)
        };

        Self {
            ideal_cache_staleness: millis(
                "WAYPOINT_IDEAL_CACHE_STALENESS_MS",
                defaults.ideal_cache_staleness,
            ),
            disable_cache: lookup("WAYPOINT_DISABLE_CACHE")
                .map(|s| matches!(s.trim().to_lowercase().as_str(), "true" | "1"))
                .unwrap_or(defaults.disable_cache),
            max_concurrent_registry_calls: lookup("WAYPOINT_MAX_CONCURRENT_REGISTRY_CALLS")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_concurrent_registry_calls),
            registry_call_timeout: millis(
                "WAYPOINT_REGISTRY_CALL_TIMEOUT_MS",
                defaults.registry_call_timeout,
            ),
            resolve_timeout: millis("WAYPOINT_RESOLVE_TIMEOUT_MS", defaults.resolve_timeout),
            refresh_timeout: millis("WAYPOINT_REFRESH_TIMEOUT_MS", defaults.refresh_timeout),
            refresh_jitter: millis("WAYPOINT_REFRESH_JITTER_MS", defaults.refresh_jitter),
            max_cache_entries: lookup("WAYPOINT_MAX_CACHE_ENTRIES")
                .and_then(|s| s.trim().parse().ok())
                .unwrap_or(defaults.max_cache_entries),
        }
    }

    /// Set the ideal cache staleness.
    pub fn with_ideal_staleness(mut self, staleness: Duration) -> Self {
        self.ideal_cache_staleness = staleness;
        self
    }

    /// Enable or disable the cache.
    pub fn with_cache_disabled(mut self, disabled: bool) -> Self {
        self.disable_cache = disabled;
        self
    }

    /// Set the in-flight registry call cap.
    pub fn with_max_concurrent_registry_calls(mut self, max: usize) -> Self {
        self.max_concurrent_registry_calls = max;
        self
    }

    /// Set the registry call timeout.
    pub fn with_registry_call_timeout(mut self, timeout: Duration) -> Self {
        self.registry_call_timeout = timeout;
        self
    }

    /// Set the synchronous resolve timeout.
    pub fn with_resolve_timeout(mut self, timeout: Duration) -> Self {
        self.resolve_timeout = timeout;
        self
    }

    /// Set the background refresh timeout.
    pub fn with_refresh_timeout(mut self, timeout: Duration) -> Self {
        self.refresh_timeout = timeout;
        self
    }

    /// Set the refresh jitter bound.
    pub fn with_refresh_jitter(mut self, jitter: Duration) -> Self {
        self.refresh_jitter = jitter;
        self
    }

    /// Set the store capacity.
    pub fn with_max_cache_entries(mut self, max: u64) -> Self {
        self.max_cache_entries = max;
        self
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_concurrent_registry_calls == 0 {
            return Err(invalid(
                "max_concurrent_registry_calls",
                self.max_concurrent_registry_calls,
                "max_concurrent_registry_calls must be greater than 0",
            ));
        }

        // The limiter hands out u32 permits.
        if u32::try_from(self.max_concurrent_registry_calls).is_err() {
            return Err(invalid(
                "max_concurrent_registry_calls",
                self.max_concurrent_registry_calls,
                "max_concurrent_registry_calls must fit in 32 bits",
            ));
        }

        for (field, value) in [
            ("registry_call_timeout", self.registry_call_timeout),
            ("resolve_timeout", self.resolve_timeout),
            ("refresh_timeout", self.refresh_timeout),
        ] {
            if value.is_zero() {
                return Err(invalid(
                    field,
                    format!("{:?}", value),
                    format!("{} must be positive", field),
                ));
            }
        }

        if !self.disable_cache && self.max_cache_entries == 0 {
            return Err(invalid(
                "max_cache_entries",
                self.max_cache_entries,
                "max_cache_entries must be greater than 0 when caching is enabled",
            ));
        }

        Ok(())
    }
}

fn invalid(field: &str, value: impl ToString, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidValue {
        field: field.to_string(),
        value: value.to_string(),
        reason: reason.into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults_are_valid() {
        let config = ResolverConfig::default();
        assert!(config.validate().is_ok());
        assert!(!config.disable_cache);
        assert_eq!(config.max_cache_entries, DEFAULT_MAX_CACHE_ENTRIES);
        assert_eq!(config.max_concurrent_registry_calls % REGISTRY_CALLS_PER_CPU, 0);
        assert!(config.max_concurrent_registry_calls >= REGISTRY_CALLS_PER_CPU);
    }

    #[test]
    fn test_builder_setters() {
        let config = ResolverConfig::new()
            .with_ideal_staleness(Duration::from_millis(250))
            .with_cache_disabled(true)
            .with_max_concurrent_registry_calls(4)
            .with_registry_call_timeout(Duration::from_secs(2))
            .with_resolve_timeout(Duration::from_secs(3))
            .with_refresh_timeout(Duration::from_secs(4))
            .with_refresh_jitter(Duration::from_millis(10))
            .with_max_cache_entries(500);

        assert_eq!(config.ideal_cache_staleness, Duration::from_millis(250));
        assert!(config.disable_cache);
        assert_eq!(config.max_concurrent_registry_calls, 4);
        assert_eq!(config.registry_call_timeout, Duration::from_secs(2));
        assert_eq!(config.resolve_timeout, Duration::from_secs(3));
        assert_eq!(config.refresh_timeout, Duration::from_secs(4));
        assert_eq!(config.refresh_jitter, Duration::from_millis(10));
        assert_eq!(config.max_cache_entries, 500);
    }

    #[test]
    fn test_validate_rejects_zero_limiter() {
        let err = ResolverConfig::new()
            .with_max_concurrent_registry_calls(0)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "max_concurrent_registry_calls"
        ));
    }

    #[test]
    fn test_validate_rejects_zero_timeout() {
        let err = ResolverConfig::new()
            .with_resolve_timeout(Duration::ZERO)
            .validate()
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::InvalidValue { ref field, .. } if field == "resolve_timeout"
        ));
    }

    #[test]
    fn test_zero_capacity_allowed_only_when_disabled() {
        let enabled = ResolverConfig::new().with_max_cache_entries(0);
        assert!(enabled.validate().is_err());

        let disabled = enabled.with_cache_disabled(true);
        assert!(disabled.validate().is_ok());
    }

    #[test]
    fn test_from_lookup_parses_and_falls_back() {
        let vars: HashMap<&str, &str> = [
            ("WAYPOINT_IDEAL_CACHE_STALENESS_MS", "750"),
            ("WAYPOINT_DISABLE_CACHE", "TRUE"),
            ("WAYPOINT_MAX_CONCURRENT_REGISTRY_CALLS", "32"),
            ("WAYPOINT_REGISTRY_CALL_TIMEOUT_MS", "not-a-number"),
            ("WAYPOINT_MAX_CACHE_ENTRIES", "1000"),
        ]
        .into_iter()
        .collect();

        let config = ResolverConfig::from_lookup(|name| vars.get(name).map(|v| v.to_string()));

        assert_eq!(config.ideal_cache_staleness, Duration::from_millis(750));
        assert!(config.disable_cache);
        assert_eq!(config.max_concurrent_registry_calls, 32);
        assert_eq!(config.registry_call_timeout, Duration::from_secs(5));
        assert_eq!(config.refresh_jitter, Duration::ZERO);
        assert_eq!(config.max_cache_entries, 1000);
    }
}
