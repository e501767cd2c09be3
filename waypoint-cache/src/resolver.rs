//! Activation resolver: the cache façade in front of the registry.
//!
//! The resolver balances three goals:
//!  1. Caching activations so the registry is not overloaded.
//!  2. Staying available for already-cached actors through arbitrarily long
//!     registry outages.
//!  3. Converging quickly once the registry is healthy again.
//!
//! A lookup goes cache → validity check → (hit, maybe refresh in the
//! background) or (miss → coalesced, rate-limited registry call → versioned
//! write-back).
//!
//! # Write-back
//!
//! The bounded store is internally synchronized but has no compare-and-swap.
//! The versioned overwrite (and the backoff touch on failure) therefore runs
//! under `write_lock`, which is held only around get+compare+set and never
//! across the registry call.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use rand::Rng;
use tokio::time::Instant;
use tracing::{debug, error, trace, warn};
use waypoint_core::{
    ConfigError, EnsureActivationRequest, EnsureActivationResponse, EntityIdentity,
    InstanceReference, Registry, RegistryError, ResolveError, ResolveResult, ResolverConfig,
};

use crate::coalescer::RequestCoalescer;
use crate::entry::CacheEntry;
use crate::key::{dedupe_key, encode_key, KeyBufferPool};
use crate::limiter::ConcurrencyLimiter;
use crate::stats::{ResolverStats, StatsRecorder};
use crate::store::BoundedStore;

type FillResult = ResolveResult<Vec<InstanceReference>>;

struct Inner<R> {
    registry: Arc<R>,
    config: ResolverConfig,
    /// `None` when caching is disabled.
    store: Option<BoundedStore>,
    key_pool: KeyBufferPool,
    limiter: ConcurrencyLimiter,
    coalescer: Arc<RequestCoalescer<FillResult>>,
    write_lock: Mutex<()>,
    stats: StatsRecorder,
}

/// Resolves where an actor currently has live activations.
///
/// Cloning is cheap; clones share the cache, limiter and coalescer.
pub struct ActivationResolver<R: Registry> {
    inner: Arc<Inner<R>>,
}

impl<R: Registry> Clone for ActivationResolver<R> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

/// Builder for [`ActivationResolver`].
pub struct ActivationResolverBuilder<R> {
    registry: Option<Arc<R>>,
    config: ResolverConfig,
}

impl<R: Registry> ActivationResolverBuilder<R> {
    pub fn registry(mut self, registry: Arc<R>) -> Self {
        self.registry = Some(registry);
        self
    }

    pub fn config(mut self, config: ResolverConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the resolver. Fails if no registry was supplied or the config
    /// does not validate.
    pub fn build(self) -> Result<ActivationResolver<R>, ConfigError> {
        let registry = self.registry.ok_or_else(|| ConfigError::MissingField {
            field: "registry".to_string(),
        })?;
        self.config.validate()?;

        // validate() already bounds the limiter size to u32.
        let capacity =
            u32::try_from(self.config.max_concurrent_registry_calls).unwrap_or(u32::MAX);

        let store = if self.config.disable_cache {
            None
        } else {
            Some(BoundedStore::new(self.config.max_cache_entries))
        };

        Ok(ActivationResolver {
            inner: Arc::new(Inner {
                registry,
                store,
                key_pool: KeyBufferPool::default(),
                limiter: ConcurrencyLimiter::new(capacity),
                coalescer: Arc::new(RequestCoalescer::new()),
                write_lock: Mutex::new(()),
                stats: StatsRecorder::default(),
                config: self.config,
            }),
        })
    }
}

impl<R: Registry> ActivationResolver<R> {
    pub fn builder() -> ActivationResolverBuilder<R> {
        ActivationResolverBuilder {
            registry: None,
            config: ResolverConfig::default(),
        }
    }

    /// Shorthand for `builder().registry(registry).config(config).build()`.
    pub fn new(registry: Arc<R>, config: ResolverConfig) -> Result<Self, ConfigError> {
        Self::builder().registry(registry).config(config).build()
    }

    pub fn config(&self) -> &ResolverConfig {
        &self.inner.config
    }

    /// Return the activations of `identity`, at least `1 + extra_replicas`
    /// of them when freshly filled, none hosted on an excluded server.
    ///
    /// Never waits longer than the configured resolve timeout. A stale hit is
    /// returned immediately and refreshed in the background; the refresh
    /// outcome is only logged.
    pub async fn resolve(
        &self,
        identity: &EntityIdentity,
        extra_replicas: u64,
        excluded_server_ids: &[String],
    ) -> ResolveResult<Vec<InstanceReference>> {
        let budget = self.inner.config.resolve_timeout;
        let lookup = self.resolve_within_budget(identity, extra_replicas, excluded_server_ids);
        match tokio::time::timeout(budget, lookup).await {
            Ok(result) => result,
            Err(_elapsed) => Err(ResolveError::Timeout { after: budget }),
        }
    }

    async fn resolve_within_budget(
        &self,
        identity: &EntityIdentity,
        extra_replicas: u64,
        excluded_server_ids: &[String],
    ) -> ResolveResult<Vec<InstanceReference>> {
        let Some(store) = &self.inner.store else {
            StatsRecorder::incr(&self.inner.stats.misses);
            return self
                .fill_and_cache(identity, extra_replicas, Vec::new(), excluded_server_ids)
                .await;
        };

        let cached = self.inner.key_pool.with_key(identity, |key| store.get(key));
        match cached {
            Some(entry) if entry.satisfies(extra_replicas, excluded_server_ids) => {
                StatsRecorder::incr(&self.inner.stats.hits);
                let staleness = entry.staleness();
                trace!(%identity, ?staleness, "activation cache hit");

                if staleness > self.refresh_threshold() {
                    self.spawn_refresh(
                        identity.clone(),
                        extra_replicas,
                        entry.references.clone(),
                        excluded_server_ids.to_vec(),
                    );
                }
                Ok(entry.references.clone())
            }
            cached => {
                StatsRecorder::incr(&self.inner.stats.misses);
                debug!(
                    %identity,
                    extra_replicas,
                    had_entry = cached.is_some(),
                    "activation cache miss"
                );
                let hint = cached
                    .map(|entry| entry.references.clone())
                    .unwrap_or_default();
                self.fill_and_cache(identity, extra_replicas, hint, excluded_server_ids)
                    .await
            }
        }
    }

    /// Drop the cached entry for `identity` and forget its in-flight fill.
    ///
    /// Only the fill keyed by the empty exclusion set is forgotten; fills
    /// that exclude servers keep running and may still write back.
    pub fn invalidate(&self, identity: &EntityIdentity) {
        if let Some(store) = &self.inner.store {
            self.inner.key_pool.with_key(identity, |key| store.delete(key));
        }
        self.inner.coalescer.forget(&dedupe_key(identity, &[]));
        debug!(%identity, "activation cache entry invalidated");
    }

    /// Current cache content for `identity`, without triggering a fill.
    pub fn cached_entry(&self, identity: &EntityIdentity) -> Option<CacheEntry> {
        let store = self.inner.store.as_ref()?;
        self.inner
            .key_pool
            .with_key(identity, |key| store.get(key))
            .map(|entry| (*entry).clone())
    }

    pub fn stats(&self) -> ResolverStats {
        let entry_count = self
            .inner
            .store
            .as_ref()
            .map(BoundedStore::entry_count)
            .unwrap_or(0);
        self.inner.stats.snapshot(entry_count)
    }

    fn refresh_threshold(&self) -> Duration {
        let ideal = self.inner.config.ideal_cache_staleness;
        let jitter = self.inner.config.refresh_jitter;
        if jitter.is_zero() {
            return ideal;
        }
        let bound = u64::try_from(jitter.as_nanos()).unwrap_or(u64::MAX);
        ideal + Duration::from_nanos(rand::rng().random_range(0..bound))
    }

    /// Refill in a detached task with its own budget, so the caller's
    /// cancellation cannot abort it.
    fn spawn_refresh(
        &self,
        identity: EntityIdentity,
        extra_replicas: u64,
        cached_references: Vec<InstanceReference>,
        excluded_server_ids: Vec<String>,
    ) {
        StatsRecorder::incr(&self.inner.stats.stale_refreshes);
        let this = self.clone();
        let budget = self.inner.config.refresh_timeout;

        tokio::spawn(async move {
            let refresh = this.fill_and_cache(
                &identity,
                extra_replicas,
                cached_references,
                &excluded_server_ids,
            );
            let err = match tokio::time::timeout(budget, refresh).await {
                Ok(Ok(_)) => {
                    trace!(%identity, "activation cache refreshed in background");
                    return;
                }
                Ok(Err(err)) => err,
                Err(_elapsed) => ResolveError::Timeout { after: budget },
            };
            error!(
                error = %err,
                namespace = identity.namespace(),
                module_id = identity.module_id(),
                entity_id = identity.entity_id(),
                "error refreshing activation cache in background"
            );
        });
    }

    async fn fill_and_cache(
        &self,
        identity: &EntityIdentity,
        extra_replicas: u64,
        cached_references: Vec<InstanceReference>,
        excluded_server_ids: &[String],
    ) -> ResolveResult<Vec<InstanceReference>> {
        // Distinct exclusion sets get distinct flights: a request avoiding a
        // newly bad server must not wait on a refresh that ignores it.
        let flight_key = dedupe_key(identity, excluded_server_ids);
        let work = self.clone().fill(
            identity.clone(),
            extra_replicas,
            cached_references,
            excluded_server_ids.to_vec(),
        );

        match self.inner.coalescer.run(&flight_key, work).await {
            Ok((result, shared)) => {
                if shared {
                    StatsRecorder::incr(&self.inner.stats.coalesced_waits);
                }
                result
            }
            Err(aborted) => Err(ResolveError::FlightAborted { key: aborted.key }),
        }
    }

    async fn fill(
        self,
        identity: EntityIdentity,
        extra_replicas: u64,
        cached_references: Vec<InstanceReference>,
        excluded_server_ids: Vec<String>,
    ) -> ResolveResult<Vec<InstanceReference>> {
        // Rare path, so allocate instead of borrowing from the pool.
        let key = encode_key(&identity);
        let cached_activation_server_ids = cached_references
            .iter()
            .map(|reference| reference.server_id().to_string())
            .collect();

        let call_timeout = self.inner.config.registry_call_timeout;
        let deadline = Instant::now() + call_timeout;
        let permit = self.inner.limiter.acquire(deadline, 1).await?;

        StatsRecorder::incr(&self.inner.stats.registry_calls);
        let request = EnsureActivationRequest {
            identity: identity.clone(),
            extra_replicas,
            excluded_server_ids: excluded_server_ids.clone(),
            cached_activation_server_ids,
        };
        let outcome =
            tokio::time::timeout_at(deadline, self.inner.registry.ensure_activation(request)).await;
        // The slot only protects the registry; free it before result handling.
        permit.release();

        let response = match outcome {
            Ok(Ok(response)) => response,
            Ok(Err(source)) => return Err(self.registry_failed(&key, &identity, source)),
            Err(_elapsed) => {
                let source = RegistryError::Timeout {
                    after: call_timeout,
                };
                return Err(self.registry_failed(&key, &identity, source));
            }
        };

        if let Some(reference) = response
            .references
            .iter()
            .find(|reference| is_excluded(reference, &excluded_server_ids))
        {
            StatsRecorder::incr(&self.inner.stats.invariant_violations);
            error!(
                %identity,
                server_id = reference.server_id(),
                excluded = ?excluded_server_ids,
                "registry returned an excluded server"
            );
            return Err(ResolveError::InvariantViolated {
                server_id: reference.server_id().to_string(),
                excluded: excluded_server_ids,
            });
        }

        match &self.inner.store {
            Some(store) => self.write_back(store, key, &identity, response, excluded_server_ids),
            None => Ok(response.references),
        }
    }

    /// Keep whichever of the cached and the new answer carries the higher
    /// version stamp. Ties go to the new answer: some registries report a
    /// constant stamp, and the cache must still converge for them.
    fn write_back(
        &self,
        store: &BoundedStore,
        key: Vec<u8>,
        identity: &EntityIdentity,
        response: EnsureActivationResponse,
        excluded_server_ids: Vec<String>,
    ) -> ResolveResult<Vec<InstanceReference>> {
        let _guard = self
            .inner
            .write_lock
            .lock()
            .map_err(|_| ResolveError::LockPoisoned)?;

        if let Some(existing) = store.get(&key) {
            if existing.version_stamp > response.version_stamp {
                debug!(
                    %identity,
                    cached_version = existing.version_stamp,
                    cached_filled_at = %existing.filled_at,
                    fetched_version = response.version_stamp,
                    "keeping newer cached activation"
                );
                // The newer entry may predate this request's exclusions.
                let safe = !existing
                    .references
                    .iter()
                    .any(|reference| is_excluded(reference, &excluded_server_ids));
                return Ok(if safe {
                    existing.references.clone()
                } else {
                    response.references
                });
            }
        }

        store.insert(
            key,
            CacheEntry::new(
                response.references.clone(),
                response.version_stamp,
                excluded_server_ids,
            ),
        );
        Ok(response.references)
    }

    /// Record a failed registry call. If an entry exists its timestamp is
    /// bumped so stale hits retry at most once per staleness interval while
    /// the registry is unhealthy.
    fn registry_failed(
        &self,
        key: &[u8],
        identity: &EntityIdentity,
        source: RegistryError,
    ) -> ResolveError {
        StatsRecorder::incr(&self.inner.stats.registry_failures);
        warn!(%identity, error = %source, "registry ensure-activation failed");

        if let Some(store) = &self.inner.store {
            match self.inner.write_lock.lock() {
                Ok(_guard) => {
                    if let Some(existing) = store.get(key) {
                        store.insert(key.to_vec(), existing.touched());
                    }
                }
                Err(_) => warn!(%identity, "activation cache lock poisoned, skipping backoff"),
            }
        }

        ResolveError::Registry {
            entity_id: identity.entity_id().to_string(),
            source,
        }
    }
}

fn is_excluded(reference: &InstanceReference, excluded_server_ids: &[String]) -> bool {
    excluded_server_ids
        .iter()
        .any(|id| id == reference.server_id())
}
