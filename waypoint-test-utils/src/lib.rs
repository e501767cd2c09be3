//! Waypoint Test Utilities
//!
//! Centralized test infrastructure for the waypoint workspace:
//! - A scriptable stub registry with call counting and per-call gates
//! - Fixtures for references and registry responses
//! - Proptest generators for identities and server IDs
//! - Tracing setup for tests

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use proptest::prelude::*;
use tokio::sync::Notify;

// Re-export core types for convenience
pub use waypoint_core::{
    EnsureActivationRequest, EnsureActivationResponse, EntityIdentity, InstanceReference,
    Registry, RegistryError, ResolverConfig, VersionStamp,
};

/// What the stub answers for one call.
pub type StubOutcome = Result<EnsureActivationResponse, RegistryError>;

// ============================================================================
// STUB REGISTRY
// ============================================================================

struct StubReply {
    outcome: StubOutcome,
    gate: Option<Arc<Notify>>,
}

/// Registry stub that answers from a script.
///
/// Each call pops the next scripted reply, or uses the default reply when
/// the script is empty. A gated reply blocks until its [`Notify`] is
/// signalled, which lets tests hold calls in flight and choose the order in
/// which they complete.
pub struct StubRegistry {
    script: Mutex<VecDeque<StubReply>>,
    default_outcome: Mutex<StubOutcome>,
    calls: AtomicUsize,
    requests: Mutex<Vec<EnsureActivationRequest>>,
}

impl Default for StubRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl StubRegistry {
    /// A stub with no script whose default reply is an `Unavailable` error.
    pub fn new() -> Self {
        Self {
            script: Mutex::new(VecDeque::new()),
            default_outcome: Mutex::new(Err(unavailable("no reply scripted"))),
            calls: AtomicUsize::new(0),
            requests: Mutex::new(Vec::new()),
        }
    }

    /// A stub that always answers with `response`.
    pub fn returning(response: EnsureActivationResponse) -> Self {
        let stub = Self::new();
        stub.set_default(Ok(response));
        stub
    }

    /// Replace the reply used when the script is empty.
    pub fn set_default(&self, outcome: StubOutcome) {
        *lock(&self.default_outcome) = outcome;
    }

    /// Queue a reply for the next unscripted call.
    pub fn push_reply(&self, outcome: StubOutcome) {
        lock(&self.script).push_back(StubReply {
            outcome,
            gate: None,
        });
    }

    /// Queue a reply that is held until the returned gate is notified.
    pub fn push_gated(&self, outcome: StubOutcome) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        lock(&self.script).push_back(StubReply {
            outcome,
            gate: Some(Arc::clone(&gate)),
        });
        gate
    }

    /// Number of calls received so far (including ones still gated).
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Every request received, in arrival order.
    pub fn requests(&self) -> Vec<EnsureActivationRequest> {
        lock(&self.requests).clone()
    }

    /// Poll until at least `n` calls have arrived or `within` elapses.
    pub async fn wait_for_calls(&self, n: usize, within: Duration) -> bool {
        let deadline = tokio::time::Instant::now() + within;
        while self.calls() < n {
            if tokio::time::Instant::now() >= deadline {
                return false;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        true
    }
}

#[async_trait]
impl Registry for StubRegistry {
    async fn ensure_activation(
        &self,
        request: EnsureActivationRequest,
    ) -> Result<EnsureActivationResponse, RegistryError> {
        let reply = lock(&self.script).pop_front();
        let reply = reply.unwrap_or_else(|| StubReply {
            outcome: lock(&self.default_outcome).clone(),
            gate: None,
        });

        lock(&self.requests).push(request);
        self.calls.fetch_add(1, Ordering::SeqCst);

        if let Some(gate) = reply.gate {
            gate.notified().await;
        }
        reply.outcome
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

// ============================================================================
// FIXTURES
// ============================================================================

/// One reference per server, addressed as `<server>:9090`.
pub fn references(identity: &EntityIdentity, servers: &[&str]) -> Vec<InstanceReference> {
    servers
        .iter()
        .map(|server| {
            InstanceReference::new(identity.clone(), *server, 1, format!("{server}:9090"))
        })
        .collect()
}

/// Registry response hosting `identity` on `servers`.
pub fn response(
    identity: &EntityIdentity,
    servers: &[&str],
    version_stamp: VersionStamp,
) -> EnsureActivationResponse {
    EnsureActivationResponse {
        references: references(identity, servers),
        version_stamp,
    }
}

pub fn unavailable(reason: &str) -> RegistryError {
    RegistryError::Unavailable {
        reason: reason.to_string(),
    }
}

/// Server IDs of `references`, in order.
pub fn server_ids(references: &[InstanceReference]) -> Vec<String> {
    references
        .iter()
        .map(|reference| reference.server_id().to_string())
        .collect()
}

// ============================================================================
// PROPTEST GENERATORS
// ============================================================================

/// Strategy for generating entity identities.
pub fn arb_identity() -> impl Strategy<Value = EntityIdentity> {
    ("[a-z]{1,8}", "[a-z0-9_]{1,8}", "[a-zA-Z0-9:/-]{1,16}")
        .prop_map(|(ns, module, entity)| EntityIdentity::new(ns, module, entity))
}

/// Strategy for generating server IDs from a small pool, so collisions with
/// exclusion sets are common.
pub fn arb_server_id() -> impl Strategy<Value = String> {
    (0u8..8).prop_map(|n| format!("S{n}"))
}

/// Strategy for generating 1..=`max` server IDs.
pub fn arb_server_ids(max: usize) -> impl Strategy<Value = Vec<String>> {
    prop::collection::vec(arb_server_id(), 1..=max.max(1))
}

// ============================================================================
// TRACING
// ============================================================================

/// Install a fmt subscriber honouring `RUST_LOG`. Safe to call repeatedly.
pub fn init_test_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_test_writer()
        .try_init();
}
