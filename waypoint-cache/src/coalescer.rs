//! Keyed single-flight coordination.
//!
//! Concurrent callers that ask for the same key share one execution and all
//! observe its result. The execution runs as its own task, so a caller that
//! stops waiting (timeout, drop) never cancels work other waiters depend on.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use futures_util::future::{BoxFuture, FutureExt, Shared};
use thiserror::Error;

/// The shared execution ended without producing a value (it panicked or its
/// task was cancelled at runtime shutdown).
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("coalesced execution for {key} aborted")]
pub struct FlightAborted {
    pub key: String,
}

type SharedFlight<V> = Shared<BoxFuture<'static, Option<V>>>;

struct Flight<V: Clone> {
    generation: u64,
    result: SharedFlight<V>,
}

/// Single-flight group keyed by string.
pub struct RequestCoalescer<V: Clone> {
    flights: Mutex<HashMap<String, Flight<V>>>,
    next_generation: AtomicU64,
}

impl<V> Default for RequestCoalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn default() -> Self {
        Self::new()
    }
}

impl<V> RequestCoalescer<V>
where
    V: Clone + Send + Sync + 'static,
{
    pub fn new() -> Self {
        Self {
            flights: Mutex::new(HashMap::new()),
            next_generation: AtomicU64::new(0),
        }
    }

    /// Run `work` unless an execution for `key` is already in flight, in
    /// which case wait for that one instead.
    ///
    /// Returns the value and whether it was shared with another caller.
    /// `work` is dropped unpolled when joining an existing flight.
    pub async fn run<F>(self: &Arc<Self>, key: &str, work: F) -> Result<(V, bool), FlightAborted>
    where
        F: Future<Output = V> + Send + 'static,
    {
        let (result, shared) = self.join_or_start(key, work);
        match result.await {
            Some(value) => Ok((value, shared)),
            None => Err(FlightAborted {
                key: key.to_string(),
            }),
        }
    }

    /// Stop handing out the current execution for `key`. Callers already
    /// waiting still receive its result; the next `run` starts afresh.
    pub fn forget(&self, key: &str) {
        if let Ok(mut flights) = self.flights.lock() {
            flights.remove(key);
        }
    }

    /// Number of keys with an execution in flight.
    pub fn in_flight(&self) -> usize {
        self.flights.lock().map(|flights| flights.len()).unwrap_or(0)
    }

    fn join_or_start<F>(self: &Arc<Self>, key: &str, work: F) -> (SharedFlight<V>, bool)
    where
        F: Future<Output = V> + Send + 'static,
    {
        let mut flights = match self.flights.lock() {
            Ok(flights) => flights,
            // Coordination is lost, but the work itself is still safe to run.
            Err(_) => return (Self::detached(work), false),
        };

        if let Some(flight) = flights.get(key) {
            return (flight.result.clone(), true);
        }

        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let group = Arc::clone(self);
        let owned_key = key.to_string();
        // Built inside the task: the map lock is still held here.
        let handle = tokio::spawn(async move {
            let _guard = FinishGuard {
                group,
                key: owned_key,
                generation,
            };
            work.await
        });
        let result = handle.map(|joined| joined.ok()).boxed().shared();

        flights.insert(
            key.to_string(),
            Flight {
                generation,
                result: result.clone(),
            },
        );
        (result, false)
    }

    fn detached<F>(work: F) -> SharedFlight<V>
    where
        F: Future<Output = V> + Send + 'static,
    {
        tokio::spawn(work)
            .map(|joined| joined.ok())
            .boxed()
            .shared()
    }

    fn finish(&self, key: &str, generation: u64) {
        if let Ok(mut flights) = self.flights.lock() {
            // A forgotten key may already hold a newer flight.
            if flights.get(key).map(|f| f.generation) == Some(generation) {
                flights.remove(key);
            }
        }
    }
}

/// Retires a flight when its task ends, whether it returned, panicked or
/// was cancelled.
struct FinishGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    group: Arc<RequestCoalescer<V>>,
    key: String,
    generation: u64,
}

impl<V> Drop for FinishGuard<V>
where
    V: Clone + Send + Sync + 'static,
{
    fn drop(&mut self) {
        self.group.finish(&self.key, self.generation);
    }
}
