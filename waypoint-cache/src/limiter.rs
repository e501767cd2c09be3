//! Process-wide admission gate for outbound registry calls.
//!
//! Bounds how many registry calls are in flight at once so pathological
//! workloads cannot overload the registry. Acquisition waits at most until
//! the caller's deadline.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio::time::Instant;
use waypoint_core::{ResolveError, ResolveResult};

/// Weighted concurrency limiter over a tokio semaphore.
#[derive(Debug, Clone)]
pub struct ConcurrencyLimiter {
    permits: Arc<Semaphore>,
    capacity: u32,
}

impl ConcurrencyLimiter {
    pub fn new(capacity: u32) -> Self {
        Self {
            permits: Arc::new(Semaphore::new(capacity as usize)),
            capacity,
        }
    }

    /// Wait for `weight` slots, giving up at `deadline`.
    pub async fn acquire(&self, deadline: Instant, weight: u32) -> ResolveResult<LimiterPermit> {
        let started = Instant::now();
        let acquire = Arc::clone(&self.permits).acquire_many_owned(weight);
        match tokio::time::timeout_at(deadline, acquire).await {
            Ok(Ok(permit)) => Ok(LimiterPermit { permit }),
            Ok(Err(_closed)) => Err(ResolveError::LimiterClosed),
            Err(_elapsed) => Err(ResolveError::LimiterTimeout {
                waited: started.elapsed(),
            }),
        }
    }

    /// Slots not currently held.
    pub fn available(&self) -> usize {
        self.permits.available_permits()
    }

    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// Refuse all further acquisitions. Waiters fail with `LimiterClosed`.
    pub fn close(&self) {
        self.permits.close();
    }
}

/// Slots held in a [`ConcurrencyLimiter`].
///
/// Releasing consumes the permit, so a slot cannot be released twice.
/// Dropping the permit releases it as well.
#[derive(Debug)]
pub struct LimiterPermit {
    permit: OwnedSemaphorePermit,
}

impl LimiterPermit {
    pub fn release(self) {
        drop(self.permit);
    }

    pub fn weight(&self) -> usize {
        self.permit.num_permits()
    }
}
