//! Bounded admission gate for heavy generation and render work.
//!
//! At most `capacity` [`RenderPermit`]s exist at once. Waiters are served in
//! arrival order (tokio's semaphore is fair). A permit is returned when it is
//! dropped, so every exit path of the holder releases it, including errors
//! and cancellation.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};
use tokio_util::sync::CancellationToken;

use crate::metrics::MetricsCollector;

/// Default number of simultaneous render permits.
pub const DEFAULT_RENDER_CONCURRENCY: usize = 3;

/// Errors that can occur while waiting for a permit.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    #[error("Render pool is closed")]
    Closed,

    #[error("Timed out waiting for a render permit after {0:?}")]
    Timeout(Duration),

    #[error("Cancelled while waiting for a render permit")]
    Cancelled,
}

/// Point-in-time view of the pool.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStats {
    pub capacity: usize,
    /// Permits currently held.
    pub in_use: usize,
    /// Highest number of permits held at once.
    pub peak_in_use: usize,
    /// Callers currently waiting for a permit.
    pub waiting: usize,
    /// Permits handed out since creation.
    pub total_acquired: u64,
}

#[derive(Debug, Default)]
struct PoolState {
    in_use: AtomicUsize,
    peak_in_use: AtomicUsize,
    waiting: AtomicUsize,
    total_acquired: AtomicU64,
}

/// Decrements the waiting counter even if the acquiring future is dropped.
struct WaitingGuard<'a>(&'a PoolState);

impl<'a> WaitingGuard<'a> {
    fn enter(state: &'a PoolState) -> Self {
        state.waiting.fetch_add(1, Ordering::SeqCst);
        Self(state)
    }
}

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.waiting.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Counting gate with fixed capacity.
#[derive(Debug, Clone)]
pub struct RenderPool {
    capacity: usize,
    semaphore: Arc<Semaphore>,
    state: Arc<PoolState>,
}

impl Default for RenderPool {
    fn default() -> Self {
        Self::new(DEFAULT_RENDER_CONCURRENCY)
    }
}

impl RenderPool {
    /// Creates a pool with `capacity` permits (at least one).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            semaphore: Arc::new(Semaphore::new(capacity)),
            state: Arc::new(PoolState::default()),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a permit.
    pub async fn acquire(&self) -> Result<RenderPermit, PoolError> {
        let _waiting = WaitingGuard::enter(&self.state);
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| PoolError::Closed)?;
        Ok(self.admit(permit))
    }

    /// Waits for a permit, giving up on cancellation or after `timeout`.
    pub async fn acquire_with(
        &self,
        cancel: &CancellationToken,
        timeout: Option<Duration>,
    ) -> Result<RenderPermit, PoolError> {
        let acquire = async {
            match timeout {
                Some(limit) => tokio::time::timeout(limit, self.acquire())
                    .await
                    .map_err(|_| PoolError::Timeout(limit))?,
                None => self.acquire().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(PoolError::Cancelled),
            result = acquire => result,
        }
    }

    /// Takes a permit only if one is free right now.
    pub fn try_acquire(&self) -> Option<RenderPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| self.admit(permit))
    }

    /// Closes the pool; pending and future acquires fail with `Closed`.
    pub fn close(&self) {
        self.semaphore.close();
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats {
            capacity: self.capacity,
            in_use: self.state.in_use.load(Ordering::SeqCst),
            peak_in_use: self.state.peak_in_use.load(Ordering::SeqCst),
            waiting: self.state.waiting.load(Ordering::SeqCst),
            total_acquired: self.state.total_acquired.load(Ordering::SeqCst),
        }
    }

    fn admit(&self, permit: OwnedSemaphorePermit) -> RenderPermit {
        let in_use = self.state.in_use.fetch_add(1, Ordering::SeqCst) + 1;
        self.state.peak_in_use.fetch_max(in_use, Ordering::SeqCst);
        self.state.total_acquired.fetch_add(1, Ordering::SeqCst);
        MetricsCollector::new().set_render_permits_in_use(in_use);

        RenderPermit {
            _permit: permit,
            state: Arc::clone(&self.state),
            acquired_at: Instant::now(),
        }
    }
}

/// A held render slot. Dropping it returns the slot to the pool.
#[derive(Debug)]
pub struct RenderPermit {
    _permit: OwnedSemaphorePermit,
    state: Arc<PoolState>,
    acquired_at: Instant,
}

impl RenderPermit {
    /// How long this permit has been held.
    pub fn held_for(&self) -> Duration {
        self.acquired_at.elapsed()
    }
}

impl Drop for RenderPermit {
    fn drop(&mut self) {
        // Runs before `_permit` is released, so `in_use` never exceeds capacity.
        let in_use = self.state.in_use.fetch_sub(1, Ordering::SeqCst) - 1;
        MetricsCollector::new().set_render_permits_in_use(in_use);
    }
}
