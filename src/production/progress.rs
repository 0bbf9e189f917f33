//! Background progress monitor for production runs.
//!
//! Scene workers bump shared atomic counters as they move through their
//! phases; the monitor logs a summary at a fixed interval so long renders
//! can be followed without reading every scene event.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;

/// Counter values at a point in time.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressSnapshot {
    pub planned: usize,
    /// Scenes currently between start and terminal outcome.
    pub in_flight: usize,
    /// Scenes currently holding a render permit.
    pub rendering: usize,
    pub ready: usize,
    pub failed: usize,
    pub retries: usize,
    pub elapsed: Duration,
}

impl ProgressSnapshot {
    pub fn resolved(&self) -> usize {
        self.ready + self.failed
    }
}

/// Shared atomic counters, cloned into every scene worker.
#[derive(Debug, Clone, Default)]
pub struct ProgressCounters {
    pub planned: Arc<AtomicUsize>,
    pub in_flight: Arc<AtomicUsize>,
    pub rendering: Arc<AtomicUsize>,
    pub ready: Arc<AtomicUsize>,
    pub failed: Arc<AtomicUsize>,
    pub retries: Arc<AtomicUsize>,
}

impl ProgressCounters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self, start: Instant) -> ProgressSnapshot {
        ProgressSnapshot {
            planned: self.planned.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
            rendering: self.rendering.load(Ordering::Relaxed),
            ready: self.ready.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            elapsed: start.elapsed(),
        }
    }
}

/// Increments a gauge counter and decrements it again on drop.
pub(crate) struct GaugeGuard(Arc<AtomicUsize>);

impl GaugeGuard {
    pub(crate) fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(Arc::clone(counter))
    }
}

impl Drop for GaugeGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

/// A background task that periodically logs production progress.
///
/// Call [`ProgressMonitor::stop`] to end it; dropping it also stops the
/// task at its next tick.
pub struct ProgressMonitor {
    stop_flag: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl ProgressMonitor {
    pub fn start(project_id: String, counters: ProgressCounters, interval: Duration) -> Self {
        let stop_flag = Arc::new(AtomicBool::new(false));
        let flag = stop_flag.clone();
        let start = Instant::now();

        let handle = tokio::spawn(async move {
            let mut tick = tokio::time::interval(interval);
            tick.tick().await; // skip the immediate first tick

            loop {
                tick.tick().await;
                if flag.load(Ordering::Relaxed) {
                    break;
                }

                let snap = counters.snapshot(start);
                let pct = if snap.planned > 0 {
                    (snap.resolved() as f64 / snap.planned as f64 * 100.0).min(100.0)
                } else {
                    0.0
                };

                tracing::info!(
                    project_id = %project_id,
                    planned = snap.planned,
                    in_flight = snap.in_flight,
                    rendering = snap.rendering,
                    ready = snap.ready,
                    failed = snap.failed,
                    retries = snap.retries,
                    progress_pct = format!("{:.1}%", pct),
                    elapsed_secs = snap.elapsed.as_secs(),
                    "Production progress"
                );
            }
        });

        Self {
            stop_flag,
            handle: Some(handle),
        }
    }

    /// Signals the monitor to stop and waits for it.
    pub async fn stop(mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Drop for ProgressMonitor {
    fn drop(&mut self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }
}
