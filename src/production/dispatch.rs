//! Fan-out of scene tasks to a pool of workers.
//!
//! The dispatcher enqueues every task in planning order, then starts a
//! fixed number of workers that pull from the shared queue, run the
//! executor and write each outcome to the project's accumulator. It returns
//! once every worker has drained the queue.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use super::accumulator::OutcomeAccumulator;
use super::executor::SceneExecutor;
use super::types::{SceneOutcome, SceneTask};

/// Statistics for one dispatch.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DispatchStats {
    pub num_workers: usize,
    pub scenes_ready: u64,
    pub scenes_failed: u64,
    /// Scenes whose worker died before reporting.
    pub scenes_lost: u64,
    pub elapsed: Duration,
}

impl DispatchStats {
    pub fn total_processed(&self) -> u64 {
        self.scenes_ready + self.scenes_failed + self.scenes_lost
    }
}

#[derive(Default)]
struct SharedDispatchStats {
    ready: AtomicU64,
    failed: AtomicU64,
}

impl SharedDispatchStats {
    fn record(&self, outcome: &SceneOutcome) {
        if outcome.is_ready() {
            self.ready.fetch_add(1, Ordering::SeqCst);
        } else {
            self.failed.fetch_add(1, Ordering::SeqCst);
        }
    }
}

type TaskQueue = Arc<Mutex<mpsc::UnboundedReceiver<SceneTask>>>;

/// Runs a project's scene tasks concurrently on a bounded set of workers.
pub struct SceneDispatcher {
    executor: SceneExecutor,
    max_workers: Option<usize>,
}

impl SceneDispatcher {
    /// `max_workers` caps the number of workers; `None` means one per scene.
    pub fn new(executor: SceneExecutor, max_workers: Option<usize>) -> Self {
        Self {
            executor,
            max_workers,
        }
    }

    /// Number of workers used for `scene_count` scenes.
    pub fn worker_count(&self, scene_count: usize) -> usize {
        let cap = self.max_workers.unwrap_or(scene_count).max(1);
        scene_count.min(cap)
    }

    /// Runs every task and records its outcome in `accumulator`.
    ///
    /// A scene whose worker panics is recorded as failed, so the
    /// accumulator always ends up complete.
    pub async fn dispatch(
        &self,
        tasks: Vec<SceneTask>,
        accumulator: Arc<OutcomeAccumulator>,
        cancel: &CancellationToken,
    ) -> DispatchStats {
        let started = Instant::now();
        let num_workers = self.worker_count(tasks.len());
        let stats = Arc::new(SharedDispatchStats::default());

        // Kept to report scenes whose worker never finished.
        let by_id: HashMap<String, SceneTask> = tasks
            .iter()
            .map(|t| (t.scene_id.clone(), t.clone()))
            .collect();

        let (tx, rx) = mpsc::unbounded_channel();
        for task in tasks {
            // The receiver is alive until the workers below finish.
            let _ = tx.send(task);
        }
        drop(tx);
        let queue: TaskQueue = Arc::new(Mutex::new(rx));

        let mut workers = JoinSet::new();
        for i in 0..num_workers {
            let worker = Worker {
                id: format!("worker-{}", i),
                queue: Arc::clone(&queue),
                executor: self.executor.clone(),
                accumulator: Arc::clone(&accumulator),
                stats: Arc::clone(&stats),
                cancel: cancel.clone(),
            };
            workers.spawn(worker.run());
        }
        info!(num_workers = num_workers, scenes = by_id.len(), "Dispatching scenes");

        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Scene worker panicked");
            }
        }

        let mut lost = 0;
        for scene_id in accumulator.pending() {
            let Some(task) = by_id.get(&scene_id) else {
                continue;
            };
            lost += 1;
            let outcome = SceneOutcome::failed(task, "scene worker stopped before reporting");
            if let Err(e) = accumulator.record(outcome) {
                warn!(scene_id = %scene_id, error = %e, "Failed to record lost scene");
            }
        }

        DispatchStats {
            num_workers,
            scenes_ready: stats.ready.load(Ordering::SeqCst),
            scenes_failed: stats.failed.load(Ordering::SeqCst),
            scenes_lost: lost,
            elapsed: started.elapsed(),
        }
    }
}

struct Worker {
    id: String,
    queue: TaskQueue,
    executor: SceneExecutor,
    accumulator: Arc<OutcomeAccumulator>,
    stats: Arc<SharedDispatchStats>,
    cancel: CancellationToken,
}

impl Worker {
    async fn run(self) {
        debug!(worker_id = %self.id, "Worker started");

        loop {
            // Release the queue lock before running the scene.
            let next = self.queue.lock().await.recv().await;
            let Some(task) = next else {
                break;
            };

            let scene_id = task.scene_id.clone();
            debug!(worker_id = %self.id, scene_id = %scene_id, index = task.index, "Picked scene");

            let outcome = self.executor.execute(task, &self.cancel).await;
            self.stats.record(&outcome);

            match self.accumulator.record(outcome) {
                Ok(count) => debug!(
                    worker_id = %self.id,
                    scene_id = %scene_id,
                    resolved = count,
                    expected = self.accumulator.expected(),
                    "Scene resolved"
                ),
                Err(e) => error!(worker_id = %self.id, error = %e, "Failed to record scene outcome"),
            }
        }

        debug!(worker_id = %self.id, "Worker stopped");
    }
}
