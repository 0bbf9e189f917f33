//! Order-independent accumulator for scene outcomes.
//!
//! Scene tasks finish in any order and each writes its outcome exactly
//! once. The accumulator serializes those writes and rejects duplicates,
//! unknown scenes and overflow, so its size never exceeds the number of
//! planned scenes.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use thiserror::Error;
use tokio::sync::Notify;

use super::types::SceneOutcome;

/// Errors returned when an outcome cannot be recorded.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AccumulatorError {
    /// The scene already reported its outcome.
    #[error("Scene '{0}' already reported an outcome")]
    Duplicate(String),

    /// The scene is not part of this project's plan.
    #[error("Scene '{0}' is not part of the planned scene list")]
    UnknownScene(String),
}

/// Thread-safe, exactly-once collection of [`SceneOutcome`]s.
#[derive(Debug)]
pub struct OutcomeAccumulator {
    expected: HashSet<String>,
    outcomes: Mutex<HashMap<String, SceneOutcome>>,
    complete: Notify,
}

impl OutcomeAccumulator {
    /// Creates an accumulator for the given planned scene ids.
    pub fn new(scene_ids: impl IntoIterator<Item = String>) -> Self {
        Self {
            expected: scene_ids.into_iter().collect(),
            outcomes: Mutex::new(HashMap::new()),
            complete: Notify::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<String, SceneOutcome>> {
        // A poisoned lock still holds a consistent map: inserts are atomic.
        self.outcomes.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Records a terminal outcome and returns the number of outcomes so far.
    pub fn record(&self, outcome: SceneOutcome) -> Result<usize, AccumulatorError> {
        if !self.expected.contains(&outcome.scene_id) {
            return Err(AccumulatorError::UnknownScene(outcome.scene_id));
        }

        let count = {
            let mut outcomes = self.lock();
            if outcomes.contains_key(&outcome.scene_id) {
                return Err(AccumulatorError::Duplicate(outcome.scene_id));
            }
            outcomes.insert(outcome.scene_id.clone(), outcome);
            outcomes.len()
        };

        if count == self.expected.len() {
            self.complete.notify_waiters();
        }
        Ok(count)
    }

    /// Number of planned scenes.
    pub fn expected(&self) -> usize {
        self.expected.len()
    }

    /// Number of outcomes recorded so far.
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Whether every planned scene has reported.
    pub fn is_complete(&self) -> bool {
        self.len() == self.expected.len()
    }

    pub fn contains(&self, scene_id: &str) -> bool {
        self.lock().contains_key(scene_id)
    }

    /// Scene ids that have not reported yet.
    pub fn pending(&self) -> Vec<String> {
        let outcomes = self.lock();
        self.expected
            .iter()
            .filter(|id| !outcomes.contains_key(*id))
            .cloned()
            .collect()
    }

    /// Returns the recorded outcomes in planning order.
    pub fn snapshot(&self) -> Vec<SceneOutcome> {
        let mut outcomes: Vec<SceneOutcome> = self.lock().values().cloned().collect();
        outcomes.sort_by_key(|o| o.index);
        outcomes
    }

    /// Waits until every planned scene has reported.
    pub async fn wait_complete(&self) {
        loop {
            let notified = self.complete.notified();
            if self.is_complete() {
                return;
            }
            notified.await;
        }
    }
}
