//! Core data model for a production run.
//!
//! A run owns one [`ProjectState`]. Planning fixes its ordered list of
//! [`SceneTask`]s, each task resolves into exactly one [`SceneOutcome`], and
//! the run finishes with a [`ProjectOutcome`].

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::provider::{AssetRef, ContentRef, SceneSpec};

use super::accumulator::OutcomeAccumulator;
use super::orchestrator::ProductionError;

/// Lifecycle status of a project.
///
/// Statuses only move forward; `Error` can be entered from any non-terminal
/// status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProjectStatus {
    Creating,
    Planning,
    Generating,
    Ready,
    Error,
}

impl ProjectStatus {
    fn rank(self) -> u8 {
        match self {
            ProjectStatus::Creating => 0,
            ProjectStatus::Planning => 1,
            ProjectStatus::Generating => 2,
            ProjectStatus::Ready => 3,
            ProjectStatus::Error => 4,
        }
    }

    /// Returns true for `Ready` and `Error`.
    pub fn is_terminal(self) -> bool {
        matches!(self, ProjectStatus::Ready | ProjectStatus::Error)
    }

    /// Returns whether moving from `self` to `next` is allowed.
    pub fn can_transition_to(self, next: ProjectStatus) -> bool {
        if self.is_terminal() {
            return false;
        }
        next == ProjectStatus::Error || next.rank() > self.rank()
    }

    pub fn as_str(self) -> &'static str {
        match self {
            ProjectStatus::Creating => "creating",
            ProjectStatus::Planning => "planning",
            ProjectStatus::Generating => "generating",
            ProjectStatus::Ready => "ready",
            ProjectStatus::Error => "error",
        }
    }
}

impl fmt::Display for ProjectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProjectStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "creating" => Ok(ProjectStatus::Creating),
            "planning" => Ok(ProjectStatus::Planning),
            "generating" => Ok(ProjectStatus::Generating),
            "ready" => Ok(ProjectStatus::Ready),
            "error" => Ok(ProjectStatus::Error),
            other => Err(format!("unknown project status '{}'", other)),
        }
    }
}

/// Persisted status of a scene.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SceneStatus {
    Planned,
    InProgress,
    Ready,
    Error,
}

impl SceneStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SceneStatus::Ready | SceneStatus::Error)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SceneStatus::Planned => "planned",
            SceneStatus::InProgress => "in_progress",
            SceneStatus::Ready => "ready",
            SceneStatus::Error => "error",
        }
    }
}

impl fmt::Display for SceneStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SceneStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "planned" => Ok(SceneStatus::Planned),
            "in_progress" => Ok(SceneStatus::InProgress),
            "ready" => Ok(SceneStatus::Ready),
            "error" => Ok(SceneStatus::Error),
            other => Err(format!("unknown scene status '{}'", other)),
        }
    }
}

/// Fine-grained phase of a scene inside the executor's state machine.
///
/// This is what `scene_update` events carry on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScenePhase {
    Queued,
    GeneratingAssets,
    GeneratingContent,
    Rendering,
    Retrying,
    Ready,
    Error,
}

impl ScenePhase {
    pub fn as_str(self) -> &'static str {
        match self {
            ScenePhase::Queued => "queued",
            ScenePhase::GeneratingAssets => "generating_assets",
            ScenePhase::GeneratingContent => "generating_content",
            ScenePhase::Rendering => "rendering",
            ScenePhase::Retrying => "retrying",
            ScenePhase::Ready => "ready",
            ScenePhase::Error => "error",
        }
    }
}

impl fmt::Display for ScenePhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One planned scene, carried through every attempt of its production.
///
/// A task is owned by exactly one executor at a time. Retry state
/// (`retry_count`, `last_error`) and reusable artifacts (`asset`, `content`)
/// travel with it from one attempt to the next.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SceneTask {
    pub scene_id: String,
    pub project_id: String,
    /// 0-based position in planning order.
    pub index: usize,
    pub title: String,
    pub description: String,
    pub visual_plan: String,
    #[serde(default)]
    pub voiceover: Option<String>,
    /// Prompt for an auxiliary asset, if the planner asked for one.
    #[serde(default)]
    pub asset_prompt: Option<String>,
    #[serde(default)]
    pub target_duration_seconds: Option<f64>,
    pub status: SceneStatus,
    /// Number of failed attempts so far.
    pub retry_count: u32,
    #[serde(default)]
    pub last_error: Option<String>,
    #[serde(default)]
    pub asset: Option<AssetRef>,
    #[serde(default)]
    pub content: Option<ContentRef>,
}

impl SceneTask {
    /// Builds a task from a planner scene spec.
    ///
    /// `default_duration` applies only when the spec carries no explicit
    /// duration.
    pub fn from_spec(
        project_id: impl Into<String>,
        index: usize,
        spec: SceneSpec,
        default_duration: f64,
    ) -> Self {
        let visual_plan = if spec.visual_plan.trim().is_empty() {
            spec.description.clone()
        } else {
            spec.visual_plan
        };

        Self {
            scene_id: Uuid::new_v4().to_string(),
            project_id: project_id.into(),
            index,
            title: spec.title,
            description: spec.description,
            visual_plan,
            voiceover: spec.voiceover,
            asset_prompt: spec.asset_prompt.filter(|p| !p.trim().is_empty()),
            target_duration_seconds: spec.duration_seconds.or(Some(default_duration)),
            status: SceneStatus::Planned,
            retry_count: 0,
            last_error: None,
            asset: None,
            content: None,
        }
    }

    /// 0-based index of the attempt about to run (or that just failed).
    pub fn attempt_index(&self) -> u32 {
        self.retry_count
    }

    pub fn is_retry(&self) -> bool {
        self.retry_count > 0
    }

    pub fn duration_seconds(&self) -> f64 {
        self.target_duration_seconds.unwrap_or(0.0)
    }

    /// Records a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>) {
        self.retry_count += 1;
        self.last_error = Some(error.into());
    }
}

/// Terminal result of one scene. Produced exactly once per scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneOutcome {
    pub scene_id: String,
    pub index: usize,
    pub status: SceneStatus,
    /// Present iff `status` is `Ready`.
    pub media_url: Option<String>,
    pub duration_seconds: f64,
    pub retry_count: u32,
    /// Last error message when `status` is `Error`.
    pub error: Option<String>,
}

impl SceneOutcome {
    pub fn ready(task: &SceneTask, media_url: impl Into<String>) -> Self {
        Self {
            scene_id: task.scene_id.clone(),
            index: task.index,
            status: SceneStatus::Ready,
            media_url: Some(media_url.into()),
            duration_seconds: task.duration_seconds(),
            retry_count: task.retry_count,
            error: None,
        }
    }

    pub fn failed(task: &SceneTask, error: impl Into<String>) -> Self {
        Self {
            scene_id: task.scene_id.clone(),
            index: task.index,
            status: SceneStatus::Error,
            media_url: None,
            duration_seconds: task.duration_seconds(),
            retry_count: task.retry_count,
            error: Some(error.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == SceneStatus::Ready
    }
}

/// State of one production run, owned by the orchestrator.
#[derive(Debug)]
pub struct ProjectState {
    pub project_id: String,
    pub user_prompt: String,
    pub target_duration_seconds: f64,
    pub status: ProjectStatus,
    pub scenes: Vec<SceneTask>,
    /// Created when planning fixes the scene list.
    pub completed: Option<Arc<OutcomeAccumulator>>,
    pub created_at: DateTime<Utc>,
}

impl ProjectState {
    pub fn new(user_prompt: impl Into<String>, target_duration_seconds: f64) -> Self {
        Self {
            project_id: Uuid::new_v4().to_string(),
            user_prompt: user_prompt.into(),
            target_duration_seconds,
            status: ProjectStatus::Creating,
            scenes: Vec::new(),
            completed: None,
            created_at: Utc::now(),
        }
    }

    /// Moves the project to `next`, rejecting backward transitions.
    pub fn transition(&mut self, next: ProjectStatus) -> Result<(), ProductionError> {
        if !self.status.can_transition_to(next) {
            return Err(ProductionError::InvalidTransition {
                from: self.status,
                to: next,
            });
        }
        self.status = next;
        Ok(())
    }

    /// Fixes the scene list and creates the outcome accumulator sized to it.
    ///
    /// Can only be called once per project.
    pub fn fix_scenes(
        &mut self,
        scenes: Vec<SceneTask>,
    ) -> Result<Arc<OutcomeAccumulator>, ProductionError> {
        if self.completed.is_some() {
            return Err(ProductionError::InvalidInput(
                "scene list is already fixed".to_string(),
            ));
        }
        let accumulator = Arc::new(OutcomeAccumulator::new(
            scenes.iter().map(|s| s.scene_id.clone()),
        ));
        self.scenes = scenes;
        self.completed = Some(Arc::clone(&accumulator));
        Ok(accumulator)
    }
}

/// Final, project-level result of a production run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectOutcome {
    pub project_id: String,
    pub status: ProjectStatus,
    /// Scene outcomes in planning order.
    pub scenes: Vec<SceneOutcome>,
    pub elapsed_ms: u64,
}

impl ProjectOutcome {
    pub fn new(
        project_id: impl Into<String>,
        status: ProjectStatus,
        mut scenes: Vec<SceneOutcome>,
        elapsed: Duration,
    ) -> Self {
        scenes.sort_by_key(|s| s.index);
        Self {
            project_id: project_id.into(),
            status,
            scenes,
            elapsed_ms: elapsed.as_millis() as u64,
        }
    }

    pub fn ready_scenes(&self) -> usize {
        self.scenes.iter().filter(|s| s.is_ready()).count()
    }

    pub fn failed_scenes(&self) -> usize {
        self.scenes.len() - self.ready_scenes()
    }

    /// True when the project finished but at least one scene failed.
    pub fn is_partial(&self) -> bool {
        self.status == ProjectStatus::Ready && self.failed_scenes() > 0
    }
}
