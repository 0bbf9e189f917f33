//! Fan-out/fan-in orchestrator for production runs.
//!
//! A run plans the prompt into scenes, fans one task per scene out to the
//! dispatcher, waits until every scene has reported exactly one outcome and
//! then finalizes the project. Planning failure is the only error that
//! aborts a run; scene failures end up in the [`ProjectOutcome`].

use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use futures::future::try_join_all;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::accumulator::AccumulatorError;
use super::config::{ConfigError, ProductionConfig};
use super::dispatch::SceneDispatcher;
use super::events::{EventBroadcaster, PlannedScene, ProductionEvent};
use super::executor::SceneExecutor;
use super::pool::RenderPool;
use super::progress::{ProgressCounters, ProgressMonitor};
use super::types::{ProjectOutcome, ProjectState, ProjectStatus, SceneTask};
use crate::error::{ProviderError, StorageError};
use crate::metrics::MetricsCollector;
use crate::provider::{GenerationProvider, SceneSpec};
use crate::storage::{ProjectRecord, SceneRecord, SceneStore};

/// Errors that abort a production run.
#[derive(Debug, Error)]
pub enum ProductionError {
    /// Planning failed; no scene was scheduled.
    #[error("Planning failed: {0}")]
    Planning(#[source] ProviderError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Production run cancelled")]
    Cancelled,

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid project transition from {from} to {to}")]
    InvalidTransition {
        from: ProjectStatus,
        to: ProjectStatus,
    },

    #[error("Outcome accumulator error: {0}")]
    Accumulator(#[from] AccumulatorError),
}

/// Coordinates planning, scene fan-out and project finalization.
///
/// The render pool is shared by every run of one orchestrator, so
/// concurrent projects compete for the same render slots.
pub struct ProductionOrchestrator {
    config: Arc<ProductionConfig>,
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn SceneStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    pool: RenderPool,
    metrics: MetricsCollector,
}

impl ProductionOrchestrator {
    pub fn new(
        config: ProductionConfig,
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn SceneStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
    ) -> Result<Self, ProductionError> {
        config.validate()?;
        let pool = RenderPool::new(config.render_concurrency);

        Ok(Self {
            config: Arc::new(config),
            provider,
            store,
            broadcaster,
            pool,
            metrics: MetricsCollector::new(),
        })
    }

    pub fn config(&self) -> &ProductionConfig {
        &self.config
    }

    pub fn pool(&self) -> &RenderPool {
        &self.pool
    }

    pub fn store(&self) -> &Arc<dyn SceneStore> {
        &self.store
    }

    /// Creates and persists a new project.
    ///
    /// `target_duration_seconds` falls back to the configured default.
    pub async fn create_project(
        &self,
        prompt: &str,
        target_duration_seconds: Option<f64>,
    ) -> Result<ProjectState, ProductionError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(ProductionError::InvalidInput(
                "prompt cannot be empty".to_string(),
            ));
        }

        let target = target_duration_seconds.unwrap_or(self.config.default_target_duration_seconds);
        if !target.is_finite() || target <= 0.0 {
            return Err(ProductionError::InvalidInput(format!(
                "target duration must be positive, got {}",
                target
            )));
        }

        let state = ProjectState::new(prompt, target);
        self.store.save_project(&ProjectRecord::from(&state)).await?;
        info!(project_id = %state.project_id, target_duration = target, "Project created");
        Ok(state)
    }

    /// Creates a project and runs it to completion.
    pub async fn run(
        &self,
        prompt: &str,
        target_duration_seconds: Option<f64>,
    ) -> Result<ProjectOutcome, ProductionError> {
        self.run_with_cancel(prompt, target_duration_seconds, &CancellationToken::new())
            .await
    }

    pub async fn run_with_cancel(
        &self,
        prompt: &str,
        target_duration_seconds: Option<f64>,
        cancel: &CancellationToken,
    ) -> Result<ProjectOutcome, ProductionError> {
        let state = self.create_project(prompt, target_duration_seconds).await?;
        self.run_project(state, cancel).await
    }

    /// Plans the prompt into scene tasks without persisting anything.
    ///
    /// Never returns an empty list: an empty plan becomes one fallback scene
    /// built from the prompt. Scenes without an explicit duration get an
    /// equal share of the target.
    pub async fn plan_scenes(
        &self,
        project_id: &str,
        prompt: &str,
        target_duration_seconds: f64,
        cancel: &CancellationToken,
    ) -> Result<Vec<SceneTask>, ProductionError> {
        let started = Instant::now();
        let timeout = self.config.provider_timeout;
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(ProductionError::Cancelled),
            result = tokio::time::timeout(timeout, self.provider.plan(prompt, target_duration_seconds)) => result,
        };

        let result = match result {
            Ok(inner) => inner,
            Err(_) => Err(ProviderError::Timeout(timeout)),
        };
        self.metrics
            .record_provider_call("plan", result.is_ok(), started.elapsed().as_secs_f64());

        let mut specs = result.map_err(ProductionError::Planning)?;
        if specs.is_empty() {
            warn!(project_id = %project_id, "Planner returned no scenes, using fallback scene");
            specs.push(SceneSpec::fallback(prompt));
        }

        let per_scene = target_duration_seconds / specs.len().max(1) as f64;
        Ok(specs
            .into_iter()
            .enumerate()
            .map(|(index, spec)| SceneTask::from_spec(project_id, index, spec, per_scene))
            .collect())
    }

    /// Runs a created project to a terminal status.
    ///
    /// Returns `Err` only when the run aborts before scenes are scheduled
    /// (planning failure, cancellation during planning, storage failure
    /// while fixing the plan). In every case `project_complete` is published.
    pub async fn run_project(
        &self,
        mut state: ProjectState,
        cancel: &CancellationToken,
    ) -> Result<ProjectOutcome, ProductionError> {
        let started = Instant::now();
        let project_id = state.project_id.clone();

        self.set_status(&mut state, ProjectStatus::Planning).await?;
        info!(project_id = %project_id, prompt = %state.user_prompt, "Planning project");

        let planned = self
            .plan_scenes(
                &project_id,
                &state.user_prompt,
                state.target_duration_seconds,
                cancel,
            )
            .await;
        let tasks = match planned {
            Ok(tasks) => tasks,
            Err(err) => return Err(self.abort(&mut state, err).await),
        };

        let accumulator = state.fix_scenes(tasks)?;
        let records: Vec<SceneRecord> = state.scenes.iter().map(SceneRecord::from).collect();
        let store = &self.store;
        if let Err(err) = try_join_all(records.iter().map(|r| store.save_scene(r))).await {
            return Err(self.abort(&mut state, err.into()).await);
        }

        self.publish(
            &project_id,
            ProductionEvent::ScenesPlanned {
                scenes: state.scenes.iter().map(PlannedScene::from).collect(),
            },
        )
        .await;
        self.set_status(&mut state, ProjectStatus::Generating).await?;
        info!(project_id = %project_id, scenes = state.scenes.len(), "Scenes planned");

        let counters = ProgressCounters::new();
        counters.planned.store(state.scenes.len(), Ordering::Relaxed);
        let monitor = ProgressMonitor::start(
            project_id.clone(),
            counters.clone(),
            self.config.progress_interval,
        );

        let executor = SceneExecutor::new(
            &self.config,
            Arc::clone(&self.provider),
            Arc::clone(&self.store),
            Arc::clone(&self.broadcaster),
            self.pool.clone(),
        )
        .with_counters(counters);
        let dispatcher = SceneDispatcher::new(executor, self.config.max_parallel_scenes);
        let stats = dispatcher
            .dispatch(state.scenes.clone(), Arc::clone(&accumulator), cancel)
            .await;
        accumulator.wait_complete().await;
        monitor.stop().await;

        let outcomes = accumulator.snapshot();
        let failed = outcomes.iter().filter(|o| !o.is_ready()).count();
        let cancelled = cancel.is_cancelled();
        let status = if cancelled || (self.config.fail_on_scene_error && failed > 0) {
            ProjectStatus::Error
        } else {
            ProjectStatus::Ready
        };

        self.set_status(&mut state, status).await?;
        self.publish(
            &project_id,
            ProductionEvent::ProjectComplete {
                project_id: project_id.clone(),
            },
        )
        .await;
        self.metrics.record_project(status.as_str());

        let outcome = ProjectOutcome::new(&project_id, status, outcomes, started.elapsed());
        info!(
            project_id = %project_id,
            status = %status,
            ready = outcome.ready_scenes(),
            failed = outcome.failed_scenes(),
            cancelled = cancelled,
            workers = stats.num_workers,
            elapsed_ms = outcome.elapsed_ms,
            "Project complete"
        );
        Ok(outcome)
    }

    /// Marks the project failed, announces completion and returns `err`.
    async fn abort(&self, state: &mut ProjectState, err: ProductionError) -> ProductionError {
        error!(project_id = %state.project_id, error = %err, "Project failed");
        if let Err(e) = self.set_status(state, ProjectStatus::Error).await {
            warn!(project_id = %state.project_id, error = %e, "Failed to mark project as failed");
        }
        self.publish(
            &state.project_id,
            ProductionEvent::ProjectComplete {
                project_id: state.project_id.clone(),
            },
        )
        .await;
        self.metrics.record_project(ProjectStatus::Error.as_str());
        err
    }

    /// Moves the project to `status` and persists it best-effort.
    async fn set_status(
        &self,
        state: &mut ProjectState,
        status: ProjectStatus,
    ) -> Result<(), ProductionError> {
        state.transition(status)?;
        if let Err(e) = self
            .store
            .update_project_status(&state.project_id, status)
            .await
        {
            warn!(project_id = %state.project_id, error = %e, "Failed to persist project status");
        }
        Ok(())
    }

    async fn publish(&self, project_id: &str, event: ProductionEvent) {
        if let Err(e) = self.broadcaster.publish(project_id, event).await {
            warn!(project_id = %project_id, error = %e, "Failed to publish project event");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::production::events::LogBroadcaster;
    use crate::provider::{AssetRef, ContentRef};
    use crate::storage::MemoryStore;
    use async_trait::async_trait;

    struct FixedPlan(Vec<SceneSpec>);

    #[async_trait]
    impl GenerationProvider for FixedPlan {
        async fn plan(&self, _: &str, _: f64) -> Result<Vec<SceneSpec>, ProviderError> {
            Ok(self.0.clone())
        }

        async fn generate_asset(&self, _: &str, _: &str) -> Result<AssetRef, ProviderError> {
            Ok(AssetRef::new("a.png"))
        }

        async fn generate_content(
            &self,
            _: &SceneTask,
            _: Option<&str>,
        ) -> Result<ContentRef, ProviderError> {
            Ok(ContentRef::new("code"))
        }

        async fn render(&self, task: &SceneTask, _: &ContentRef) -> Result<String, ProviderError> {
            Ok(format!("/media/{}/scene_{}.mp4", task.project_id, task.index))
        }
    }

    fn orchestrator(plan: Vec<SceneSpec>) -> ProductionOrchestrator {
        ProductionOrchestrator::new(
            ProductionConfig::default(),
            Arc::new(FixedPlan(plan)),
            Arc::new(MemoryStore::new()),
            Arc::new(LogBroadcaster),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_create_project_validates_input() {
        let orch = orchestrator(Vec::new());
        assert!(matches!(
            orch.create_project("   ", Some(60.0)).await,
            Err(ProductionError::InvalidInput(_))
        ));
        assert!(matches!(
            orch.create_project("gravity", Some(0.0)).await,
            Err(ProductionError::InvalidInput(_))
        ));

        let state = orch.create_project("gravity", None).await.unwrap();
        assert!((state.target_duration_seconds - 60.0).abs() < f64::EPSILON);
        let stored = orch.store().get_project(&state.project_id).await.unwrap();
        assert_eq!(stored.status, ProjectStatus::Creating);
    }

    #[tokio::test]
    async fn test_plan_scenes_keeps_explicit_durations() {
        let orch = orchestrator(vec![
            SceneSpec::new("A", "a"),
            SceneSpec::new("B", "b").with_duration(5.0),
        ]);
        let tasks = orch
            .plan_scenes("p", "prompt", 30.0, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(tasks.len(), 2);
        assert_eq!(tasks[0].target_duration_seconds, Some(15.0));
        assert_eq!(tasks[1].target_duration_seconds, Some(5.0));
        assert_eq!(tasks[1].index, 1);
    }

    #[tokio::test]
    async fn test_empty_plan_gets_fallback_scene() {
        let orch = orchestrator(Vec::new());
        let outcome = orch.run("draw a circle", Some(12.0)).await.unwrap();

        assert_eq!(outcome.status, ProjectStatus::Ready);
        assert_eq!(outcome.scenes.len(), 1);
        assert!((outcome.scenes[0].duration_seconds - 12.0).abs() < f64::EPSILON);

        let scenes = orch.store().list_scenes(&outcome.project_id).await.unwrap();
        assert_eq!(scenes[0].title, "Scene 1");
        assert_eq!(scenes[0].description, "draw a circle");
    }

    #[tokio::test]
    async fn test_invalid_config_is_rejected() {
        let result = ProductionOrchestrator::new(
            ProductionConfig::default().with_render_concurrency(0),
            Arc::new(FixedPlan(Vec::new())),
            Arc::new(MemoryStore::new()),
            Arc::new(LogBroadcaster),
        );
        assert!(matches!(result, Err(ProductionError::Config(_))));
    }
}
