//! Scene task executor.
//!
//! Runs one scene from its first attempt to a terminal outcome:
//!
//! ```text
//! Queued -> (GeneratingAssets) -> GeneratingContent -> Rendering -> Ready
//!                                        ^                 |
//!                                        +--- Retrying <---+--> Error
//! ```
//!
//! Retries are a loop inside [`SceneExecutor::execute`], so each scene
//! yields exactly one [`SceneOutcome`] however many attempts it takes. The
//! render permit is held from content generation through rendering and is
//! released at the end of every attempt, whichever way it ends.

use std::future::Future;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::config::ProductionConfig;
use super::events::{EventBroadcaster, ProductionEvent};
use super::pool::{PoolError, RenderPermit, RenderPool};
use super::progress::{GaugeGuard, ProgressCounters};
use super::retry::{RetryDecision, RetryPolicy};
use super::types::{ScenePhase, SceneOutcome, SceneStatus, SceneTask};
use crate::error::ProviderError;
use crate::metrics::MetricsCollector;
use crate::provider::GenerationProvider;
use crate::storage::{SceneFields, SceneStore};

/// Why a scene attempt failed.
///
/// The display string is stored as the scene's `last_error` and is what the
/// retry policy classifies.
#[derive(Debug, Error)]
pub enum SceneError {
    #[error("{0}")]
    Asset(ProviderError),

    #[error("{0}")]
    Generation(ProviderError),

    #[error("{0}")]
    Render(ProviderError),

    #[error("Timed out after {0:?} waiting for a render slot")]
    ResourceTimeout(Duration),

    #[error("Render pool is closed")]
    ResourceClosed,

    #[error("{operation} call timed out after {after:?}")]
    ProviderTimeout {
        operation: &'static str,
        after: Duration,
    },

    #[error("cancelled")]
    Cancelled,
}

impl SceneError {
    /// Whether the retry policy should be consulted at all.
    pub fn is_retryable(&self) -> bool {
        !matches!(self, SceneError::Cancelled | SceneError::ResourceClosed)
    }
}

impl From<PoolError> for SceneError {
    fn from(err: PoolError) -> Self {
        match err {
            PoolError::Timeout(limit) => SceneError::ResourceTimeout(limit),
            PoolError::Cancelled => SceneError::Cancelled,
            PoolError::Closed => SceneError::ResourceClosed,
        }
    }
}

/// Runs scene tasks against a provider, sharing one render pool.
#[derive(Clone)]
pub struct SceneExecutor {
    provider: Arc<dyn GenerationProvider>,
    store: Arc<dyn SceneStore>,
    broadcaster: Arc<dyn EventBroadcaster>,
    pool: RenderPool,
    policy: RetryPolicy,
    provider_timeout: Duration,
    permit_timeout: Option<Duration>,
    counters: ProgressCounters,
    metrics: MetricsCollector,
}

impl SceneExecutor {
    pub fn new(
        config: &ProductionConfig,
        provider: Arc<dyn GenerationProvider>,
        store: Arc<dyn SceneStore>,
        broadcaster: Arc<dyn EventBroadcaster>,
        pool: RenderPool,
    ) -> Self {
        Self {
            provider,
            store,
            broadcaster,
            pool,
            policy: config.retry_policy(),
            provider_timeout: config.provider_timeout,
            permit_timeout: config.permit_timeout,
            counters: ProgressCounters::new(),
            metrics: MetricsCollector::new(),
        }
    }

    /// Shares `counters` with a progress monitor.
    pub fn with_counters(mut self, counters: ProgressCounters) -> Self {
        self.counters = counters;
        self
    }

    pub fn pool(&self) -> &RenderPool {
        &self.pool
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Drives `task` to a terminal outcome.
    ///
    /// Never fails: provider errors are retried per policy and end up in the
    /// returned outcome. Cancellation ends the scene as `Error` with the
    /// message "cancelled" and no further attempts.
    pub async fn execute(&self, mut task: SceneTask, cancel: &CancellationToken) -> SceneOutcome {
        let _in_flight = GaugeGuard::enter(&self.counters.in_flight);
        let mut feedback: Option<String> = None;

        task.status = SceneStatus::InProgress;
        self.persist(&task, SceneStatus::InProgress, SceneFields::new())
            .await;

        loop {
            if cancel.is_cancelled() {
                return self.finish_cancelled(task).await;
            }

            if !task.is_retry() && task.asset.is_none() {
                if let Some(prompt) = task.asset_prompt.clone() {
                    self.prepare_asset(&mut task, &prompt, cancel).await;
                    if cancel.is_cancelled() {
                        return self.finish_cancelled(task).await;
                    }
                }
            }

            let attempt = task.attempt_index();
            debug!(scene_id = %task.scene_id, attempt = attempt, "Starting scene attempt");

            let err = match self.attempt(&mut task, feedback.as_deref(), cancel).await {
                Ok(media_url) => return self.finish_ready(task, media_url).await,
                Err(err) => err,
            };

            if !err.is_retryable() {
                if matches!(err, SceneError::Cancelled) {
                    return self.finish_cancelled(task).await;
                }
                task.record_failure(err.to_string());
                return self.finish_failed(task).await;
            }

            let message = err.to_string();
            task.record_failure(&message);

            match self.policy.decide(attempt, &message) {
                RetryDecision::Retry {
                    category,
                    feedback: next,
                } => {
                    warn!(
                        scene_id = %task.scene_id,
                        attempt = attempt,
                        retry_count = task.retry_count,
                        category = category.as_deref().unwrap_or("unclassified"),
                        error = %message,
                        "Scene attempt failed, retrying"
                    );
                    self.counters.retries.fetch_add(1, Ordering::Relaxed);
                    self.metrics.record_retry(category.as_deref());
                    self.persist(
                        &task,
                        SceneStatus::InProgress,
                        SceneFields::new()
                            .with_retry_count(task.retry_count)
                            .with_last_error(&message),
                    )
                    .await;
                    self.emit(
                        &task,
                        ScenePhase::Retrying,
                        Some(format!(
                            "Attempt {} failed, retrying ({}/{})",
                            attempt + 1,
                            task.retry_count,
                            self.policy.max_attempts() - 1
                        )),
                    )
                    .await;
                    feedback = Some(next);
                }
                RetryDecision::Terminal => return self.finish_failed(task).await,
            }
        }
    }

    /// One content-generation and render pass under a render permit.
    async fn attempt(
        &self,
        task: &mut SceneTask,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, SceneError> {
        let permit = self.acquire_permit(task, cancel).await?;
        let result = self.generate_and_render(task, feedback, cancel).await;
        debug!(
            scene_id = %task.scene_id,
            held_ms = permit.held_for().as_millis() as u64,
            success = result.is_ok(),
            "Releasing render slot"
        );
        result
    }

    async fn generate_and_render(
        &self,
        task: &mut SceneTask,
        feedback: Option<&str>,
        cancel: &CancellationToken,
    ) -> Result<String, SceneError> {
        self.emit(
            task,
            ScenePhase::GeneratingContent,
            Some("Generating scene content".to_string()),
        )
        .await;
        let content = self
            .call_provider(
                "content",
                cancel,
                self.provider.generate_content(task, feedback),
                SceneError::Generation,
            )
            .await?;

        // Saved before rendering so a failed render keeps the content.
        task.content = Some(content.clone());
        self.persist(
            task,
            SceneStatus::InProgress,
            SceneFields::new().with_content(&content.content),
        )
        .await;

        self.emit(task, ScenePhase::Rendering, Some("Rendering scene".to_string()))
            .await;
        let _rendering = GaugeGuard::enter(&self.counters.rendering);
        self.call_provider(
            "render",
            cancel,
            self.provider.render(task, &content),
            SceneError::Render,
        )
        .await
    }

    async fn acquire_permit(
        &self,
        task: &SceneTask,
        cancel: &CancellationToken,
    ) -> Result<RenderPermit, SceneError> {
        if let Some(permit) = self.pool.try_acquire() {
            return Ok(permit);
        }

        self.emit(
            task,
            ScenePhase::Queued,
            Some("Waiting for a render slot".to_string()),
        )
        .await;
        Ok(self.pool.acquire_with(cancel, self.permit_timeout).await?)
    }

    /// Best-effort asset generation; failures only drop the asset.
    async fn prepare_asset(&self, task: &mut SceneTask, prompt: &str, cancel: &CancellationToken) {
        self.emit(
            task,
            ScenePhase::GeneratingAssets,
            Some("Generating image asset".to_string()),
        )
        .await;

        let result = self
            .call_provider(
                "asset",
                cancel,
                self.provider.generate_asset(&task.project_id, prompt),
                SceneError::Asset,
            )
            .await;

        match result {
            Ok(asset) => {
                self.persist(
                    task,
                    SceneStatus::InProgress,
                    SceneFields::new().with_asset_path(&asset.path),
                )
                .await;
                task.asset = Some(asset);
            }
            Err(SceneError::Cancelled) => {
                debug!(scene_id = %task.scene_id, "Asset generation cancelled");
            }
            Err(err) => {
                warn!(
                    scene_id = %task.scene_id,
                    error = %err,
                    "Asset generation failed, continuing without it"
                );
            }
        }
    }

    /// Runs a provider call bounded by the provider timeout and `cancel`.
    async fn call_provider<T, F>(
        &self,
        operation: &'static str,
        cancel: &CancellationToken,
        call: F,
        wrap: fn(ProviderError) -> SceneError,
    ) -> Result<T, SceneError>
    where
        F: Future<Output = Result<T, ProviderError>>,
    {
        let started = Instant::now();
        let result = tokio::select! {
            biased;
            _ = cancel.cancelled() => return Err(SceneError::Cancelled),
            result = tokio::time::timeout(self.provider_timeout, call) => result,
        };

        let result = match result {
            Ok(Ok(value)) => Ok(value),
            Ok(Err(err)) => Err(wrap(err)),
            Err(_) => Err(SceneError::ProviderTimeout {
                operation,
                after: self.provider_timeout,
            }),
        };
        self.metrics.record_provider_call(
            operation,
            result.is_ok(),
            started.elapsed().as_secs_f64(),
        );
        result
    }

    async fn finish_ready(&self, mut task: SceneTask, media_url: String) -> SceneOutcome {
        task.status = SceneStatus::Ready;
        self.persist(
            &task,
            SceneStatus::Ready,
            SceneFields::new()
                .with_retry_count(task.retry_count)
                .with_media_url(&media_url),
        )
        .await;
        self.publish(
            &task,
            ProductionEvent::SceneUpdate {
                scene_id: task.scene_id.clone(),
                status: ScenePhase::Ready,
                progress_message: Some("Scene ready".to_string()),
                media_url: Some(media_url.clone()),
            },
        )
        .await;

        self.counters.ready.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .record_scene(SceneStatus::Ready.as_str(), task.retry_count + 1);
        info!(
            scene_id = %task.scene_id,
            index = task.index,
            retry_count = task.retry_count,
            media_url = %media_url,
            "Scene ready"
        );
        SceneOutcome::ready(&task, media_url)
    }

    async fn finish_failed(&self, mut task: SceneTask) -> SceneOutcome {
        let message = task
            .last_error
            .clone()
            .unwrap_or_else(|| "unknown error".to_string());
        task.status = SceneStatus::Error;
        self.persist(
            &task,
            SceneStatus::Error,
            SceneFields::new()
                .with_retry_count(task.retry_count)
                .with_last_error(&message),
        )
        .await;
        self.emit(&task, ScenePhase::Error, Some(message.clone()))
            .await;

        self.counters.failed.fetch_add(1, Ordering::Relaxed);
        self.metrics
            .record_scene(SceneStatus::Error.as_str(), task.retry_count.max(1));
        warn!(
            scene_id = %task.scene_id,
            index = task.index,
            retry_count = task.retry_count,
            error = %message,
            "Scene failed"
        );
        SceneOutcome::failed(&task, message)
    }

    async fn finish_cancelled(&self, mut task: SceneTask) -> SceneOutcome {
        task.last_error = Some(SceneError::Cancelled.to_string());
        self.finish_failed(task).await
    }

    async fn persist(&self, task: &SceneTask, status: SceneStatus, fields: SceneFields) {
        if let Err(e) = self
            .store
            .update_scene_status(&task.scene_id, status, fields)
            .await
        {
            warn!(scene_id = %task.scene_id, error = %e, "Failed to persist scene state");
        }
    }

    async fn emit(&self, task: &SceneTask, phase: ScenePhase, message: Option<String>) {
        self.publish(
            task,
            ProductionEvent::scene_update(&task.scene_id, phase, message),
        )
        .await;
    }

    async fn publish(&self, task: &SceneTask, event: ProductionEvent) {
        if let Err(e) = self.broadcaster.publish(&task.project_id, event).await {
            warn!(scene_id = %task.scene_id, error = %e, "Failed to publish scene event");
        }
    }
}
