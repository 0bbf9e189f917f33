//! Scene production core.
//!
//! This module turns one user prompt into a set of rendered scenes:
//!
//! - [`ProductionOrchestrator`]: plans the prompt, fans scenes out and
//!   collects their outcomes into a [`ProjectOutcome`]
//! - [`SceneExecutor`]: drives one scene through asset, content and render
//!   phases with retries
//! - [`RetryPolicy`]: decides retry vs. terminal failure and builds
//!   corrective feedback from the last error
//! - [`RenderPool`]: bounds how many scenes hold the heavy render step
//! - [`ChannelBroadcaster`] / [`LogBroadcaster`]: deliver
//!   [`ProductionEvent`]s
//!
//! # Example
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use scene_forge::production::{ChannelBroadcaster, ProductionConfig, ProductionOrchestrator};
//! use scene_forge::provider::StudioProvider;
//! use scene_forge::storage::MemoryStore;
//!
//! let config = ProductionConfig::from_env()?;
//! let provider = StudioProvider::from_settings(&config.provider, config.provider_timeout)?;
//! let orchestrator = ProductionOrchestrator::new(
//!     config,
//!     Arc::new(provider),
//!     Arc::new(MemoryStore::new()),
//!     Arc::new(ChannelBroadcaster::default()),
//! )?;
//!
//! let outcome = orchestrator.run("explain gravity", Some(60.0)).await?;
//! println!("{} of {} scenes ready", outcome.ready_scenes(), outcome.scenes.len());
//! ```

pub mod accumulator;
pub mod config;
pub mod dispatch;
pub mod events;
pub mod executor;
pub mod orchestrator;
pub mod pool;
pub mod progress;
pub mod retry;
pub mod types;

pub use accumulator::{AccumulatorError, OutcomeAccumulator};
pub use config::{ConfigError, ProductionConfig};
pub use dispatch::{DispatchStats, SceneDispatcher};
pub use events::{
    BroadcastError, ChannelBroadcaster, EventBroadcaster, LogBroadcaster, PlannedScene,
    ProductionEvent, DEFAULT_EVENT_CAPACITY,
};
pub use executor::{SceneError, SceneExecutor};
pub use orchestrator::{ProductionError, ProductionOrchestrator};
pub use pool::{PoolError, PoolStats, RenderPermit, RenderPool, DEFAULT_RENDER_CONCURRENCY};
pub use progress::{ProgressCounters, ProgressMonitor, ProgressSnapshot};
pub use retry::{
    default_feedback_rules, FeedbackRule, RetryDecision, RetryPolicy, DEFAULT_MAX_ATTEMPTS,
    GENERIC_HINT,
};
pub use types::{
    ProjectOutcome, ProjectState, ProjectStatus, ScenePhase, SceneOutcome, SceneStatus, SceneTask,
};
