//! Persistence for projects and scenes.
//!
//! The production core only needs idempotent upserts keyed by project and
//! scene id, expressed by the [`SceneStore`] trait. Two implementations ship:
//!
//! - [`MemoryStore`]: process-local maps, used by tests and dry runs
//! - [`SqliteStore`]: a SQLite file via sqlx, used by the CLI
//!
//! ```rust,ignore
//! use scene_forge::storage::{SceneStore, SqliteStore};
//!
//! let store = SqliteStore::open("scene-forge.db").await?;
//! let project = store.get_project(&project_id).await?;
//! for scene in store.list_scenes(&project_id).await? {
//!     println!("{} {}", scene.index, scene.status);
//! }
//! ```

pub mod memory;
pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::production::{ProjectState, ProjectStatus, SceneStatus, SceneTask};

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

/// Stored view of a project.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProjectRecord {
    pub project_id: String,
    pub user_prompt: String,
    pub target_duration_seconds: f64,
    pub status: ProjectStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&ProjectState> for ProjectRecord {
    fn from(state: &ProjectState) -> Self {
        Self {
            project_id: state.project_id.clone(),
            user_prompt: state.user_prompt.clone(),
            target_duration_seconds: state.target_duration_seconds,
            status: state.status,
            created_at: state.created_at,
            updated_at: Utc::now(),
        }
    }
}

/// Stored view of a scene.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneRecord {
    pub scene_id: String,
    pub project_id: String,
    pub index: usize,
    pub title: String,
    pub description: String,
    pub visual_plan: String,
    pub voiceover: Option<String>,
    pub asset_prompt: Option<String>,
    pub target_duration_seconds: Option<f64>,
    pub status: SceneStatus,
    pub retry_count: u32,
    pub last_error: Option<String>,
    pub asset_path: Option<String>,
    /// Latest generated content, saved before rendering.
    pub content: Option<String>,
    pub media_url: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl From<&SceneTask> for SceneRecord {
    fn from(task: &SceneTask) -> Self {
        Self {
            scene_id: task.scene_id.clone(),
            project_id: task.project_id.clone(),
            index: task.index,
            title: task.title.clone(),
            description: task.description.clone(),
            visual_plan: task.visual_plan.clone(),
            voiceover: task.voiceover.clone(),
            asset_prompt: task.asset_prompt.clone(),
            target_duration_seconds: task.target_duration_seconds,
            status: task.status,
            retry_count: task.retry_count,
            last_error: task.last_error.clone(),
            asset_path: task.asset.as_ref().map(|a| a.path.clone()),
            content: task.content.as_ref().map(|c| c.content.clone()),
            media_url: None,
            updated_at: Utc::now(),
        }
    }
}

/// Optional columns written together with a scene status change.
///
/// `None` leaves the stored value untouched.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SceneFields {
    pub retry_count: Option<u32>,
    pub last_error: Option<String>,
    pub asset_path: Option<String>,
    pub content: Option<String>,
    pub media_url: Option<String>,
}

impl SceneFields {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_count(mut self, retry_count: u32) -> Self {
        self.retry_count = Some(retry_count);
        self
    }

    pub fn with_last_error(mut self, error: impl Into<String>) -> Self {
        self.last_error = Some(error.into());
        self
    }

    pub fn with_asset_path(mut self, path: impl Into<String>) -> Self {
        self.asset_path = Some(path.into());
        self
    }

    pub fn with_content(mut self, content: impl Into<String>) -> Self {
        self.content = Some(content.into());
        self
    }

    pub fn with_media_url(mut self, url: impl Into<String>) -> Self {
        self.media_url = Some(url.into());
        self
    }

    /// Applies the set fields to `record`.
    pub fn apply_to(&self, record: &mut SceneRecord) {
        if let Some(n) = self.retry_count {
            record.retry_count = n;
        }
        if let Some(ref e) = self.last_error {
            record.last_error = Some(e.clone());
        }
        if let Some(ref p) = self.asset_path {
            record.asset_path = Some(p.clone());
        }
        if let Some(ref c) = self.content {
            record.content = Some(c.clone());
        }
        if let Some(ref u) = self.media_url {
            record.media_url = Some(u.clone());
        }
    }
}

/// Persistence operations used by the production core.
///
/// All writes are idempotent upserts.
#[async_trait]
pub trait SceneStore: Send + Sync {
    async fn save_project(&self, project: &ProjectRecord) -> Result<(), StorageError>;

    async fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<(), StorageError>;

    /// Fails with `ProjectNotFound` for unknown ids.
    async fn get_project(&self, project_id: &str) -> Result<ProjectRecord, StorageError>;

    async fn save_scene(&self, scene: &SceneRecord) -> Result<(), StorageError>;

    /// Fails with `SceneNotFound` for unknown ids.
    async fn update_scene_status(
        &self,
        scene_id: &str,
        status: SceneStatus,
        fields: SceneFields,
    ) -> Result<(), StorageError>;

    /// Scenes of a project in planning order.
    async fn list_scenes(&self, project_id: &str) -> Result<Vec<SceneRecord>, StorageError>;

    async fn count_scenes(&self, project_id: &str) -> Result<usize, StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::{AssetRef, SceneSpec};

    #[test]
    fn test_scene_fields_apply_only_set_values() {
        let mut task = SceneTask::from_spec("p", 0, SceneSpec::new("A", "a"), 10.0);
        task.asset = Some(AssetRef::new("/a.png"));
        let mut record = SceneRecord::from(&task);
        assert_eq!(record.asset_path.as_deref(), Some("/a.png"));

        SceneFields::new()
            .with_media_url("/media/p/scene_0.mp4")
            .with_retry_count(2)
            .apply_to(&mut record);

        assert_eq!(record.media_url.as_deref(), Some("/media/p/scene_0.mp4"));
        assert_eq!(record.retry_count, 2);
        assert_eq!(record.asset_path.as_deref(), Some("/a.png"));
        assert!(record.last_error.is_none());
    }

    #[test]
    fn test_project_record_from_state() {
        let state = ProjectState::new("explain gravity", 60.0);
        let record = ProjectRecord::from(&state);
        assert_eq!(record.project_id, state.project_id);
        assert_eq!(record.status, ProjectStatus::Creating);
        assert_eq!(record.created_at, state.created_at);
    }
}
