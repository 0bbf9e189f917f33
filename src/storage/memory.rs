//! In-memory [`SceneStore`].

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use super::{ProjectRecord, SceneFields, SceneRecord, SceneStore};
use crate::error::StorageError;
use crate::production::{ProjectStatus, SceneStatus};

#[derive(Debug, Default)]
pub struct MemoryStore {
    projects: RwLock<HashMap<String, ProjectRecord>>,
    scenes: RwLock<HashMap<String, SceneRecord>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a stored scene, if any.
    pub async fn scene(&self, scene_id: &str) -> Option<SceneRecord> {
        self.scenes.read().await.get(scene_id).cloned()
    }
}

#[async_trait]
impl SceneStore for MemoryStore {
    async fn save_project(&self, project: &ProjectRecord) -> Result<(), StorageError> {
        self.projects
            .write()
            .await
            .insert(project.project_id.clone(), project.clone());
        Ok(())
    }

    async fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<(), StorageError> {
        let mut projects = self.projects.write().await;
        let project = projects
            .get_mut(project_id)
            .ok_or_else(|| StorageError::ProjectNotFound(project_id.to_string()))?;
        project.status = status;
        project.updated_at = Utc::now();
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectRecord, StorageError> {
        self.projects
            .read()
            .await
            .get(project_id)
            .cloned()
            .ok_or_else(|| StorageError::ProjectNotFound(project_id.to_string()))
    }

    async fn save_scene(&self, scene: &SceneRecord) -> Result<(), StorageError> {
        self.scenes
            .write()
            .await
            .insert(scene.scene_id.clone(), scene.clone());
        Ok(())
    }

    async fn update_scene_status(
        &self,
        scene_id: &str,
        status: SceneStatus,
        fields: SceneFields,
    ) -> Result<(), StorageError> {
        let mut scenes = self.scenes.write().await;
        let scene = scenes
            .get_mut(scene_id)
            .ok_or_else(|| StorageError::SceneNotFound(scene_id.to_string()))?;
        scene.status = status;
        fields.apply_to(scene);
        scene.updated_at = Utc::now();
        Ok(())
    }

    async fn list_scenes(&self, project_id: &str) -> Result<Vec<SceneRecord>, StorageError> {
        let mut scenes: Vec<SceneRecord> = self
            .scenes
            .read()
            .await
            .values()
            .filter(|s| s.project_id == project_id)
            .cloned()
            .collect();
        scenes.sort_by_key(|s| s.index);
        Ok(scenes)
    }

    async fn count_scenes(&self, project_id: &str) -> Result<usize, StorageError> {
        Ok(self
            .scenes
            .read()
            .await
            .values()
            .filter(|s| s.project_id == project_id)
            .count())
    }
}
