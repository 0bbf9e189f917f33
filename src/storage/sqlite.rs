//! SQLite-backed [`SceneStore`].

use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteRow, SqliteSynchronous,
};
use sqlx::{Row, SqlitePool};

use super::{ProjectRecord, SceneFields, SceneRecord, SceneStore};
use crate::error::StorageError;
use crate::production::{ProjectStatus, SceneStatus};

const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS projects (
    project_id              TEXT PRIMARY KEY,
    user_prompt             TEXT NOT NULL,
    target_duration_seconds REAL NOT NULL,
    status                  TEXT NOT NULL,
    created_at              TEXT NOT NULL,
    updated_at              TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS scenes (
    scene_id                TEXT PRIMARY KEY,
    project_id              TEXT NOT NULL,
    scene_index             INTEGER NOT NULL,
    title                   TEXT NOT NULL,
    description             TEXT NOT NULL,
    visual_plan             TEXT NOT NULL,
    voiceover               TEXT,
    asset_prompt            TEXT,
    target_duration_seconds REAL,
    status                  TEXT NOT NULL DEFAULT 'planned',
    retry_count             INTEGER NOT NULL DEFAULT 0,
    last_error              TEXT,
    asset_path              TEXT,
    content                 TEXT,
    media_url               TEXT,
    updated_at              TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_scenes_project ON scenes(project_id, scene_index);
"#;

#[derive(Debug, Clone)]
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    /// Opens (creating if needed) the database file at `path`.
    pub async fn open(path: &str) -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str(&format!("sqlite://{}", path))?
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal);

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        tracing::info!(path = path, "Scene store opened");
        Ok(store)
    }

    /// Opens a private in-memory database.
    pub async fn open_in_memory() -> Result<Self, StorageError> {
        let opts = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // A single connection: every new in-memory connection is a fresh database.
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(opts)
            .await?;

        let store = Self { pool };
        store.init_schema().await?;
        Ok(store)
    }

    async fn init_schema(&self) -> Result<(), StorageError> {
        sqlx::query(SCHEMA_SQL).execute(&self.pool).await?;
        Ok(())
    }
}

fn parse_status<T: FromStr<Err = String>>(field: &str, value: String) -> Result<T, StorageError> {
    value.parse().map_err(|_| StorageError::InvalidValue {
        field: field.to_string(),
        value,
    })
}

fn project_from_row(row: &SqliteRow) -> Result<ProjectRecord, StorageError> {
    Ok(ProjectRecord {
        project_id: row.try_get("project_id")?,
        user_prompt: row.try_get("user_prompt")?,
        target_duration_seconds: row.try_get("target_duration_seconds")?,
        status: parse_status("status", row.try_get("status")?)?,
        created_at: row.try_get::<DateTime<Utc>, _>("created_at")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

fn scene_from_row(row: &SqliteRow) -> Result<SceneRecord, StorageError> {
    Ok(SceneRecord {
        scene_id: row.try_get("scene_id")?,
        project_id: row.try_get("project_id")?,
        index: row.try_get::<i64, _>("scene_index")? as usize,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        visual_plan: row.try_get("visual_plan")?,
        voiceover: row.try_get("voiceover")?,
        asset_prompt: row.try_get("asset_prompt")?,
        target_duration_seconds: row.try_get("target_duration_seconds")?,
        status: parse_status("status", row.try_get("status")?)?,
        retry_count: row.try_get::<i64, _>("retry_count")? as u32,
        last_error: row.try_get("last_error")?,
        asset_path: row.try_get("asset_path")?,
        content: row.try_get("content")?,
        media_url: row.try_get("media_url")?,
        updated_at: row.try_get::<DateTime<Utc>, _>("updated_at")?,
    })
}

#[async_trait]
impl SceneStore for SqliteStore {
    async fn save_project(&self, project: &ProjectRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"INSERT INTO projects
                (project_id, user_prompt, target_duration_seconds, status, created_at, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6)
               ON CONFLICT(project_id) DO UPDATE SET
                user_prompt = excluded.user_prompt,
                target_duration_seconds = excluded.target_duration_seconds,
                status = excluded.status,
                updated_at = excluded.updated_at"#,
        )
        .bind(&project.project_id)
        .bind(&project.user_prompt)
        .bind(project.target_duration_seconds)
        .bind(project.status.as_str())
        .bind(project.created_at)
        .bind(project.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_project_status(
        &self,
        project_id: &str,
        status: ProjectStatus,
    ) -> Result<(), StorageError> {
        let result =
            sqlx::query("UPDATE projects SET status = ?1, updated_at = ?2 WHERE project_id = ?3")
                .bind(status.as_str())
                .bind(Utc::now())
                .bind(project_id)
                .execute(&self.pool)
                .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::ProjectNotFound(project_id.to_string()));
        }
        Ok(())
    }

    async fn get_project(&self, project_id: &str) -> Result<ProjectRecord, StorageError> {
        let row = sqlx::query("SELECT * FROM projects WHERE project_id = ?1")
            .bind(project_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| StorageError::ProjectNotFound(project_id.to_string()))?;
        project_from_row(&row)
    }

    async fn save_scene(&self, scene: &SceneRecord) -> Result<(), StorageError> {
        sqlx::query(
            r#"INSERT INTO scenes
                (scene_id, project_id, scene_index, title, description, visual_plan, voiceover,
                 asset_prompt, target_duration_seconds, status, retry_count, last_error,
                 asset_path, content, media_url, updated_at)
               VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)
               ON CONFLICT(scene_id) DO UPDATE SET
                scene_index = excluded.scene_index,
                title = excluded.title,
                description = excluded.description,
                visual_plan = excluded.visual_plan,
                voiceover = excluded.voiceover,
                asset_prompt = excluded.asset_prompt,
                target_duration_seconds = excluded.target_duration_seconds,
                status = excluded.status,
                retry_count = excluded.retry_count,
                last_error = excluded.last_error,
                asset_path = excluded.asset_path,
                content = excluded.content,
                media_url = excluded.media_url,
                updated_at = excluded.updated_at"#,
        )
        .bind(&scene.scene_id)
        .bind(&scene.project_id)
        .bind(scene.index as i64)
        .bind(&scene.title)
        .bind(&scene.description)
        .bind(&scene.visual_plan)
        .bind(&scene.voiceover)
        .bind(&scene.asset_prompt)
        .bind(scene.target_duration_seconds)
        .bind(scene.status.as_str())
        .bind(i64::from(scene.retry_count))
        .bind(&scene.last_error)
        .bind(&scene.asset_path)
        .bind(&scene.content)
        .bind(&scene.media_url)
        .bind(scene.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_scene_status(
        &self,
        scene_id: &str,
        status: SceneStatus,
        fields: SceneFields,
    ) -> Result<(), StorageError> {
        let result = sqlx::query(
            r#"UPDATE scenes SET
                status = ?1,
                retry_count = COALESCE(?2, retry_count),
                last_error = COALESCE(?3, last_error),
                asset_path = COALESCE(?4, asset_path),
                content = COALESCE(?5, content),
                media_url = COALESCE(?6, media_url),
                updated_at = ?7
               WHERE scene_id = ?8"#,
        )
        .bind(status.as_str())
        .bind(fields.retry_count.map(i64::from))
        .bind(fields.last_error)
        .bind(fields.asset_path)
        .bind(fields.content)
        .bind(fields.media_url)
        .bind(Utc::now())
        .bind(scene_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(StorageError::SceneNotFound(scene_id.to_string()));
        }
        Ok(())
    }

    async fn list_scenes(&self, project_id: &str) -> Result<Vec<SceneRecord>, StorageError> {
        let rows = sqlx::query("SELECT * FROM scenes WHERE project_id = ?1 ORDER BY scene_index")
            .bind(project_id)
            .fetch_all(&self.pool)
            .await?;
        rows.iter().map(scene_from_row).collect()
    }

    async fn count_scenes(&self, project_id: &str) -> Result<usize, StorageError> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM scenes WHERE project_id = ?1")
            .bind(project_id)
            .fetch_one(&self.pool)
            .await?;
        Ok(count as usize)
    }
}
