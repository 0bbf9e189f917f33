//! Generation provider seam.
//!
//! The orchestrator sees planning, asset generation, content generation and
//! rendering as four opaque async capabilities behind [`GenerationProvider`].
//! [`StudioProvider`] is the production implementation: an LLM planner and
//! code generator, an image client for assets and a Manim renderer.

pub mod image;
pub mod manim;
pub mod planner;
pub mod prompts;
pub mod studio;

use std::path::PathBuf;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::ProviderError;
use crate::production::SceneTask;

pub use image::ImageClient;
pub use manim::ManimRenderer;
pub use planner::{parse_scene_plan, ScenePlanner};
pub use studio::StudioProvider;

/// One scene as returned by the planner.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SceneSpec {
    pub title: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub visual_plan: String,
    #[serde(default)]
    pub voiceover: Option<String>,
    #[serde(default, alias = "image_prompt")]
    pub asset_prompt: Option<String>,
    #[serde(default, alias = "duration")]
    pub duration_seconds: Option<f64>,
}

impl SceneSpec {
    pub fn new(title: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            description: description.into(),
            visual_plan: String::new(),
            voiceover: None,
            asset_prompt: None,
            duration_seconds: None,
        }
    }

    pub fn with_visual_plan(mut self, plan: impl Into<String>) -> Self {
        self.visual_plan = plan.into();
        self
    }

    pub fn with_asset_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.asset_prompt = Some(prompt.into());
        self
    }

    pub fn with_duration(mut self, seconds: f64) -> Self {
        self.duration_seconds = Some(seconds);
        self
    }

    /// Single scene used when planning yields nothing usable.
    pub fn fallback(prompt: &str) -> Self {
        Self::new("Scene 1", prompt).with_visual_plan("Show text")
    }
}

/// Reference to a generated auxiliary asset (e.g. a background image).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRef {
    pub path: String,
}

impl AssetRef {
    pub fn new(path: impl Into<String>) -> Self {
        Self { path: path.into() }
    }
}

/// Generated scene content, ready to be rendered.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContentRef {
    pub content: String,
}

impl ContentRef {
    pub fn new(content: impl Into<String>) -> Self {
        Self {
            content: content.into(),
        }
    }
}

/// Capabilities the production core consumes.
///
/// All methods may be called concurrently for different scenes. Error
/// messages are surfaced verbatim to the retry policy.
#[async_trait]
pub trait GenerationProvider: Send + Sync {
    /// Turns a prompt into an ordered list of scene specs.
    async fn plan(
        &self,
        prompt: &str,
        target_duration_seconds: f64,
    ) -> Result<Vec<SceneSpec>, ProviderError>;

    /// Generates an auxiliary asset. Callers treat failures as non-fatal.
    async fn generate_asset(&self, project_id: &str, prompt: &str)
        -> Result<AssetRef, ProviderError>;

    /// Generates renderable content for a scene, steered by `feedback` on
    /// retries.
    async fn generate_content(
        &self,
        task: &SceneTask,
        feedback: Option<&str>,
    ) -> Result<ContentRef, ProviderError>;

    /// Renders content into media and returns its URL.
    async fn render(&self, task: &SceneTask, content: &ContentRef)
        -> Result<String, ProviderError>;
}

/// Credentials, models and paths for the concrete providers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProviderSettings {
    /// OpenAI-compatible API base URL.
    pub api_base: String,
    pub api_key: Option<String>,
    pub planning_model: String,
    pub content_model: String,
    pub image_model: String,
    pub image_size: String,
    pub temperature: f64,
    /// Root directory for assets and rendered media.
    pub storage_dir: PathBuf,
    /// Path or name of the `manim` executable.
    pub manim_binary: String,
    /// Manim quality flag, e.g. "-ql".
    pub render_quality: String,
}

impl Default for ProviderSettings {
    fn default() -> Self {
        Self {
            api_base: crate::llm::DEFAULT_API_BASE.to_string(),
            api_key: None,
            planning_model: "gpt-4o".to_string(),
            content_model: "gpt-4o".to_string(),
            image_model: "dall-e-3".to_string(),
            image_size: "1024x1024".to_string(),
            temperature: 0.7,
            storage_dir: PathBuf::from("storage"),
            manim_binary: "manim".to_string(),
            render_quality: "-ql".to_string(),
        }
    }
}

impl ProviderSettings {
    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn with_storage_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.storage_dir = dir.into();
        self
    }

    /// `storage_dir` made absolute against the current directory.
    ///
    /// The renderer runs inside its own work directory, so the paths handed
    /// to it (media dir, image assets) must not be relative.
    pub fn resolved_storage_dir(&self) -> PathBuf {
        std::path::absolute(&self.storage_dir).unwrap_or_else(|_| self.storage_dir.clone())
    }

    /// Copy safe to print: the API key is masked.
    pub fn redacted(&self) -> Self {
        let mut copy = self.clone();
        if copy.api_key.is_some() {
            copy.api_key = Some("***".to_string());
        }
        copy
    }
}
