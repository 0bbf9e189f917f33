//! Manim renderer: turns generated scene code into an mp4.
//!
//! Each render runs in its own directory under
//! `<storage>/<project_id>/<render_id>/`. The finished video is moved to
//! `<storage>/<project_id>/scene_<index>_<render_id>.mp4` and exposed as
//! `/media/<project_id>/<file>`.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;

use regex::Regex;
use tokio::process::Command;
use tracing::{debug, info, warn};
use uuid::Uuid;
use walkdir::WalkDir;

use super::ProviderSettings;
use crate::error::ProviderError;

/// Scene class name used when the code declares none.
pub const DEFAULT_SCENE_CLASS: &str = "Solution";

static CLASS_DECL: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?m)^class\s+([A-Za-z_][A-Za-z0-9_]*)").expect("Invalid regex for class names")
});

/// Returns the first top-level class declared in `code`.
pub fn detect_scene_class(code: &str) -> &str {
    CLASS_DECL
        .captures(code)
        .and_then(|c| c.get(1))
        .map(|m| m.as_str())
        .unwrap_or(DEFAULT_SCENE_CLASS)
}

/// Runs the `manim` CLI for one scene at a time.
#[derive(Debug, Clone)]
pub struct ManimRenderer {
    binary: String,
    quality: String,
    storage_dir: PathBuf,
}

impl ManimRenderer {
    pub fn new(settings: &ProviderSettings) -> Self {
        Self {
            binary: settings.manim_binary.clone(),
            quality: settings.render_quality.clone(),
            storage_dir: settings.resolved_storage_dir(),
        }
    }

    /// Renders `code` for the scene at `index` and returns its media URL.
    ///
    /// A non-zero exit becomes `RenderFailed` carrying the renderer's stderr.
    pub async fn render(
        &self,
        project_id: &str,
        index: usize,
        code: &str,
    ) -> Result<String, ProviderError> {
        let render_id = Uuid::new_v4().to_string();
        let project_dir = self.storage_dir.join(project_id);
        let work_dir = project_dir.join(&render_id);
        let media_dir = work_dir.join("media");
        tokio::fs::create_dir_all(&media_dir).await?;

        tokio::fs::write(work_dir.join("scene.py"), code).await?;

        let class_name = detect_scene_class(code);
        let output_name = format!("scene_{}.mp4", index);
        debug!(
            project_id = %project_id,
            scene_index = index,
            class_name = class_name,
            work_dir = %work_dir.display(),
            "Starting render"
        );

        let output = Command::new(&self.binary)
            .arg(&self.quality)
            .arg("--media_dir")
            .arg(&media_dir)
            .arg("-o")
            .arg(&output_name)
            .arg("scene.py")
            .arg(class_name)
            .current_dir(&work_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .output()
            .await
            .map_err(|e| {
                ProviderError::RenderFailed(format!("failed to start '{}': {}", self.binary, e))
            })?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!(
                project_id = %project_id,
                scene_index = index,
                exit = ?output.status.code(),
                "Render failed"
            );
            return Err(ProviderError::RenderFailed(format!(
                "Manim failed: {}",
                stderr.trim()
            )));
        }

        let video = find_video(&media_dir).ok_or_else(|| {
            ProviderError::RenderFailed("No video file generated".to_string())
        })?;

        let final_name = format!("scene_{}_{}.mp4", index, render_id);
        tokio::fs::rename(&video, project_dir.join(&final_name)).await?;

        info!(project_id = %project_id, scene_index = index, file = %final_name, "Render complete");
        Ok(media_url(project_id, &final_name))
    }
}

/// Public URL of a stored media file.
pub fn media_url(project_id: &str, file_name: &str) -> String {
    format!("/media/{}/{}", project_id, file_name)
}

fn find_video(dir: &Path) -> Option<PathBuf> {
    WalkDir::new(dir)
        .into_iter()
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| e.into_path())
        .find(|p| p.extension().and_then(|e| e.to_str()) == Some("mp4"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detect_scene_class() {
        let code = "from manim import *\n\nclass Orbit(Scene):\n    def construct(self):\n        pass\n";
        assert_eq!(detect_scene_class(code), "Orbit");
        assert_eq!(detect_scene_class("print('no class')"), DEFAULT_SCENE_CLASS);
        // Nested classes are not scene entry points.
        assert_eq!(detect_scene_class("    class Inner:\n        pass"), DEFAULT_SCENE_CLASS);
    }

    #[test]
    fn test_find_video_walks_nested_dirs() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("videos").join("scene").join("480p15");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(nested.join("notes.txt"), "x").unwrap();
        assert!(find_video(dir.path()).is_none());

        std::fs::write(nested.join("scene_0.mp4"), "video").unwrap();
        assert_eq!(find_video(dir.path()), Some(nested.join("scene_0.mp4")));
    }

    #[test]
    fn test_media_url() {
        assert_eq!(media_url("p-1", "scene_0_x.mp4"), "/media/p-1/scene_0_x.mp4");
    }

    #[tokio::test]
    async fn test_missing_binary_is_render_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut settings = ProviderSettings::default().with_storage_dir(dir.path());
        settings.manim_binary = "scene-forge-no-such-binary".to_string();
        let renderer = ManimRenderer::new(&settings);

        let err = renderer.render("p", 0, "class Solution: pass").await.unwrap_err();
        assert!(matches!(err, ProviderError::RenderFailed(_)));
        assert!(err.to_string().contains("failed to start"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_render_with_relative_storage_dir() {
        let scripts = tempfile::tempdir().unwrap();
        let script = scripts.path().join("fake_manim.sh");
        // Args: --media_dir <dir> -o <name> <file> <class>
        std::fs::write(
            &script,
            "test -f \"$5\" || exit 3\n\
             mkdir -p \"$2/videos/scene/480p15\" && printf video > \"$2/videos/scene/480p15/$4\"\n",
        )
        .unwrap();

        let storage = format!("target/render-test-{}", Uuid::new_v4());
        let mut settings = ProviderSettings::default().with_storage_dir(&storage);
        settings.manim_binary = "sh".to_string();
        // The quality slot is the first argument, so it carries the script.
        settings.render_quality = script.to_string_lossy().into_owned();
        let renderer = ManimRenderer::new(&settings);

        let result = renderer
            .render("p", 0, "class Solution(Scene): pass")
            .await;
        let stored = result.as_ref().ok().and_then(|url| url.rsplit('/').next()).map(|file| {
            std::path::absolute(&storage).unwrap().join("p").join(file).is_file()
        });
        let _ = std::fs::remove_dir_all(&storage);

        let url = result.unwrap();
        assert!(url.starts_with("/media/p/scene_0_"));
        assert!(url.ends_with(".mp4"));
        assert_eq!(stored, Some(true));
    }
}
