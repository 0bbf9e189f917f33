//! Prompt templates for planning and scene content generation.
//!
//! Templates are rendered with tera; only `{{ ... }}` placeholders are
//! interpreted, so Python braces in examples pass through untouched.

use tera::{Context, Tera};

use crate::error::ProviderError;
use crate::production::SceneTask;

/// System prompt for the scene planner.
pub const SCENE_PLANNING_PROMPT: &str = r#"
You are a cinematic director and visual artist. Your goal is to plan a sequence of highly engaging, visually rich educational video scenes based on the user's request.

The whole video should last about {{ target_duration }} seconds.

**Output Format:**
Return a JSON list of objects. Each object must have:
- `title`: Short scene title.
- `description`: A summary of the scene.
- `visual_plan`: A detailed, step-by-step description of what happens on screen. Mention specific colors, object positions, animations and timing.
- `voiceover`: A short script of what might be said (for timing context).
- `image_prompt`: A detailed prompt for an image model to generate a background or asset for this scene, or null if no image is needed.

**Example JSON:**
[
  {
    "title": "Introduction",
    "description": "Intro to Photosynthesis",
    "visual_plan": "1. A green leaf appears in the center. 2. It zooms in to show cells. 3. Text 'Photosynthesis' writes in bold white font.",
    "voiceover": "Plants feed themselves through a process called photosynthesis.",
    "image_prompt": "A close-up 3D render of a green leaf with visible veins, cinematic lighting."
  }
]
"#;

/// System prompt for Manim code generation.
pub const SCENE_CONTENT_PROMPT: &str = r#"
You are an expert Manim animation developer. You have a detailed "Visual Plan" and an "Image Path" (optional).

**Visual Plan:**
{{ visual_plan }}
{% if voiceover %}
**Voiceover (for pacing):**
{{ voiceover }}
{% endif %}
**Target Duration:** about {{ duration }} seconds.

**Image Path:**
{{ image_path }}

**Strict Rules:**
1.  **Imports**: `from manim import *`
2.  **Class**: Define a class named `Solution(Scene)`.
3.  **Text**: Use `Text` for ALL text. Never use `MathTex`, `Tex`, or `Matrix`. Use unicode characters for math symbols and Pango markup for styling.
4.  **Images**: If an image path is provided (not None), load and display it using `ImageMobject(r"{{ image_path }}")`, scaled to fit the screen.
5.  **Camera**: Do NOT use `self.camera.frame`. Use `config.frame_width` and `config.frame_height` instead of `FRAME_WIDTH`/`FRAME_HEIGHT`.
6.  **Animation**: Follow the visual plan exactly. Only animate actual Mobjects.
7.  **Pacing**: Use `self.wait(seconds)` so the scene fills the target duration.
8.  **Output**: ONLY valid Python code. No markdown.
9.  **Colors**: Use standard Manim colors: `RED`, `BLUE`, `GREEN`, `YELLOW`, `GOLD`, `PURPLE`, `WHITE`, `BLACK`, `GRAY`.
"#;

/// User turn asking for the scene code.
pub const SCENE_CONTENT_REQUEST: &str = "Generate the Manim code for this scene.";

/// Renders the planner system prompt.
pub fn render_planning_prompt(target_duration_seconds: f64) -> Result<String, ProviderError> {
    let mut context = Context::new();
    context.insert("target_duration", &format_seconds(target_duration_seconds));
    Ok(Tera::one_off(SCENE_PLANNING_PROMPT, &context, false)?)
}

/// Renders the content system prompt for `task`.
pub fn render_content_prompt(
    task: &SceneTask,
    asset_path: Option<&str>,
) -> Result<String, ProviderError> {
    let mut context = Context::new();
    context.insert("visual_plan", &task.visual_plan);
    context.insert("voiceover", &task.voiceover);
    context.insert("duration", &format_seconds(task.duration_seconds()));
    context.insert("image_path", asset_path.unwrap_or("None"));
    Ok(Tera::one_off(SCENE_CONTENT_PROMPT, &context, false)?)
}

/// Follow-up user turn for a retry.
pub fn retry_message(feedback: &str) -> String {
    format!("{}Please fix the code.", feedback)
}

fn format_seconds(seconds: f64) -> String {
    if seconds.fract() == 0.0 {
        format!("{:.0}", seconds)
    } else {
        format!("{:.1}", seconds)
    }
}
