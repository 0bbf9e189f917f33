//! LLM-backed scene planner.

use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use super::prompts::render_planning_prompt;
use super::SceneSpec;
use crate::error::ProviderError;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::utils::json_extraction::extract_json_from_response;

/// Parses a planner response into scene specs.
///
/// Accepts a bare JSON array or an object with a `scenes` array, optionally
/// wrapped in prose or code fences. Entries that are not valid scene specs
/// are skipped. Returns an error only when no scene list can be found at all.
pub fn parse_scene_plan(content: &str) -> Result<Vec<SceneSpec>, String> {
    let json = extract_json_from_response(content).map_err(|e| e.to_string())?;
    let value: Value = serde_json::from_str(&json).map_err(|e| e.to_string())?;

    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("scenes") {
            Some(Value::Array(items)) => items,
            _ => return Err("JSON object has no 'scenes' array".to_string()),
        },
        _ => return Err("expected a JSON list of scenes".to_string()),
    };

    let specs = items
        .into_iter()
        .enumerate()
        .filter_map(|(i, item)| match serde_json::from_value::<SceneSpec>(item) {
            Ok(spec) => Some(spec),
            Err(e) => {
                warn!(index = i, error = %e, "Skipping malformed scene in plan");
                None
            }
        })
        .collect();

    Ok(specs)
}

/// Turns a user prompt into a scene list with one LLM call.
#[derive(Clone)]
pub struct ScenePlanner {
    llm: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
}

impl ScenePlanner {
    pub fn new(llm: Arc<dyn LlmProvider>, model: impl Into<String>, temperature: f64) -> Self {
        Self {
            llm,
            model: model.into(),
            temperature,
        }
    }

    /// Plans scenes for `prompt`.
    ///
    /// LLM failures are returned as errors. An unparseable answer falls back
    /// to a single scene built from the prompt.
    pub async fn plan(
        &self,
        prompt: &str,
        target_duration_seconds: f64,
    ) -> Result<Vec<SceneSpec>, ProviderError> {
        let system = render_planning_prompt(target_duration_seconds)?;
        let request = GenerationRequest::new(
            self.model.clone(),
            vec![Message::system(system), Message::user(prompt)],
        )
        .with_temperature(self.temperature);

        let content = self.llm.generate(request).await?.into_content()?;

        match parse_scene_plan(&content) {
            Ok(scenes) => {
                debug!(scenes = scenes.len(), "Parsed scene plan");
                Ok(scenes)
            }
            Err(e) => {
                warn!(error = %e, "Failed to parse scene plan, using fallback scene");
                Ok(vec![SceneSpec::fallback(prompt)])
            }
        }
    }
}
