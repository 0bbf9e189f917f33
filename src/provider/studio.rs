//! Production [`GenerationProvider`]: LLM planning and code generation,
//! image assets and Manim rendering.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::debug;

use super::image::ImageClient;
use super::manim::ManimRenderer;
use super::planner::ScenePlanner;
use super::prompts::{render_content_prompt, retry_message, SCENE_CONTENT_REQUEST};
use super::{AssetRef, ContentRef, GenerationProvider, ProviderSettings, SceneSpec};
use crate::error::{LlmError, ProviderError};
use crate::llm::{ChatClient, GenerationRequest, LlmProvider, Message};
use crate::production::SceneTask;
use crate::utils::json_extraction::strip_code_fences;

pub struct StudioProvider {
    planner: ScenePlanner,
    llm: Arc<dyn LlmProvider>,
    content_model: String,
    temperature: f64,
    images: ImageClient,
    renderer: ManimRenderer,
}

impl StudioProvider {
    /// Builds the provider from settings. Requires an API key.
    pub fn from_settings(
        settings: &ProviderSettings,
        http_timeout: Duration,
    ) -> Result<Self, ProviderError> {
        let api_key = settings.api_key.clone().ok_or(LlmError::MissingApiKey)?;
        let client = ChatClient::new(
            settings.api_base.clone(),
            Some(api_key),
            settings.content_model.clone(),
            http_timeout,
        )?;
        let images = ImageClient::new(client.http_client().clone(), settings);

        Ok(Self::with_llm(Arc::new(client), images, settings))
    }

    /// Builds the provider around an existing LLM backend.
    pub fn with_llm(
        llm: Arc<dyn LlmProvider>,
        images: ImageClient,
        settings: &ProviderSettings,
    ) -> Self {
        Self {
            planner: ScenePlanner::new(
                Arc::clone(&llm),
                settings.planning_model.clone(),
                settings.temperature,
            ),
            llm,
            content_model: settings.content_model.clone(),
            temperature: settings.temperature,
            images,
            renderer: ManimRenderer::new(settings),
        }
    }

    fn content_request(
        &self,
        task: &SceneTask,
        feedback: Option<&str>,
    ) -> Result<GenerationRequest, ProviderError> {
        let asset_path = task.asset.as_ref().map(|a| a.path.as_str());
        let mut messages = vec![
            Message::system(render_content_prompt(task, asset_path)?),
            Message::user(SCENE_CONTENT_REQUEST),
        ];
        if let Some(feedback) = feedback {
            messages.push(Message::user(retry_message(feedback)));
        }

        Ok(GenerationRequest::new(self.content_model.clone(), messages)
            .with_temperature(self.temperature))
    }
}

#[async_trait]
impl GenerationProvider for StudioProvider {
    async fn plan(
        &self,
        prompt: &str,
        target_duration_seconds: f64,
    ) -> Result<Vec<SceneSpec>, ProviderError> {
        self.planner.plan(prompt, target_duration_seconds).await
    }

    async fn generate_asset(
        &self,
        project_id: &str,
        prompt: &str,
    ) -> Result<AssetRef, ProviderError> {
        self.images.generate(project_id, prompt).await
    }

    async fn generate_content(
        &self,
        task: &SceneTask,
        feedback: Option<&str>,
    ) -> Result<ContentRef, ProviderError> {
        let request = self.content_request(task, feedback)?;
        let raw = self.llm.generate(request).await?.into_content()?;
        let code = strip_code_fences(&raw);
        if code.is_empty() {
            return Err(ProviderError::InvalidResponse(
                "generated content is empty after removing code fences".to_string(),
            ));
        }

        debug!(scene_id = %task.scene_id, bytes = code.len(), "Generated scene content");
        Ok(ContentRef::new(code))
    }

    async fn render(&self, task: &SceneTask, content: &ContentRef) -> Result<String, ProviderError> {
        self.renderer
            .render(&task.project_id, task.index, &content.content)
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::{Choice, GenerationResponse, Usage};
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingLlm {
        answer: String,
        requests: Mutex<Vec<GenerationRequest>>,
    }

    #[async_trait]
    impl LlmProvider for RecordingLlm {
        async fn generate(
            &self,
            request: GenerationRequest,
        ) -> Result<GenerationResponse, LlmError> {
            self.requests.lock().unwrap().push(request.clone());
            Ok(GenerationResponse {
                id: "1".to_string(),
                model: request.model,
                choices: vec![Choice {
                    index: 0,
                    message: Message::assistant(self.answer.clone()),
                    finish_reason: None,
                }],
                usage: Usage::default(),
            })
        }
    }

    fn provider(answer: &str) -> (StudioProvider, Arc<RecordingLlm>) {
        let llm = Arc::new(RecordingLlm {
            answer: answer.to_string(),
            ..Default::default()
        });
        let settings = ProviderSettings::default();
        let images = ImageClient::new(reqwest::Client::new(), &settings);
        let llm_dyn: Arc<dyn LlmProvider> = llm.clone();
        (StudioProvider::with_llm(llm_dyn, images, &settings), llm)
    }

    fn task() -> SceneTask {
        SceneTask::from_spec(
            "p",
            0,
            SceneSpec::new("Orbit", "Moon orbit").with_visual_plan("Moon circles earth"),
            20.0,
        )
    }

    #[tokio::test]
    async fn test_generate_content_strips_fences() {
        let (provider, llm) = provider("```python\nfrom manim import *\n```");
        let content = provider.generate_content(&task(), None).await.unwrap();
        assert_eq!(content.content, "from manim import *");

        let requests = llm.requests.lock().unwrap();
        assert_eq!(requests.len(), 1);
        assert_eq!(requests[0].messages.len(), 2);
        assert_eq!(requests[0].model, "gpt-4o");
        assert!(requests[0].messages[0].content.contains("Moon circles earth"));
    }

    #[tokio::test]
    async fn test_generate_content_appends_feedback() {
        let (provider, llm) = provider("from manim import *");
        let mut task = task();
        task.asset = Some(AssetRef::new("/tmp/bg.png"));
        provider
            .generate_content(&task, Some("Previous attempt failed with error: NameError\nFix: x\n"))
            .await
            .unwrap();

        let requests = llm.requests.lock().unwrap();
        let messages = &requests[0].messages;
        assert_eq!(messages.len(), 3);
        assert!(messages[0].content.contains("/tmp/bg.png"));
        assert!(messages[2].content.starts_with("Previous attempt failed with error: NameError"));
        assert!(messages[2].content.ends_with("Please fix the code."));
    }

    #[tokio::test]
    async fn test_generate_content_rejects_empty_code() {
        let (provider, _) = provider("```python\n```");
        let err = provider.generate_content(&task(), None).await.unwrap_err();
        assert!(matches!(err, ProviderError::InvalidResponse(_)));
    }

    #[test]
    fn test_from_settings_requires_key() {
        let result = StudioProvider::from_settings(&ProviderSettings::default(), Duration::from_secs(5));
        assert!(matches!(result, Err(ProviderError::Llm(LlmError::MissingApiKey))));
    }
}
