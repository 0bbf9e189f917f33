//! OpenAI-compatible chat-completions client.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::error::LlmError;

/// Default API base when none is configured.
pub const DEFAULT_API_BASE: &str = "https://api.openai.com/v1";

/// Default HTTP timeout for a single completion.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(300);

/// A message in a conversation with an LLM.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    /// Role of the message sender ("system", "user", "assistant").
    pub role: String,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".to_string(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".to_string(),
            content: content.into(),
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: "assistant".to_string(),
            content: content.into(),
        }
    }
}

/// Request for text generation from an LLM.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationRequest {
    /// Model identifier. Empty means the client's default model.
    pub model: String,
    pub messages: Vec<Message>,
    /// Sampling temperature (0.0 - 2.0).
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<u32>,
}

impl GenerationRequest {
    pub fn new(model: impl Into<String>, messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            messages,
            temperature: None,
            max_tokens: None,
        }
    }

    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: u32) -> Self {
        self.max_tokens = Some(max_tokens);
        self
    }
}

/// Response from an LLM generation request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResponse {
    pub id: String,
    pub model: String,
    pub choices: Vec<Choice>,
    #[serde(default)]
    pub usage: Usage,
}

impl GenerationResponse {
    /// Content of the first choice, failing on a missing or blank answer.
    pub fn into_content(self) -> Result<String, LlmError> {
        self.choices
            .into_iter()
            .next()
            .map(|c| c.message.content)
            .filter(|c| !c.trim().is_empty())
            .ok_or(LlmError::EmptyResponse)
    }
}

/// A single generated choice.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Choice {
    pub index: u32,
    pub message: Message,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

/// Token usage statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Usage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
}

/// Trait for LLM providers that can generate text.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError>;
}

/// Client for OpenAI-compatible chat-completions APIs.
#[derive(Debug, Clone)]
pub struct ChatClient {
    api_base: String,
    api_key: Option<String>,
    default_model: String,
    http_client: Client,
}

impl ChatClient {
    /// Creates a client with explicit configuration.
    ///
    /// # Errors
    ///
    /// Returns `LlmError::RequestFailed` if the HTTP client cannot be built.
    pub fn new(
        api_base: impl Into<String>,
        api_key: Option<String>,
        default_model: impl Into<String>,
        timeout: Duration,
    ) -> Result<Self, LlmError> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::RequestFailed(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            api_base: api_base.into().trim_end_matches('/').to_string(),
            api_key,
            default_model: default_model.into(),
            http_client,
        })
    }

    pub fn api_base(&self) -> &str {
        &self.api_base
    }

    pub fn default_model(&self) -> &str {
        &self.default_model
    }

    pub fn has_api_key(&self) -> bool {
        self.api_key.is_some()
    }

    /// Shared HTTP client, reused by other OpenAI-compatible endpoints.
    pub fn http_client(&self) -> &Client {
        &self.http_client
    }
}

/// Internal request structure for the OpenAI-compatible API.
#[derive(Debug, Serialize)]
struct ApiRequest<'a> {
    model: &'a str,
    messages: &'a [Message],
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct ApiErrorResponse {
    error: ApiErrorDetail,
}

#[derive(Debug, Deserialize)]
struct ApiErrorDetail {
    message: String,
}

#[async_trait]
impl LlmProvider for ChatClient {
    async fn generate(&self, request: GenerationRequest) -> Result<GenerationResponse, LlmError> {
        let model = if request.model.is_empty() {
            self.default_model.as_str()
        } else {
            request.model.as_str()
        };

        let api_request = ApiRequest {
            model,
            messages: &request.messages,
            temperature: request.temperature,
            max_tokens: request.max_tokens,
        };

        let url = format!("{}/chat/completions", self.api_base);
        let mut http_request = self
            .http_client
            .post(&url)
            .header("Content-Type", "application/json");

        if let Some(ref api_key) = self.api_key {
            http_request = http_request.header("Authorization", format!("Bearer {}", api_key));
        }

        tracing::debug!(model = model, messages = request.messages.len(), "Sending chat completion");

        let http_response = http_request
            .json(&api_request)
            .send()
            .await
            .map_err(|e| LlmError::RequestFailed(e.to_string()))?;

        let status = http_response.status();
        if !status.is_success() {
            let status_code = status.as_u16();
            let error_text = http_response
                .text()
                .await
                .unwrap_or_else(|_| "Failed to read error response".to_string());

            let message = serde_json::from_str::<ApiErrorResponse>(&error_text)
                .map(|r| r.error.message)
                .unwrap_or(error_text);

            if status_code == 429 {
                return Err(LlmError::RateLimited(message));
            }
            return Err(LlmError::ApiError {
                code: status_code,
                message,
            });
        }

        http_response
            .json::<GenerationResponse>()
            .await
            .map_err(|e| LlmError::ParseError(format!("Failed to parse API response: {}", e)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_constructors() {
        assert_eq!(Message::system("a").role, "system");
        assert_eq!(Message::user("b").role, "user");
        assert_eq!(Message::assistant("c").content, "c");
    }

    #[test]
    fn test_generation_request_builder() {
        let request = GenerationRequest::new("gpt-4o", vec![Message::user("test")])
            .with_temperature(0.7)
            .with_max_tokens(1000);

        assert_eq!(request.model, "gpt-4o");
        assert_eq!(request.temperature, Some(0.7));
        assert_eq!(request.max_tokens, Some(1000));
    }

    #[test]
    fn test_response_parsing_and_content() {
        let raw = r#"{
            "id": "chatcmpl-1",
            "model": "gpt-4o",
            "choices": [
                {"index": 0, "message": {"role": "assistant", "content": "Hello!"}, "finish_reason": "stop"}
            ],
            "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
        }"#;
        let response: GenerationResponse = serde_json::from_str(raw).unwrap();
        assert_eq!(response.usage.total_tokens, 15);
        assert_eq!(response.choices[0].finish_reason.as_deref(), Some("stop"));
        assert_eq!(response.into_content().unwrap(), "Hello!");
    }

    #[test]
    fn test_blank_content_is_empty_response() {
        let response = GenerationResponse {
            id: "x".to_string(),
            model: "gpt-4o".to_string(),
            choices: vec![Choice {
                index: 0,
                message: Message::assistant("   "),
                finish_reason: None,
            }],
            usage: Usage::default(),
        };
        assert!(matches!(response.into_content(), Err(LlmError::EmptyResponse)));
    }

    #[test]
    fn test_client_new_trims_base() {
        let client = ChatClient::new(
            "http://localhost:4000/",
            Some("key".to_string()),
            "gpt-4o",
            Duration::from_secs(5),
        )
        .unwrap();
        assert_eq!(client.api_base(), "http://localhost:4000");
        assert_eq!(client.default_model(), "gpt-4o");
        assert!(client.has_api_key());
    }

    #[test]
    fn test_api_request_serialization() {
        let messages = vec![Message::user("test")];
        let request = ApiRequest {
            model: "gpt-4o",
            messages: &messages,
            temperature: Some(0.7),
            max_tokens: None,
        };
        let json = serde_json::to_string(&request).unwrap();
        assert!(json.contains("\"model\":\"gpt-4o\""));
        assert!(json.contains("\"temperature\":0.7"));
        assert!(!json.contains("max_tokens"));
    }

    #[tokio::test]
    async fn test_generate_connection_error() {
        let client =
            ChatClient::new("http://localhost:65535", None, "gpt-4o", Duration::from_secs(5))
                .unwrap();
        let result = client
            .generate(GenerationRequest::new("", vec![Message::user("test")]))
            .await;
        assert!(matches!(result, Err(LlmError::RequestFailed(_))));
    }
}
