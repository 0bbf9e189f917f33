//! Error types for scene-forge operations.
//!
//! Defines error types for the subsystems that sit underneath the
//! production orchestrator:
//! - LLM API interactions
//! - Generation providers (planning, assets, content, rendering)
//! - Scene and project persistence

use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during LLM operations.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Missing API key: OPENAI_API_KEY environment variable not set")]
    MissingApiKey,

    #[error("HTTP request failed: {0}")]
    RequestFailed(String),

    #[error("Failed to parse LLM response: {0}")]
    ParseError(String),

    #[error("Rate limited: {0}")]
    RateLimited(String),

    #[error("API error ({code}): {message}")]
    ApiError { code: u16, message: String },

    #[error("LLM returned an empty response")]
    EmptyResponse,
}

/// Errors raised by a generation provider.
///
/// The display string of these errors is what the retry policy classifies,
/// so render failures keep the renderer's stderr verbatim.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("Provider request failed: {0}")]
    RequestFailed(String),

    #[error("Invalid provider response: {0}")]
    InvalidResponse(String),

    #[error("Render failed: {0}")]
    RenderFailed(String),

    #[error("Provider call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Provider not configured: {0}")]
    NotConfigured(String),

    #[error("LLM error: {0}")]
    Llm(#[from] LlmError),

    #[error("Template error: {0}")]
    Template(#[from] tera::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl ProviderError {
    /// Creates a request failure from any displayable error.
    pub fn request(err: impl std::fmt::Display) -> Self {
        ProviderError::RequestFailed(err.to_string())
    }
}

/// Errors that can occur while persisting projects and scenes.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("Project '{0}' not found")]
    ProjectNotFound(String),

    #[error("Scene '{0}' not found")]
    SceneNotFound(String),

    #[error("Invalid stored value for '{field}': {value}")]
    InvalidValue { field: String, value: String },

    #[error("JSON serialization error: {0}")]
    Json(#[from] serde_json::Error),
}
