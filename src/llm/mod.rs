//! LLM integration for scene-forge.
//!
//! Scene planning and content generation both go through an
//! OpenAI-compatible chat-completions endpoint behind the [`LlmProvider`]
//! trait, so tests and alternative backends can swap the client out.
//!
//! ```ignore
//! use scene_forge::llm::{
//!     ChatClient, GenerationRequest, LlmProvider, Message, DEFAULT_API_BASE, DEFAULT_HTTP_TIMEOUT,
//! };
//!
//! let client = ChatClient::new(DEFAULT_API_BASE, Some(api_key), "gpt-4o", DEFAULT_HTTP_TIMEOUT)?;
//! let request = GenerationRequest::new("gpt-4o", vec![Message::user("Hello")]);
//! let response = client.generate(request).await?;
//! ```

pub mod client;

pub use client::{
    ChatClient, Choice, GenerationRequest, GenerationResponse, LlmProvider, Message, Usage,
    DEFAULT_API_BASE, DEFAULT_HTTP_TIMEOUT,
};
