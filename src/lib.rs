//! scene-forge: scene production orchestrator.
//!
//! Plans a prompt into scenes, then generates and renders every scene
//! concurrently under a bounded render pool, retrying failed scenes with
//! corrective feedback derived from the previous error.

pub mod cli;
pub mod error;
pub mod llm;
pub mod metrics;
pub mod production;
pub mod provider;
pub mod storage;
pub mod utils;

pub use error::{LlmError, ProviderError, StorageError};
pub use production::{ProductionConfig, ProductionError, ProductionOrchestrator};
