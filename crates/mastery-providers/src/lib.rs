//! mastery-providers: LLM provider integrations.
//!
//! Implements the `LlmProvider` trait for Anthropic, OpenAI, and Ollama, and
//! adapts any provider into the engine's `ContentGenerator` port by way of
//! tutoring prompts.

pub mod anthropic;
pub mod config;
pub mod generator;
pub mod mock;
pub mod ollama;
pub mod openai;

pub use config::{create_provider, load_config, ProviderConfig, TutorConfig};
pub use generator::LlmContentGenerator;
