//! Core trait definitions for LLM providers and the content generation port.
//!
//! [`LlmProvider`] is the raw text-completion backend implemented by the
//! `mastery-providers` crate. [`ContentGenerator`] is the capability the
//! assessment engine depends on: generate a question, evaluate an answer,
//! explain an outcome. Production code adapts a provider into a generator;
//! tests plug in a deterministic stub.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::GenerationError;
use crate::model::LearningOutcome;

// ---------------------------------------------------------------------------
// LLM Provider trait
// ---------------------------------------------------------------------------

/// Trait for LLM backends that complete prompts.
#[async_trait]
pub trait LlmProvider: Send + Sync {
    /// Human-readable provider name (e.g. "anthropic").
    fn name(&self) -> &str;

    /// Complete a prompt.
    ///
    /// Failures should be [`GenerationError`] values wrapped in
    /// `anyhow::Error` so callers can classify them.
    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse>;

    /// List available models for this provider.
    fn available_models(&self) -> Vec<ModelInfo>;
}

/// Request to complete a prompt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateRequest {
    /// Model identifier (e.g. "claude-sonnet-4-20250514").
    pub model: String,
    /// The main prompt.
    pub prompt: String,
    /// Optional system prompt override.
    #[serde(default)]
    pub system_prompt: Option<String>,
    /// Maximum tokens to generate.
    pub max_tokens: u32,
    /// Sampling temperature.
    pub temperature: f64,
    /// Stop sequences.
    #[serde(default)]
    pub stop_sequences: Vec<String>,
}

/// Response from a completion request.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerateResponse {
    /// The raw response content.
    pub content: String,
    /// Model that actually generated the response.
    pub model: String,
    /// Token usage.
    pub token_usage: TokenUsage,
    /// Latency in milliseconds.
    pub latency_ms: u64,
}

/// Token accounting for one completion.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
    pub total_tokens: u32,
    pub estimated_cost_usd: f64,
}

/// Information about an available model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelInfo {
    /// Model identifier.
    pub id: String,
    /// Human-readable model name.
    pub name: String,
    /// Provider name.
    pub provider: String,
    /// Maximum context window size in tokens.
    pub max_context: u32,
    /// Cost per 1K input tokens in USD.
    pub cost_per_1k_input: f64,
    /// Cost per 1K output tokens in USD.
    pub cost_per_1k_output: f64,
}

// ---------------------------------------------------------------------------
// Content generation port
// ---------------------------------------------------------------------------

/// The external generation/evaluation service, as seen by the engine.
///
/// Every method is a fallible network call. The engine retries transient
/// failures and never fabricates content itself.
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    /// Produce a question for an outcome. Must be non-empty.
    async fn generate_question(&self, request: &QuestionRequest)
        -> Result<String, GenerationError>;

    /// Score an answer against the outcome's concepts. Unvalidated.
    async fn evaluate_answer(
        &self,
        request: &EvaluationRequest,
    ) -> Result<RawEvaluation, GenerationError>;

    /// Produce a short re-teaching lesson for an outcome.
    async fn explain_outcome(
        &self,
        request: &ExplanationRequest,
    ) -> Result<String, GenerationError>;
}

/// Input for question generation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QuestionRequest {
    pub topic: String,
    pub outcome: LearningOutcome,
    /// Concepts the learner has already demonstrated.
    pub covered_concepts: Vec<String>,
    /// Concepts the question should target.
    pub remaining_concepts: Vec<String>,
    /// A retry after a partial answer. Affects framing only.
    pub follow_up: bool,
    /// The previous question, when this is a follow-up.
    #[serde(default)]
    pub previous_question: Option<String>,
}

/// Input for answer evaluation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvaluationRequest {
    pub topic: String,
    pub outcome_description: String,
    pub question: String,
    pub answer: String,
    /// The outcome's key concepts; the evaluator reports which were addressed.
    pub concepts: Vec<String>,
}

/// Input for re-teaching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplanationRequest {
    pub topic: String,
    pub outcome: LearningOutcome,
    /// Concepts the learner has not demonstrated yet.
    pub remaining_concepts: Vec<String>,
    /// The learner's last answer, for addressing misconceptions.
    #[serde(default)]
    pub last_answer: Option<String>,
}

/// Raw evaluation as reported by the service, before validation.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RawEvaluation {
    /// Should be a number in [0, 1]; anything goes until validated.
    #[serde(default)]
    pub score: Option<serde_json::Value>,
    #[serde(default, alias = "concepts")]
    pub concepts_addressed: Vec<String>,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl RawEvaluation {
    pub fn scored(score: f64, concepts: &[&str]) -> Self {
        Self {
            score: Some(serde_json::json!(score)),
            concepts_addressed: concepts.iter().map(|c| c.to_string()).collect(),
            feedback: None,
        }
    }

    pub fn with_feedback(mut self, feedback: impl Into<String>) -> Self {
        self.feedback = Some(feedback.into());
        self
    }
}

// ---------------------------------------------------------------------------
// JSON extraction
// ---------------------------------------------------------------------------

/// Extract a JSON object from a markdown-formatted LLM response.
///
/// Handles:
/// - ```json``` blocks (first one wins)
/// - Generic ``` blocks (if no json-specific block found)
/// - Bare text, from the first `{` to the last `}`
pub fn extract_json_from_markdown(response: &str) -> Option<String> {
    let mut json_block = None;
    let mut generic_block = None;
    let mut in_block = false;
    let mut is_json_block = false;
    let mut current_block = String::new();

    for line in response.lines() {
        let trimmed = line.trim();

        if !in_block && trimmed.starts_with("```") {
            in_block = true;
            let lang = trimmed.trim_start_matches('`').trim().to_lowercase();
            is_json_block = lang == "json";
            current_block.clear();
            continue;
        }

        if in_block && trimmed == "```" {
            in_block = false;
            if is_json_block && json_block.is_none() {
                json_block = Some(current_block.clone());
            } else if !is_json_block && generic_block.is_none() {
                generic_block = Some(current_block.clone());
            }
            continue;
        }

        if in_block {
            if !current_block.is_empty() {
                current_block.push('\n');
            }
            current_block.push_str(line);
        }
    }

    // Truncated (unclosed) block: keep what we have
    if in_block && !current_block.is_empty() {
        if is_json_block && json_block.is_none() {
            json_block = Some(current_block);
        } else if generic_block.is_none() {
            generic_block = Some(current_block);
        }
    }

    let candidate = json_block.or(generic_block).unwrap_or_else(|| response.to_string());
    let start = candidate.find('{')?;
    let end = candidate.rfind('}')?;
    (end > start).then(|| candidate[start..=end].to_string())
}
