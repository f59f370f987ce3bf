//! Mock provider for testing and offline runs.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;

use mastery_core::error::GenerationError;
use mastery_core::traits::{GenerateRequest, GenerateResponse, LlmProvider, ModelInfo, TokenUsage};

/// A mock LLM provider for exercising the tutor without real API calls.
///
/// Returns configurable responses based on prompt content matching. In
/// [`MockProvider::tutor`] mode it instead answers tutoring prompts itself:
/// questions echo the outcome, and answers are graded by keyword overlap
/// with the key concepts.
pub struct MockProvider {
    /// Map of prompt substring → response.
    responses: HashMap<String, String>,
    /// Default response if no prompt matches.
    default_response: String,
    tutor: bool,
    failure: Option<GenerationError>,
    call_count: AtomicU32,
    last_request: Mutex<Option<GenerateRequest>>,
}

impl MockProvider {
    /// Create a new mock provider with the given prompt→response mappings.
    pub fn new(responses: HashMap<String, String>) -> Self {
        Self {
            responses,
            default_response: String::new(),
            tutor: false,
            failure: None,
            call_count: AtomicU32::new(0),
            last_request: Mutex::new(None),
        }
    }

    /// Create a mock that always returns the same response.
    pub fn with_fixed_response(response: &str) -> Self {
        Self {
            default_response: response.to_string(),
            ..Self::new(HashMap::new())
        }
    }

    /// Create a mock that plays tutor deterministically.
    pub fn tutor() -> Self {
        Self {
            tutor: true,
            ..Self::new(HashMap::new())
        }
    }

    /// Make every call fail with `error`.
    pub fn failing_with(mut self, error: GenerationError) -> Self {
        self.failure = Some(error);
        self
    }

    /// Get the number of calls made to this provider.
    pub fn call_count(&self) -> u32 {
        self.call_count.load(Ordering::Relaxed)
    }

    /// Get the last request made to this provider.
    pub fn last_request(&self) -> Option<GenerateRequest> {
        self.last_request.lock().unwrap().clone()
    }

    fn scripted(&self, prompt: &str) -> String {
        // Longest key wins so overlapping keys stay deterministic
        self.responses
            .iter()
            .filter(|(key, _)| prompt.contains(key.as_str()))
            .max_by_key(|(key, _)| key.len())
            .map(|(_, v)| v.clone())
            .unwrap_or_else(|| self.default_response.clone())
    }
}

#[async_trait]
impl LlmProvider for MockProvider {
    fn name(&self) -> &str {
        "mock"
    }

    async fn generate(&self, request: &GenerateRequest) -> anyhow::Result<GenerateResponse> {
        self.call_count.fetch_add(1, Ordering::Relaxed);
        *self.last_request.lock().unwrap() = Some(request.clone());

        if let Some(error) = &self.failure {
            return Err(error.clone().into());
        }

        let content = if self.tutor {
            tutor_reply(&request.prompt)
        } else {
            self.scripted(&request.prompt)
        };
        let prompt_tokens = (request.prompt.len() / 4) as u32;
        let completion_tokens = (content.len() / 4) as u32; // Rough estimate

        Ok(GenerateResponse {
            content,
            model: request.model.clone(),
            token_usage: TokenUsage {
                prompt_tokens,
                completion_tokens,
                total_tokens: prompt_tokens + completion_tokens,
                estimated_cost_usd: 0.0,
            },
            latency_ms: 1,
        })
    }

    fn available_models(&self) -> Vec<ModelInfo> {
        vec![ModelInfo {
            id: "mock-model".into(),
            name: "Mock Model".into(),
            provider: "mock".into(),
            max_context: 100_000,
            cost_per_1k_input: 0.0,
            cost_per_1k_output: 0.0,
        }]
    }
}

/// Value of a `Label: value` line.
fn field<'a>(prompt: &'a str, label: &str) -> Option<&'a str> {
    prompt
        .lines()
        .find_map(|line| line.strip_prefix(label))
        .map(str::trim)
}

/// Lines following `header` up to the next blank line.
fn section<'a>(prompt: &'a str, header: &str) -> Vec<&'a str> {
    prompt
        .lines()
        .skip_while(|line| line.trim() != header)
        .skip(1)
        .take_while(|line| !line.trim().is_empty())
        .collect()
}

fn tutor_reply(prompt: &str) -> String {
    let outcome = field(prompt, "Learning outcome:").unwrap_or("this topic");

    if prompt.contains("Evaluate a learner's answer") {
        let answer = section(prompt, "Answer:").join(" ").to_lowercase();
        let concepts: Vec<&str> = section(prompt, "Key concepts:")
            .into_iter()
            .filter_map(|line| line.trim().strip_prefix("- "))
            .collect();
        let addressed: Vec<&str> = concepts
            .iter()
            .copied()
            .filter(|c| answer.contains(&c.to_lowercase()))
            .collect();
        let score = if concepts.is_empty() {
            if answer.trim().is_empty() { 0.0 } else { 1.0 }
        } else {
            addressed.len() as f64 / concepts.len() as f64
        };
        let feedback = if addressed.is_empty() {
            "Your answer did not touch the key ideas yet.".to_string()
        } else {
            format!("You covered: {}.", addressed.join(", "))
        };
        return serde_json::json!({
            "score": score,
            "concepts_addressed": addressed,
            "feedback": feedback,
        })
        .to_string();
    }

    if prompt.contains("Re-teach the following") {
        return format!(
            "DEFINITION: {outcome}.\n\nKEY POINTS:\n{}",
            section(prompt, "Focus on these concepts:").join("\n")
        );
    }

    let targets: Vec<&str> = section(prompt, "The question must target these concepts:")
        .into_iter()
        .filter_map(|line| line.trim().strip_prefix("- "))
        .collect();
    if targets.is_empty() {
        format!("Explain in your own words: {outcome}")
    } else {
        format!(
            "Explain in your own words: {outcome} (mention {})",
            targets.join(", ")
        )
    }
}
