//! Prompt-backed [`ContentGenerator`] over any [`LlmProvider`].
//!
//! Questions and explanations are free text. Evaluations are requested as a
//! JSON object and parsed leniently (fenced or bare); shape problems surface
//! as [`GenerationError::MalformedResponse`] so the engine can retry them.

use std::fmt::Write as _;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::instrument;

use mastery_core::error::GenerationError;
use mastery_core::traits::{
    extract_json_from_markdown, ContentGenerator, EvaluationRequest, ExplanationRequest,
    GenerateRequest, LlmProvider, QuestionRequest, RawEvaluation,
};

/// Default system prompt for every tutoring call.
pub const TUTOR_SYSTEM_PROMPT: &str = "You are a patient, precise tutor running a mastery-based lesson. Ask one clear question at a time, grade answers strictly against the listed key concepts, and explain ideas with concrete examples. Never reveal the answer inside a question.";

const QUESTION_MAX_TOKENS: u32 = 300;
const EVALUATION_MAX_TOKENS: u32 = 600;
const EXPLANATION_MAX_TOKENS: u32 = 1500;

/// Adapts an [`LlmProvider`] into the engine's [`ContentGenerator`] port.
pub struct LlmContentGenerator {
    provider: Arc<dyn LlmProvider>,
    model: String,
    temperature: f64,
    evaluation_temperature: f64,
    system_prompt: Option<String>,
}

impl std::fmt::Debug for LlmContentGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmContentGenerator")
            .field("provider", &self.provider.name())
            .field("model", &self.model)
            .field("temperature", &self.temperature)
            .field("evaluation_temperature", &self.evaluation_temperature)
            .field("system_prompt", &self.system_prompt)
            .finish()
    }
}

impl LlmContentGenerator {
    pub fn new(provider: Arc<dyn LlmProvider>, model: impl Into<String>) -> Self {
        Self {
            provider,
            model: model.into(),
            temperature: 0.7,
            evaluation_temperature: 0.0,
            system_prompt: None,
        }
    }

    /// Sampling temperature for questions and explanations.
    pub fn with_temperature(mut self, temperature: f64) -> Self {
        self.temperature = temperature;
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    async fn complete(
        &self,
        prompt: String,
        max_tokens: u32,
        temperature: f64,
    ) -> Result<String, GenerationError> {
        let request = GenerateRequest {
            model: self.model.clone(),
            prompt,
            system_prompt: self.system_prompt.clone(),
            max_tokens,
            temperature,
            stop_sequences: vec![],
        };
        let response = self
            .provider
            .generate(&request)
            .await
            .map_err(GenerationError::from_provider)?;
        tracing::debug!(
            provider = self.provider.name(),
            latency_ms = response.latency_ms,
            tokens = response.token_usage.total_tokens,
            "completion received"
        );

        let content = response.content.trim();
        if content.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(content.to_string())
    }
}

#[async_trait]
impl ContentGenerator for LlmContentGenerator {
    #[instrument(skip_all, fields(outcome = %request.outcome.id, follow_up = request.follow_up))]
    async fn generate_question(
        &self,
        request: &QuestionRequest,
    ) -> Result<String, GenerationError> {
        let content = self
            .complete(question_prompt(request), QUESTION_MAX_TOKENS, self.temperature)
            .await?;
        let question = clean_question(&content);
        if question.is_empty() {
            return Err(GenerationError::EmptyResponse);
        }
        Ok(question)
    }

    #[instrument(skip_all, fields(outcome = %request.outcome_description))]
    async fn evaluate_answer(
        &self,
        request: &EvaluationRequest,
    ) -> Result<RawEvaluation, GenerationError> {
        let content = self
            .complete(
                evaluation_prompt(request),
                EVALUATION_MAX_TOKENS,
                self.evaluation_temperature,
            )
            .await?;
        parse_evaluation(&content)
    }

    #[instrument(skip_all, fields(outcome = %request.outcome.id))]
    async fn explain_outcome(
        &self,
        request: &ExplanationRequest,
    ) -> Result<String, GenerationError> {
        self.complete(
            explanation_prompt(request),
            EXPLANATION_MAX_TOKENS,
            self.temperature,
        )
        .await
    }
}

fn bullet_list(items: &[String]) -> String {
    items
        .iter()
        .map(|item| format!("- {item}"))
        .collect::<Vec<_>>()
        .join("\n")
}

pub(crate) fn question_prompt(request: &QuestionRequest) -> String {
    let mut prompt = format!(
        "Topic: {}\nLearning outcome: {}\n",
        request.topic, request.outcome.description
    );

    if !request.covered_concepts.is_empty() {
        let _ = write!(
            prompt,
            "\nThe learner has already demonstrated:\n{}\n",
            bullet_list(&request.covered_concepts)
        );
    }
    if !request.remaining_concepts.is_empty() {
        let _ = write!(
            prompt,
            "\nThe question must target these concepts:\n{}\n",
            bullet_list(&request.remaining_concepts)
        );
    }

    if request.follow_up {
        if let Some(previous) = &request.previous_question {
            let _ = write!(prompt, "\nThe previous question was:\n\"{previous}\"\n");
        }
        prompt.push_str(
            "\nThe learner's last answer was incomplete. Ask a follow-up question that \
             approaches the missing concepts from a different angle, with a small hint. \
             Do not repeat the previous question.\n",
        );
    } else {
        prompt.push_str(
            "\nAsk one open-ended question that checks whether the learner understands \
             this outcome in their own words.\n",
        );
    }

    prompt.push_str("\nRespond with the question only.");
    prompt
}

pub(crate) fn evaluation_prompt(request: &EvaluationRequest) -> String {
    format!(
        r#"Evaluate a learner's answer.

Topic: {topic}
Learning outcome: {outcome}

Question:
{question}

Answer:
{answer}

Key concepts:
{concepts}

Score how well the answer demonstrates the learning outcome, from 0.0 (nothing
relevant) to 1.0 (complete and correct). List which key concepts the answer
actually addresses, using their exact names from the list above. Give one or two
sentences of encouraging, specific feedback.

Respond with JSON only, in this shape:
{{"score": 0.0, "concepts_addressed": ["..."], "feedback": "..."}}"#,
        topic = request.topic,
        outcome = request.outcome_description,
        question = request.question,
        answer = request.answer,
        concepts = if request.concepts.is_empty() {
            "(none listed)".to_string()
        } else {
            bullet_list(&request.concepts)
        },
    )
}

pub(crate) fn explanation_prompt(request: &ExplanationRequest) -> String {
    let mut prompt = format!(
        "Re-teach the following learning outcome to a learner who is struggling.\n\n\
         Topic: {}\nLearning outcome: {}\n",
        request.topic, request.outcome.description
    );
    if !request.remaining_concepts.is_empty() {
        let _ = write!(
            prompt,
            "\nFocus on these concepts:\n{}\n",
            bullet_list(&request.remaining_concepts)
        );
    }
    if let Some(answer) = &request.last_answer {
        let _ = write!(
            prompt,
            "\nThe learner's last answer was:\n\"{answer}\"\nAddress any misconception it shows.\n"
        );
    }
    prompt.push_str(
        "\nStructure the lesson with these sections:\n\
         1. DEFINITION: a clear definition (2-3 sentences)\n\
         2. EXPLANATION: why it matters and how it works (4-6 sentences)\n\
         3. EXAMPLES: two concrete, worked examples\n\
         4. COMMON ERRORS: two frequent mistakes and how to avoid them\n\
         5. KEY POINTS: three short takeaways\n\
         \nKeep it concise and do not ask a question at the end.",
    );
    prompt
}

/// Strip labels and wrapping quotes models like to add around a question.
fn clean_question(content: &str) -> String {
    let mut text = content.trim();
    for label in ["Question:", "**Question:**", "Q:"] {
        if let Some(rest) = text.strip_prefix(label) {
            text = rest.trim_start();
        }
    }
    text.trim_matches('"').trim().to_string()
}

/// Parse an evaluation response into its raw, unvalidated form.
pub fn parse_evaluation(content: &str) -> Result<RawEvaluation, GenerationError> {
    let json = extract_json_from_markdown(content).ok_or_else(|| {
        GenerationError::MalformedResponse("no JSON object in evaluation".into())
    })?;
    serde_json::from_str(&json)
        .map_err(|e| GenerationError::MalformedResponse(format!("invalid evaluation JSON: {e}")))
}
