//! Answer assessment: turn the generation service's raw evaluation into a
//! validated score and a set of addressed concepts.
//!
//! The evaluator is an unreliable upstream. A missing or non-numeric score is
//! an error (retryable, never defaulted to 0); an out-of-range score is
//! clamped; concepts the outcome does not know about are dropped.

use std::sync::Arc;

use serde_json::Value;

use crate::error::GenerationError;
use crate::model::LearningOutcome;
use crate::router::Evidence;
use crate::traits::{ContentGenerator, EvaluationRequest, RawEvaluation};

/// A validated assessment of one answer.
#[derive(Debug, Clone, PartialEq)]
pub struct Assessment {
    /// Score in [0, 1].
    pub score: f64,
    /// Addressed concepts, canonical spelling, deduplicated, lesson order.
    pub concepts_addressed: Vec<String>,
    /// Evaluator's prose feedback, if any.
    pub feedback: Option<String>,
    pub evidence: Evidence,
}

impl Assessment {
    /// The fixed result for a blank answer.
    pub fn blank() -> Self {
        Self {
            score: 0.0,
            concepts_addressed: Vec::new(),
            feedback: None,
            evidence: Evidence::Blank,
        }
    }
}

/// Delegates evaluation to a [`ContentGenerator`] and validates the result.
pub struct Assessor {
    generator: Arc<dyn ContentGenerator>,
}

impl Assessor {
    pub fn new(generator: Arc<dyn ContentGenerator>) -> Self {
        Self { generator }
    }

    /// Assess `answer` to `question` for `outcome`.
    ///
    /// Blank answers short-circuit without calling the service.
    pub async fn assess(
        &self,
        topic: &str,
        question: &str,
        answer: &str,
        outcome: &LearningOutcome,
    ) -> Result<Assessment, GenerationError> {
        if answer.trim().is_empty() {
            tracing::debug!(outcome = %outcome.id, "blank answer, skipping evaluation");
            return Ok(Assessment::blank());
        }

        let request = EvaluationRequest {
            topic: topic.to_string(),
            outcome_description: outcome.description.clone(),
            question: question.to_string(),
            answer: answer.to_string(),
            concepts: outcome.key_concepts.clone(),
        };
        let raw = self.generator.evaluate_answer(&request).await?;
        validate_evaluation(&raw, outcome)
    }
}

/// Validate and normalize a raw evaluation against an outcome.
pub fn validate_evaluation(
    raw: &RawEvaluation,
    outcome: &LearningOutcome,
) -> Result<Assessment, GenerationError> {
    let score = parse_score(raw.score.as_ref())?;
    let clamped = score.clamp(0.0, 1.0);
    if clamped != score {
        tracing::debug!(outcome = %outcome.id, score, "clamping out-of-range score");
    }

    let mut addressed: Vec<&str> = Vec::new();
    for reported in &raw.concepts_addressed {
        match outcome.canonical_concept(reported) {
            Some(concept) => {
                if !addressed.contains(&concept) {
                    addressed.push(concept);
                }
            }
            None => {
                tracing::warn!(
                    outcome = %outcome.id,
                    concept = %reported,
                    "dropping concept not in outcome"
                );
            }
        }
    }

    // Report in the outcome's own order
    let concepts_addressed = outcome
        .key_concepts
        .iter()
        .filter(|c| addressed.contains(&c.as_str()))
        .cloned()
        .collect();

    let feedback = raw
        .feedback
        .as_deref()
        .map(str::trim)
        .filter(|f| !f.is_empty())
        .map(str::to_string);

    Ok(Assessment {
        score: clamped,
        concepts_addressed,
        feedback,
        evidence: Evidence::Scored,
    })
}

fn parse_score(value: Option<&Value>) -> Result<f64, GenerationError> {
    let score = match value {
        None | Some(Value::Null) => {
            return Err(GenerationError::InvalidEvaluation("missing score".into()))
        }
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        Some(_) => None,
    };
    match score {
        Some(s) if s.is_finite() => Ok(s),
        _ => Err(GenerationError::InvalidEvaluation(format!(
            "non-numeric score: {}",
            value.map(Value::to_string).unwrap_or_default()
        ))),
    }
}
