//! Scripted content generator for testing the engine without real API calls.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;

use crate::error::GenerationError;
use crate::traits::{
    ContentGenerator, EvaluationRequest, ExplanationRequest, QuestionRequest, RawEvaluation,
};

/// A deterministic [`ContentGenerator`].
///
/// Each method pops the next scripted result from its queue. When a queue is
/// empty, questions and explanations fall back to generated text and
/// evaluations fail with a malformed-response error.
#[derive(Default)]
pub struct ScriptedGenerator {
    questions: Mutex<VecDeque<Result<String, GenerationError>>>,
    evaluations: Mutex<VecDeque<Result<RawEvaluation, GenerationError>>>,
    explanations: Mutex<VecDeque<Result<String, GenerationError>>>,
    delay: Option<Duration>,
    question_calls: AtomicU32,
    evaluate_calls: AtomicU32,
    explain_calls: AtomicU32,
    in_flight: AtomicU32,
    peak_in_flight: AtomicU32,
    question_requests: Mutex<Vec<QuestionRequest>>,
    last_evaluation: Mutex<Option<EvaluationRequest>>,
}

impl ScriptedGenerator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a question result.
    pub fn with_question(self, result: Result<String, GenerationError>) -> Self {
        self.questions.lock().unwrap().push_back(result);
        self
    }

    /// Queue an evaluation result.
    pub fn with_evaluation(self, result: Result<RawEvaluation, GenerationError>) -> Self {
        self.evaluations.lock().unwrap().push_back(result);
        self
    }

    /// Queue one successful evaluation per score, with no concepts.
    pub fn with_scores(self, scores: &[f64]) -> Self {
        for &score in scores {
            self.evaluations
                .lock()
                .unwrap()
                .push_back(Ok(RawEvaluation::scored(score, &[])));
        }
        self
    }

    /// Queue an explanation result.
    pub fn with_explanation(self, result: Result<String, GenerationError>) -> Self {
        self.explanations.lock().unwrap().push_back(result);
        self
    }

    /// Sleep this long before answering every call.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn question_calls(&self) -> u32 {
        self.question_calls.load(Ordering::Relaxed)
    }

    pub fn evaluate_calls(&self) -> u32 {
        self.evaluate_calls.load(Ordering::Relaxed)
    }

    pub fn explain_calls(&self) -> u32 {
        self.explain_calls.load(Ordering::Relaxed)
    }

    /// Total calls across all three operations.
    pub fn total_calls(&self) -> u32 {
        self.question_calls() + self.evaluate_calls() + self.explain_calls()
    }

    /// Every question request received, in order.
    pub fn question_requests(&self) -> Vec<QuestionRequest> {
        self.question_requests.lock().unwrap().clone()
    }

    pub fn last_evaluation_request(&self) -> Option<EvaluationRequest> {
        self.last_evaluation.lock().unwrap().clone()
    }

    /// Highest number of calls that were running at the same time.
    pub fn peak_in_flight(&self) -> u32 {
        self.peak_in_flight.load(Ordering::SeqCst)
    }

    async fn pause(&self) {
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl ContentGenerator for ScriptedGenerator {
    async fn generate_question(
        &self,
        request: &QuestionRequest,
    ) -> Result<String, GenerationError> {
        let n = self.question_calls.fetch_add(1, Ordering::Relaxed) + 1;
        self.question_requests.lock().unwrap().push(request.clone());
        self.pause().await;

        let scripted = self.questions.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(format!(
                "Question {n}: explain {}.",
                request.outcome.description.to_lowercase()
            ))
        })
    }

    async fn evaluate_answer(
        &self,
        request: &EvaluationRequest,
    ) -> Result<RawEvaluation, GenerationError> {
        self.evaluate_calls.fetch_add(1, Ordering::Relaxed);
        *self.last_evaluation.lock().unwrap() = Some(request.clone());
        self.pause().await;

        let scripted = self.evaluations.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Err(GenerationError::MalformedResponse(
                "no scripted evaluation".into(),
            ))
        })
    }

    async fn explain_outcome(
        &self,
        request: &ExplanationRequest,
    ) -> Result<String, GenerationError> {
        self.explain_calls.fetch_add(1, Ordering::Relaxed);
        self.pause().await;

        let scripted = self.explanations.lock().unwrap().pop_front();
        scripted.unwrap_or_else(|| {
            Ok(format!(
                "Let's review: {}. Key ideas: {}.",
                request.outcome.description,
                request.remaining_concepts.join(", ")
            ))
        })
    }
}
