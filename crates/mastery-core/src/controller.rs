//! The assessment state machine.
//!
//! [`AssessmentController::advance`] takes a session snapshot and an optional
//! learner answer and returns the next snapshot plus one [`OutputEvent`].
//! The input snapshot is never touched: all work happens on a copy, so a
//! failed or cancelled call commits nothing. Persistence and per-session
//! serialization belong to [`crate::service::AssessmentService`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use crate::assessor::{Assessment, Assessor};
use crate::error::{EngineError, GenerationError};
use crate::model::Lesson;
use crate::report::SessionSummary;
use crate::router::{self, Evidence, Route, RouteInput};
use crate::selector::{select_next, Selection};
use crate::session::{Phase, SessionState, TurnKind, TurnRecord};
use crate::traits::{ContentGenerator, ExplanationRequest, QuestionRequest};

/// Retry and timeout policy for generation calls.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Retries after the first attempt on transient failures.
    pub max_retries: u32,
    /// Delay before the first retry; doubles after each failure.
    pub retry_delay: Duration,
    /// Upper bound for the backoff delay.
    pub max_retry_delay: Duration,
    /// Deadline for a single generation call.
    pub call_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            retry_delay: Duration::from_millis(500),
            max_retry_delay: Duration::from_secs(10),
            call_timeout: Duration::from_secs(60),
        }
    }
}

/// What the learner should see after a turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum OutputEvent {
    /// A new question for an outcome.
    QuestionReady {
        outcome_id: String,
        question: String,
        follow_up: bool,
    },
    /// Response to an answer. Carries the next question unless the outcome
    /// was just mastered.
    Feedback {
        outcome_id: String,
        text: String,
        mastered: bool,
        #[serde(default)]
        next_question: Option<String>,
    },
    /// Every outcome is mastered.
    Completed { summary: SessionSummary },
}

impl OutputEvent {
    /// The question the learner should answer next, if any.
    pub fn question(&self) -> Option<&str> {
        match self {
            OutputEvent::QuestionReady { question, .. } => Some(question),
            OutputEvent::Feedback { next_question, .. } => next_question.as_deref(),
            OutputEvent::Completed { .. } => None,
        }
    }
}

/// Drives one session through the assessment state machine.
pub struct AssessmentController {
    generator: Arc<dyn ContentGenerator>,
    assessor: Assessor,
    config: EngineConfig,
}

impl AssessmentController {
    pub fn new(generator: Arc<dyn ContentGenerator>, config: EngineConfig) -> Self {
        Self {
            assessor: Assessor::new(Arc::clone(&generator)),
            generator,
            config,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Create a session for `lesson` and ask its first question.
    pub async fn start_assessment(
        &self,
        lesson: &Lesson,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        let state = SessionState::new(lesson).map_err(|e| {
            EngineError::InputContract(format!("invalid lesson '{}': {e}", lesson.id))
        })?;
        tracing::info!(session = %state.id, lesson = %lesson.id, "starting assessment");
        self.advance(&state, None).await
    }

    /// Run one transition.
    ///
    /// Phases that expect an answer require `Some`; all others require
    /// `None`. A completed session answers `None` with its summary and is
    /// left as is.
    #[instrument(skip_all, fields(session = %state.id, phase = %state.phase))]
    pub async fn advance(
        &self,
        state: &SessionState,
        answer: Option<&str>,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        if state.phase.is_transient() {
            return Err(EngineError::InvalidSession(format!(
                "session is in transient phase '{}'",
                state.phase
            )));
        }

        match (state.phase, answer) {
            (Phase::Completed, None) => {
                let summary = SessionSummary::from_state(state);
                Ok((state.clone(), OutputEvent::Completed { summary }))
            }
            (Phase::Completed, Some(_)) => Err(EngineError::InputContract(
                "session is completed; no answer is expected".into(),
            )),
            (phase, Some(answer)) if phase.expects_answer() => {
                self.assess_turn(state.clone(), answer).await
            }
            (phase, None) if phase.expects_answer() => Err(EngineError::InputContract(format!(
                "an answer is expected in phase '{phase}'"
            ))),
            (phase, Some(_)) => Err(EngineError::InputContract(format!(
                "no answer is expected in phase '{phase}'"
            ))),
            (_, None) => self.select_and_ask(state.clone()).await,
        }
    }

    async fn select_and_ask(
        &self,
        mut next: SessionState,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        let id = match select_next(&next) {
            Selection::AllMastered => {
                next.complete(Utc::now());
                tracing::info!(turns = next.turns.len(), "all outcomes mastered");
                let summary = SessionSummary::from_state(&next);
                return Ok((next, OutputEvent::Completed { summary }));
            }
            Selection::Outcome(id) => id,
        };

        next.begin_outcome(&id, Utc::now());
        tracing::info!(outcome = %id, "selected outcome");

        let progress = next.outcome(&id).ok_or_else(|| missing_outcome(&id))?;
        let request = QuestionRequest {
            topic: next.topic.clone(),
            outcome: progress.outcome.clone(),
            covered_concepts: progress.covered_concepts(),
            remaining_concepts: progress.remaining_concepts(),
            follow_up: false,
            previous_question: None,
        };
        let question = self.generate_question(&request).await?;

        next.last_question = Some(question.clone());
        next.last_question_kind = TurnKind::Question;
        next.last_answer = None;
        next.phase = Phase::AnswerPending;
        next.updated_at = Utc::now();

        Ok((
            next,
            OutputEvent::QuestionReady {
                outcome_id: id,
                question,
                follow_up: false,
            },
        ))
    }

    async fn assess_turn(
        &self,
        mut next: SessionState,
        answer: &str,
    ) -> Result<(SessionState, OutputEvent), EngineError> {
        let id = next
            .current
            .id()
            .map(str::to_string)
            .ok_or_else(|| EngineError::InvalidSession("no current outcome".into()))?;
        let question = next
            .last_question
            .clone()
            .ok_or_else(|| EngineError::InvalidSession("no question was asked".into()))?;
        let progress = next.outcome(&id).ok_or_else(|| missing_outcome(&id))?;
        let outcome = progress.outcome.clone();
        let thresholds = next.thresholds_for(progress);
        let topic = next.topic.clone();

        let assessment = self
            .with_retry("evaluate_answer", || {
                self.assessor.assess(&topic, &question, answer, &outcome)
            })
            .await?;
        next.phase = Phase::Assessed;

        let now = Utc::now();
        let added = next.merge_coverage(&id, &assessment.concepts_addressed);
        let mastery_after = next.record_score(&id, assessment.score, now);
        let progress = next.outcome(&id).ok_or_else(|| missing_outcome(&id))?;
        let covered = progress.covered_concepts();
        let remaining = progress.remaining_concepts();

        let decision = router::route(
            &RouteInput {
                score: assessment.score,
                failed_attempts: next.failed_attempts,
                remaining_concepts: &remaining,
                evidence: assessment.evidence,
            },
            &thresholds,
        );
        tracing::info!(
            outcome = %id,
            score = assessment.score,
            mastery = mastery_after,
            new_concepts = added.len(),
            failed_attempts = next.failed_attempts,
            route = %decision.route,
            "assessed answer"
        );

        next.turns.push(TurnRecord {
            outcome_id: id.clone(),
            kind: next.last_question_kind,
            question: question.clone(),
            answer: answer.to_string(),
            score: assessment.score,
            concepts_addressed: assessment.concepts_addressed.clone(),
            route: decision.route,
            mastery_after,
            timestamp: now,
        });
        next.last_answer = Some(answer.to_string());

        let event = match decision.route {
            Route::Feedback => {
                let text = assessment.feedback.clone().unwrap_or_else(|| {
                    format!(
                        "Great work! You've shown mastery of: {}.",
                        outcome.description
                    )
                });
                next.failed_attempts = 0;
                next.feedback = Some(text.clone());
                next.phase = Phase::Feedback;
                OutputEvent::Feedback {
                    outcome_id: id,
                    text,
                    mastered: true,
                    next_question: None,
                }
            }
            Route::Rephrase => {
                let request = QuestionRequest {
                    topic: topic.clone(),
                    outcome: outcome.clone(),
                    covered_concepts: covered,
                    remaining_concepts: decision.target_concepts,
                    follow_up: true,
                    previous_question: Some(question),
                };
                let follow_up = self.generate_question(&request).await?;
                let text = rephrase_feedback(&assessment);

                next.failed_attempts += 1;
                next.feedback = Some(text.clone());
                next.last_question = Some(follow_up.clone());
                next.last_question_kind = TurnKind::Rephrase;
                next.phase = Phase::Rephrase;
                OutputEvent::Feedback {
                    outcome_id: id,
                    text,
                    mastered: false,
                    next_question: Some(follow_up),
                }
            }
            Route::Reteach => {
                let explain = ExplanationRequest {
                    topic: topic.clone(),
                    outcome: outcome.clone(),
                    remaining_concepts: decision.target_concepts.clone(),
                    last_answer: Some(answer.to_string()).filter(|a| !a.trim().is_empty()),
                };
                let explanation = self.explain(&explain).await?;
                let request = QuestionRequest {
                    topic: topic.clone(),
                    outcome: outcome.clone(),
                    covered_concepts: covered,
                    remaining_concepts: decision.target_concepts,
                    follow_up: false,
                    previous_question: None,
                };
                let fresh = self.generate_question(&request).await?;
                let text = match &assessment.feedback {
                    Some(feedback) => format!("{feedback}\n\n{explanation}"),
                    None => explanation,
                };

                next.failed_attempts = 0;
                next.feedback = Some(text.clone());
                next.last_question = Some(fresh.clone());
                next.last_question_kind = TurnKind::Reteach;
                next.phase = Phase::Reteach;
                OutputEvent::Feedback {
                    outcome_id: id,
                    text,
                    mastered: false,
                    next_question: Some(fresh),
                }
            }
        };

        next.updated_at = Utc::now();
        Ok((next, event))
    }

    async fn generate_question(&self, request: &QuestionRequest) -> Result<String, EngineError> {
        self.with_retry("generate_question", move || async move {
            self.generator
                .generate_question(request)
                .await
                .and_then(non_empty)
        })
        .await
    }

    async fn explain(&self, request: &ExplanationRequest) -> Result<String, EngineError> {
        self.with_retry("explain_outcome", move || async move {
            self.generator
                .explain_outcome(request)
                .await
                .and_then(non_empty)
        })
        .await
    }

    /// Run a generation call with a per-call deadline, retrying transient
    /// failures with exponential backoff.
    async fn with_retry<T, F, Fut>(
        &self,
        operation: &'static str,
        mut call: F,
    ) -> Result<T, EngineError>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, GenerationError>>,
    {
        let mut delay = self.config.retry_delay;
        let mut attempts = 0u32;
        loop {
            attempts += 1;
            let result = match tokio::time::timeout(self.config.call_timeout, call()).await {
                Ok(result) => result,
                Err(_) => Err(GenerationError::Timeout {
                    after_ms: self.config.call_timeout.as_millis() as u64,
                }),
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if err.is_permanent() || attempts > self.config.max_retries {
                tracing::error!(operation, attempts, error = %err, "generation failed");
                return Err(EngineError::Generation {
                    attempts,
                    source: err,
                });
            }

            // Use the service's retry-after hint if it gave one
            let wait = err
                .retry_after_ms()
                .map(Duration::from_millis)
                .unwrap_or(delay);
            tracing::warn!(
                operation,
                attempt = attempts,
                wait_ms = wait.as_millis() as u64,
                error = %err,
                "generation call failed, retrying"
            );
            tokio::time::sleep(wait).await;
            delay = (delay * 2).min(self.config.max_retry_delay);
        }
    }
}

fn non_empty(text: String) -> Result<String, GenerationError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        Err(GenerationError::EmptyResponse)
    } else {
        Ok(trimmed.to_string())
    }
}

fn rephrase_feedback(assessment: &Assessment) -> String {
    if let Some(feedback) = &assessment.feedback {
        return feedback.clone();
    }
    match assessment.evidence {
        Evidence::Blank => {
            "No answer was given. Here is another way to look at the question.".to_string()
        }
        Evidence::Scored => {
            "Good start. Let's look at the parts you haven't covered yet.".to_string()
        }
    }
}

fn missing_outcome(id: &str) -> EngineError {
    EngineError::InvalidSession(format!("outcome '{id}' is not part of this session"))
}
