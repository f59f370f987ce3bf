//! Session state: one learner's progress through one lesson.
//!
//! A [`SessionState`] is the only mutable aggregate the engine touches. It is
//! created from a [`Lesson`], mutated once per learner turn by the controller,
//! and serialized whole by the session store.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::{LearningOutcome, Lesson, LessonError, MasteryConfig};
use crate::router::Route;

/// Unique identifier of an assessment session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SessionId(Uuid);

impl SessionId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for SessionId {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for SessionId {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

impl FromStr for SessionId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Uuid::parse_str(s.trim()).map(Self)
    }
}

/// Where a session is in the assessment state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Phase {
    /// The next outcome has to be chosen.
    SelectOutcome,
    /// A question is being generated. Never persisted.
    QuestionPending,
    /// A question was asked; waiting for the learner.
    AnswerPending,
    /// An answer was scored and is being routed. Never persisted.
    Assessed,
    /// The current outcome was just mastered; a continue selects the next one.
    Feedback,
    /// A follow-up question targeting uncovered concepts was asked.
    Rephrase,
    /// The outcome was re-taught and a fresh question asked.
    Reteach,
    /// Every outcome is mastered.
    Completed,
}

impl Phase {
    /// Phases in which the next `advance` must carry a learner answer.
    pub fn expects_answer(&self) -> bool {
        matches!(self, Phase::AnswerPending | Phase::Rephrase | Phase::Reteach)
    }

    /// Phases that only exist inside a single `advance` call.
    pub fn is_transient(&self) -> bool {
        matches!(self, Phase::QuestionPending | Phase::Assessed)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Phase::SelectOutcome => "select_outcome",
            Phase::QuestionPending => "question_pending",
            Phase::AnswerPending => "answer_pending",
            Phase::Assessed => "assessed",
            Phase::Feedback => "feedback",
            Phase::Rephrase => "rephrase",
            Phase::Reteach => "reteach",
            Phase::Completed => "completed",
        }
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The outcome currently being assessed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "snake_case")]
pub enum CurrentOutcome {
    /// Nothing selected yet.
    None,
    Outcome(String),
    /// Terminal sentinel: every outcome is mastered.
    AllMastered,
}

impl CurrentOutcome {
    pub fn id(&self) -> Option<&str> {
        match self {
            CurrentOutcome::Outcome(id) => Some(id),
            _ => None,
        }
    }
}

/// Which kind of prompt a learner answer responded to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnKind {
    Question,
    Rephrase,
    Reteach,
}

/// Per-outcome progress within a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeProgress {
    pub outcome: LearningOutcome,
    /// Highest mastery demonstrated so far, in [0, 1].
    pub mastery: f64,
    /// Key concepts already demonstrated (canonical spelling).
    #[serde(default)]
    pub covered: BTreeSet<String>,
    /// Answers submitted for this outcome.
    #[serde(default)]
    pub answers: u32,
    #[serde(default)]
    pub mastered_at: Option<DateTime<Utc>>,
}

impl OutcomeProgress {
    fn new(outcome: LearningOutcome) -> Self {
        Self {
            outcome,
            mastery: 0.0,
            covered: BTreeSet::new(),
            answers: 0,
            mastered_at: None,
        }
    }

    pub fn id(&self) -> &str {
        &self.outcome.id
    }

    /// Covered concepts in lesson order.
    pub fn covered_concepts(&self) -> Vec<String> {
        self.outcome
            .key_concepts
            .iter()
            .filter(|c| self.covered.contains(*c))
            .cloned()
            .collect()
    }

    /// Key concepts not yet demonstrated, in lesson order.
    pub fn remaining_concepts(&self) -> Vec<String> {
        self.outcome
            .key_concepts
            .iter()
            .filter(|c| !self.covered.contains(*c))
            .cloned()
            .collect()
    }
}

/// One answered question in the session's audit log.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TurnRecord {
    pub outcome_id: String,
    pub kind: TurnKind,
    pub question: String,
    pub answer: String,
    /// Clamped score for this answer.
    pub score: f64,
    #[serde(default)]
    pub concepts_addressed: Vec<String>,
    pub route: Route,
    /// Outcome mastery after this turn was applied.
    pub mastery_after: f64,
    pub timestamp: DateTime<Utc>,
}

/// The mutable aggregate the engine operates on.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionState {
    pub id: SessionId,
    pub lesson_id: String,
    pub topic: String,
    /// Lesson-wide thresholds; outcomes may override them.
    pub config: MasteryConfig,
    /// Outcomes in lesson order.
    pub outcomes: Vec<OutcomeProgress>,
    pub current: CurrentOutcome,
    pub phase: Phase,
    #[serde(default)]
    pub last_question: Option<String>,
    /// Kind of the prompt in `last_question`.
    #[serde(default = "default_turn_kind")]
    pub last_question_kind: TurnKind,
    #[serde(default)]
    pub last_answer: Option<String>,
    /// Consecutive rephrases on the current outcome.
    #[serde(default)]
    pub failed_attempts: u32,
    #[serde(default)]
    pub feedback: Option<String>,
    #[serde(default)]
    pub turns: Vec<TurnRecord>,
    /// Optimistic concurrency counter, bumped by the store on every swap.
    #[serde(default)]
    pub version: u64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

fn default_turn_kind() -> TurnKind {
    TurnKind::Question
}

impl SessionState {
    /// Create a fresh session: every outcome at mastery 0 with no coverage.
    pub fn new(lesson: &Lesson) -> Result<Self, LessonError> {
        Self::with_id(SessionId::new(), lesson)
    }

    pub fn with_id(id: SessionId, lesson: &Lesson) -> Result<Self, LessonError> {
        lesson.validate()?;
        let now = Utc::now();
        Ok(Self {
            id,
            lesson_id: lesson.id.clone(),
            topic: lesson.topic.clone(),
            config: lesson.mastery,
            outcomes: lesson
                .outcomes
                .iter()
                .cloned()
                .map(OutcomeProgress::new)
                .collect(),
            current: CurrentOutcome::None,
            phase: Phase::SelectOutcome,
            last_question: None,
            last_question_kind: TurnKind::Question,
            last_answer: None,
            failed_attempts: 0,
            feedback: None,
            turns: Vec::new(),
            version: 0,
            created_at: now,
            updated_at: now,
            completed_at: None,
        })
    }

    pub fn outcome(&self, id: &str) -> Option<&OutcomeProgress> {
        self.outcomes.iter().find(|p| p.id() == id)
    }

    pub fn outcome_mut(&mut self, id: &str) -> Option<&mut OutcomeProgress> {
        self.outcomes.iter_mut().find(|p| p.id() == id)
    }

    pub fn current_outcome(&self) -> Option<&OutcomeProgress> {
        self.current.id().and_then(|id| self.outcome(id))
    }

    /// Effective thresholds for an outcome.
    pub fn thresholds_for(&self, progress: &OutcomeProgress) -> MasteryConfig {
        self.config.with_overrides(&progress.outcome.thresholds)
    }

    pub fn is_mastered(&self, progress: &OutcomeProgress) -> bool {
        progress.mastery >= self.thresholds_for(progress).mastery_threshold
    }

    pub fn all_mastered(&self) -> bool {
        self.outcomes.iter().all(|p| self.is_mastered(p))
    }

    pub fn is_completed(&self) -> bool {
        self.phase == Phase::Completed
    }

    /// Make `id` the current outcome and start a fresh attempt cycle.
    pub(crate) fn begin_outcome(&mut self, id: &str, now: DateTime<Utc>) {
        self.current = CurrentOutcome::Outcome(id.to_string());
        self.failed_attempts = 0;
        self.feedback = None;
        if let Some(progress) = self.outcome_mut(id) {
            progress.covered.clear();
        }
        self.phase = Phase::QuestionPending;
        self.updated_at = now;
    }

    /// Merge demonstrated concepts into an outcome's coverage.
    ///
    /// Only concepts from the outcome's key list are kept. Returns the
    /// concepts that were newly covered.
    pub(crate) fn merge_coverage(&mut self, id: &str, concepts: &[String]) -> Vec<String> {
        let Some(progress) = self.outcome_mut(id) else {
            return Vec::new();
        };
        let mut added = Vec::new();
        for concept in concepts {
            if progress.outcome.key_concepts.contains(concept)
                && progress.covered.insert(concept.clone())
            {
                added.push(concept.clone());
            }
        }
        added
    }

    /// Record a scored answer. Mastery never decreases; returns the new value.
    pub(crate) fn record_score(&mut self, id: &str, score: f64, now: DateTime<Utc>) -> f64 {
        let threshold = match self.outcome(id) {
            Some(p) => self.thresholds_for(p).mastery_threshold,
            None => return 0.0,
        };
        let Some(progress) = self.outcome_mut(id) else {
            return 0.0;
        };
        progress.answers += 1;
        if score < progress.mastery {
            tracing::debug!(
                outcome = id,
                previous = progress.mastery,
                score,
                "keeping higher recorded mastery"
            );
        }
        progress.mastery = progress.mastery.max(score.clamp(0.0, 1.0));
        if progress.mastery >= threshold && progress.mastered_at.is_none() {
            progress.mastered_at = Some(now);
        }
        progress.mastery
    }

    pub(crate) fn complete(&mut self, now: DateTime<Utc>) {
        self.current = CurrentOutcome::AllMastered;
        self.phase = Phase::Completed;
        self.completed_at = Some(now);
        self.updated_at = now;
    }

    /// Structural integrity check for a loaded session record.
    pub fn validate(&self) -> Result<(), String> {
        if self.outcomes.is_empty() {
            return Err("session has no outcomes".into());
        }
        if self.phase.is_transient() {
            return Err(format!("transient phase '{}' was persisted", self.phase));
        }
        for progress in &self.outcomes {
            if !(0.0..=1.0).contains(&progress.mastery) {
                return Err(format!(
                    "outcome '{}' has mastery {} outside [0, 1]",
                    progress.id(),
                    progress.mastery
                ));
            }
            if let Some(stray) = progress
                .covered
                .iter()
                .find(|c| !progress.outcome.key_concepts.contains(*c))
            {
                return Err(format!(
                    "outcome '{}' covers unknown concept '{stray}'",
                    progress.id()
                ));
            }
        }
        match &self.current {
            CurrentOutcome::Outcome(id) if self.outcome(id).is_none() => {
                return Err(format!("current outcome '{id}' does not exist"));
            }
            CurrentOutcome::AllMastered if !self.all_mastered() => {
                return Err("marked all-mastered with unmastered outcomes".into());
            }
            _ => {}
        }
        let terminal = self.current == CurrentOutcome::AllMastered;
        if terminal != self.is_completed() {
            return Err(format!(
                "phase '{}' disagrees with current outcome {:?}",
                self.phase, self.current
            ));
        }
        if self.phase.expects_answer() {
            if self.current.id().is_none() {
                return Err(format!("phase '{}' without a current outcome", self.phase));
            }
            if self.last_question.is_none() {
                return Err(format!("phase '{}' without a question", self.phase));
            }
        }
        Ok(())
    }
}
