//! Core data model types for mastery.
//!
//! Lessons own an ordered list of learning outcomes; each outcome names the
//! key concepts a learner has to demonstrate. Thresholds live in
//! [`MasteryConfig`] and may be overridden per outcome.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Default score at or above which an outcome counts as mastered.
pub const DEFAULT_MASTERY_THRESHOLD: f64 = 0.8;
/// Default score below which a learner is re-taught instead of re-asked.
pub const DEFAULT_REPHRASE_FLOOR: f64 = 0.2;
/// Default number of rephrased attempts before re-teaching is forced.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 2;

/// Errors in lesson or threshold definitions.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LessonError {
    #[error("{name} must be within [0, 1], got {value}")]
    OutOfRange { name: &'static str, value: f64 },

    #[error("mastery_threshold must be greater than 0")]
    ZeroThreshold,

    #[error("rephrase_floor ({floor}) must not exceed mastery_threshold ({threshold})")]
    FloorAboveThreshold { floor: f64, threshold: f64 },

    #[error("lesson '{0}' has no active learning outcomes")]
    NoOutcomes(String),

    #[error("duplicate learning outcome id: {0}")]
    DuplicateOutcome(String),

    #[error("outcome '{outcome}': {source}")]
    Outcome {
        outcome: String,
        #[source]
        source: Box<LessonError>,
    },
}

/// Routing thresholds for an outcome.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MasteryConfig {
    /// Score at or above which the outcome is mastered.
    #[serde(default = "default_mastery_threshold")]
    pub mastery_threshold: f64,
    /// Lowest score that still earns a rephrased question.
    #[serde(default = "default_rephrase_floor")]
    pub rephrase_floor: f64,
    /// Rephrases allowed before re-teaching is forced.
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for MasteryConfig {
    fn default() -> Self {
        Self {
            mastery_threshold: DEFAULT_MASTERY_THRESHOLD,
            rephrase_floor: DEFAULT_REPHRASE_FLOOR,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

fn default_mastery_threshold() -> f64 {
    DEFAULT_MASTERY_THRESHOLD
}

fn default_rephrase_floor() -> f64 {
    DEFAULT_REPHRASE_FLOOR
}

fn default_max_attempts() -> u32 {
    DEFAULT_MAX_ATTEMPTS
}

impl MasteryConfig {
    pub fn validate(&self) -> Result<(), LessonError> {
        for (name, value) in [
            ("mastery_threshold", self.mastery_threshold),
            ("rephrase_floor", self.rephrase_floor),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(LessonError::OutOfRange { name, value });
            }
        }
        if self.mastery_threshold <= 0.0 {
            return Err(LessonError::ZeroThreshold);
        }
        if self.rephrase_floor > self.mastery_threshold {
            return Err(LessonError::FloorAboveThreshold {
                floor: self.rephrase_floor,
                threshold: self.mastery_threshold,
            });
        }
        Ok(())
    }

    /// Apply per-outcome overrides on top of these values.
    pub fn with_overrides(&self, overrides: &ThresholdOverrides) -> MasteryConfig {
        MasteryConfig {
            mastery_threshold: overrides
                .mastery_threshold
                .unwrap_or(self.mastery_threshold),
            rephrase_floor: overrides.rephrase_floor.unwrap_or(self.rephrase_floor),
            max_attempts: overrides.max_attempts.unwrap_or(self.max_attempts),
        }
    }
}

/// Per-outcome threshold overrides. Unset fields inherit from the lesson.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ThresholdOverrides {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mastery_threshold: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rephrase_floor: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
}

impl ThresholdOverrides {
    pub fn is_empty(&self) -> bool {
        self.mastery_threshold.is_none()
            && self.rephrase_floor.is_none()
            && self.max_attempts.is_none()
    }
}

/// A discrete, assessable unit of knowledge within a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LearningOutcome {
    /// Identifier, unique within the lesson (e.g. "class_definition").
    pub id: String,
    /// Human-readable description of what the learner should understand.
    pub description: String,
    /// Ordered key concepts the learner must address.
    #[serde(default)]
    pub key_concepts: Vec<String>,
    /// Threshold overrides for this outcome.
    #[serde(default, skip_serializing_if = "ThresholdOverrides::is_empty")]
    pub thresholds: ThresholdOverrides,
}

impl LearningOutcome {
    pub fn new(id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            key_concepts: Vec::new(),
            thresholds: ThresholdOverrides::default(),
        }
    }

    pub fn with_concepts<I, S>(mut self, concepts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key_concepts = concepts.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_thresholds(mut self, thresholds: ThresholdOverrides) -> Self {
        self.thresholds = thresholds;
        self
    }

    /// Look up a concept by loose spelling, returning the canonical form.
    pub fn canonical_concept(&self, reported: &str) -> Option<&str> {
        let needle = reported.trim();
        self.key_concepts
            .iter()
            .find(|c| c.trim().eq_ignore_ascii_case(needle))
            .map(String::as_str)
    }
}

/// A lesson: an ordered set of learning outcomes assessed in one session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Lesson {
    pub id: String,
    pub title: String,
    /// Subject area the questions are framed in.
    pub topic: String,
    #[serde(default)]
    pub description: String,
    /// Lesson-wide thresholds.
    #[serde(default)]
    pub mastery: MasteryConfig,
    /// Outcomes in assessment order.
    #[serde(default)]
    pub outcomes: Vec<LearningOutcome>,
}

impl Lesson {
    /// Check thresholds and outcome ids.
    pub fn validate(&self) -> Result<(), LessonError> {
        self.mastery.validate()?;
        if self.outcomes.is_empty() {
            return Err(LessonError::NoOutcomes(self.id.clone()));
        }
        let mut seen = std::collections::HashSet::new();
        for outcome in &self.outcomes {
            if !seen.insert(outcome.id.as_str()) {
                return Err(LessonError::DuplicateOutcome(outcome.id.clone()));
            }
            self.mastery
                .with_overrides(&outcome.thresholds)
                .validate()
                .map_err(|e| LessonError::Outcome {
                    outcome: outcome.id.clone(),
                    source: Box::new(e),
                })?;
        }
        Ok(())
    }
}
