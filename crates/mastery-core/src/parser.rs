//! TOML lesson parser.
//!
//! Loads lessons from TOML files and directories, and validates them.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Deserialize;

use crate::model::{LearningOutcome, Lesson, MasteryConfig, ThresholdOverrides};

/// Intermediate TOML structure for parsing lesson files.
#[derive(Debug, Deserialize)]
struct TomlLessonFile {
    lesson: TomlLessonHeader,
    #[serde(default)]
    outcomes: Vec<TomlOutcome>,
}

#[derive(Debug, Deserialize)]
struct TomlLessonHeader {
    id: String,
    #[serde(alias = "name")]
    title: String,
    #[serde(default)]
    topic: Option<String>,
    #[serde(default)]
    description: String,
    #[serde(default)]
    mastery_threshold: Option<f64>,
    #[serde(default)]
    rephrase_floor: Option<f64>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct TomlOutcome {
    id: String,
    description: String,
    #[serde(default)]
    key_concepts: TomlConcepts,
    #[serde(default)]
    order: Option<i64>,
    #[serde(default = "default_true")]
    active: bool,
    #[serde(default)]
    mastery_threshold: Option<f64>,
    #[serde(default)]
    rephrase_floor: Option<f64>,
    #[serde(default)]
    max_attempts: Option<u32>,
}

/// Key concepts as an array or a comma-separated string.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TomlConcepts {
    List(Vec<String>),
    Text(String),
}

impl Default for TomlConcepts {
    fn default() -> Self {
        TomlConcepts::List(Vec::new())
    }
}

impl TomlConcepts {
    fn into_vec(self) -> Vec<String> {
        let raw = match self {
            TomlConcepts::List(list) => list,
            TomlConcepts::Text(text) => text.split(',').map(str::to_string).collect(),
        };
        raw.into_iter()
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty())
            .collect()
    }
}

fn default_true() -> bool {
    true
}

/// Parse a single TOML file into a `Lesson`.
pub fn parse_lesson(path: &Path) -> Result<Lesson> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read lesson file: {}", path.display()))?;

    parse_lesson_str(&content, path)
}

/// Parse a lesson file, filling thresholds it leaves unset from `defaults`.
pub fn parse_lesson_with_defaults(path: &Path, defaults: &MasteryConfig) -> Result<Lesson> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read lesson file: {}", path.display()))?;

    parse_lesson_source(&content, path, defaults)
}

/// Parse a TOML string into a `Lesson` (useful for testing).
///
/// Inactive outcomes are dropped; the rest are stably sorted by `order`
/// (outcomes without one keep their file position after ordered ones).
pub fn parse_lesson_str(content: &str, source_path: &Path) -> Result<Lesson> {
    parse_lesson_source(content, source_path, &MasteryConfig::default())
}

fn parse_lesson_source(
    content: &str,
    source_path: &Path,
    defaults: &MasteryConfig,
) -> Result<Lesson> {
    let parsed: TomlLessonFile = toml::from_str(content)
        .with_context(|| format!("failed to parse TOML: {}", source_path.display()))?;
    let header = parsed.lesson;

    let mastery = MasteryConfig {
        mastery_threshold: header
            .mastery_threshold
            .unwrap_or(defaults.mastery_threshold),
        rephrase_floor: header.rephrase_floor.unwrap_or(defaults.rephrase_floor),
        max_attempts: header.max_attempts.unwrap_or(defaults.max_attempts),
    };

    let mut outcomes: Vec<TomlOutcome> = parsed.outcomes.into_iter().filter(|o| o.active).collect();
    outcomes.sort_by_key(|o| o.order.unwrap_or(i64::MAX));

    let outcomes = outcomes
        .into_iter()
        .map(|o| {
            LearningOutcome::new(o.id, o.description)
                .with_concepts(o.key_concepts.into_vec())
                .with_thresholds(ThresholdOverrides {
                    mastery_threshold: o.mastery_threshold,
                    rephrase_floor: o.rephrase_floor,
                    max_attempts: o.max_attempts,
                })
        })
        .collect();

    let lesson = Lesson {
        topic: header.topic.unwrap_or_else(|| header.title.clone()),
        id: header.id,
        title: header.title,
        description: header.description,
        mastery,
        outcomes,
    };
    lesson
        .validate()
        .with_context(|| format!("invalid lesson: {}", source_path.display()))?;
    Ok(lesson)
}

/// Recursively load all `.toml` lesson files from a directory.
pub fn load_lesson_directory(dir: &Path) -> Result<Vec<Lesson>> {
    let mut lessons = Vec::new();

    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }

    for entry in std::fs::read_dir(dir)
        .with_context(|| format!("failed to read directory: {}", dir.display()))?
    {
        let entry = entry?;
        let path = entry.path();

        if path.is_dir() {
            lessons.extend(load_lesson_directory(&path)?);
        } else if path.extension().is_some_and(|ext| ext == "toml") {
            match parse_lesson(&path) {
                Ok(lesson) => lessons.push(lesson),
                Err(e) => {
                    tracing::warn!("skipping {}: {:#}", path.display(), e);
                }
            }
        }
    }

    lessons.sort_by(|a, b| a.id.cmp(&b.id));
    Ok(lessons)
}

/// A warning from lesson validation.
#[derive(Debug, Clone)]
pub struct ValidationWarning {
    /// The outcome ID (if applicable).
    pub outcome_id: Option<String>,
    /// Warning message.
    pub message: String,
}

/// Check a lesson for issues that do not stop it from running.
pub fn validate_lesson(lesson: &Lesson) -> Vec<ValidationWarning> {
    let mut warnings = Vec::new();

    for outcome in &lesson.outcomes {
        if outcome.description.trim().is_empty() {
            warnings.push(ValidationWarning {
                outcome_id: Some(outcome.id.clone()),
                message: "description is empty".into(),
            });
        }

        // Coverage tracking has nothing to work with
        if outcome.key_concepts.is_empty() {
            warnings.push(ValidationWarning {
                outcome_id: Some(outcome.id.clone()),
                message: "no key concepts listed".into(),
            });
        }

        let mut seen_concepts = HashSet::new();
        for concept in &outcome.key_concepts {
            if !seen_concepts.insert(concept.to_lowercase()) {
                warnings.push(ValidationWarning {
                    outcome_id: Some(outcome.id.clone()),
                    message: format!("duplicate key concept: {concept}"),
                });
            }
        }
    }

    warnings
}

/// Ids of outcomes a lesson file marks inactive.
///
/// Parsing drops these, so they are reported separately.
pub fn inactive_outcomes(content: &str) -> Result<Vec<String>> {
    let parsed: TomlLessonFile = toml::from_str(content).context("failed to parse TOML")?;
    Ok(parsed
        .outcomes
        .into_iter()
        .filter(|o| !o.active)
        .map(|o| o.id)
        .collect())
}
