//! Progress summaries and session transcripts with JSON persistence.

use std::path::Path;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::router::Route;
use crate::session::{OutcomeProgress, SessionId, SessionState, TurnKind, TurnRecord};

/// Snapshot of a learner's progress through a lesson.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub session_id: SessionId,
    pub lesson_id: String,
    pub topic: String,
    /// Phase name at the time of the snapshot.
    pub phase: String,
    /// Id of the outcome being worked on, if any.
    pub current_outcome: Option<String>,
    pub outcomes: Vec<OutcomeSummary>,
    /// Answers submitted across all outcomes.
    pub turns: usize,
    pub mastered_count: usize,
    /// Mean mastery across outcomes.
    pub overall_mastery: f64,
    pub completed: bool,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,
}

/// Progress on a single learning outcome.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutcomeSummary {
    pub id: String,
    pub description: String,
    pub mastery: f64,
    pub threshold: f64,
    pub mastered: bool,
    pub answers: u32,
    pub covered: Vec<String>,
    pub remaining: Vec<String>,
    /// Follow-up questions asked for this outcome.
    pub rephrases: usize,
    /// Times the outcome was re-taught.
    pub reteaches: usize,
}

impl OutcomeSummary {
    fn from_progress(state: &SessionState, progress: &OutcomeProgress) -> Self {
        let turns_routed = |route: Route| {
            state
                .turns
                .iter()
                .filter(|t| t.outcome_id == progress.id() && t.route == route)
                .count()
        };
        Self {
            id: progress.id().to_string(),
            description: progress.outcome.description.clone(),
            mastery: progress.mastery,
            threshold: state.thresholds_for(progress).mastery_threshold,
            mastered: state.is_mastered(progress),
            answers: progress.answers,
            covered: progress.covered_concepts(),
            remaining: progress.remaining_concepts(),
            rephrases: turns_routed(Route::Rephrase),
            reteaches: turns_routed(Route::Reteach),
        }
    }
}

impl SessionSummary {
    pub fn from_state(state: &SessionState) -> Self {
        let outcomes: Vec<OutcomeSummary> = state
            .outcomes
            .iter()
            .map(|p| OutcomeSummary::from_progress(state, p))
            .collect();
        let overall_mastery = if outcomes.is_empty() {
            0.0
        } else {
            outcomes.iter().map(|o| o.mastery).sum::<f64>() / outcomes.len() as f64
        };

        Self {
            session_id: state.id,
            lesson_id: state.lesson_id.clone(),
            topic: state.topic.clone(),
            phase: state.phase.to_string(),
            current_outcome: state.current.id().map(str::to_string),
            mastered_count: outcomes.iter().filter(|o| o.mastered).count(),
            outcomes,
            turns: state.turns.len(),
            overall_mastery,
            completed: state.is_completed(),
            started_at: state.created_at,
            completed_at: state.completed_at,
        }
    }
}

/// A full session transcript: summary plus every answered turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionReport {
    pub summary: SessionSummary,
    pub turns: Vec<TurnRecord>,
    pub exported_at: DateTime<Utc>,
}

impl SessionReport {
    pub fn from_state(state: &SessionState) -> Self {
        Self {
            summary: SessionSummary::from_state(state),
            turns: state.turns.clone(),
            exported_at: Utc::now(),
        }
    }

    /// Turns of a given kind, in order.
    pub fn turns_of_kind(&self, kind: TurnKind) -> impl Iterator<Item = &TurnRecord> {
        self.turns.iter().filter(move |t| t.kind == kind)
    }

    /// Save the report as JSON to a file.
    pub fn save_json(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self).context("failed to serialize report")?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json)
            .with_context(|| format!("failed to write report to {}", path.display()))?;
        Ok(())
    }

    /// Load a report from a JSON file.
    pub fn load_json(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read report from {}", path.display()))?;
        let report: SessionReport =
            serde_json::from_str(&content).context("failed to parse report JSON")?;
        Ok(report)
    }
}
