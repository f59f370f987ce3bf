//! Outcome selection.

use crate::session::SessionState;

/// Result of asking which outcome to work on next.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Selection {
    Outcome(String),
    /// Every outcome is at or above its mastery threshold.
    AllMastered,
}

/// Pick the first outcome, in lesson order, still below its mastery threshold.
pub fn select_next(state: &SessionState) -> Selection {
    state
        .outcomes
        .iter()
        .find(|p| !state.is_mastered(p))
        .map(|p| Selection::Outcome(p.id().to_string()))
        .unwrap_or(Selection::AllMastered)
}
