//! Routing decision after an answer has been assessed.
//!
//! Pure function of the turn's score, the consecutive failed-attempt count and
//! the outcome's thresholds. The attempt cap is checked before the rephrase
//! band: an outcome that has used up its rephrases is re-taught even when the
//! score would otherwise qualify for another try.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::model::MasteryConfig;

/// Where the state machine goes after `Assessed`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Route {
    /// Mastery reached; move on to the next outcome.
    Feedback,
    /// Ask a follow-up question targeting the uncovered concepts.
    Rephrase,
    /// Re-teach the outcome and start a fresh attempt cycle.
    Reteach,
}

impl fmt::Display for Route {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Route::Feedback => write!(f, "feedback"),
            Route::Rephrase => write!(f, "rephrase"),
            Route::Reteach => write!(f, "reteach"),
        }
    }
}

/// Whether the learner actually said something.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Evidence {
    /// A non-blank answer was scored by the evaluator.
    Scored,
    /// The answer was blank and scored 0 without evaluation.
    Blank,
}

/// Inputs to a routing decision.
#[derive(Debug, Clone, Copy)]
pub struct RouteInput<'a> {
    /// Clamped score for this turn.
    pub score: f64,
    /// Consecutive rephrases already spent on this outcome.
    pub failed_attempts: u32,
    /// Key concepts still uncovered after this turn's merge.
    pub remaining_concepts: &'a [String],
    pub evidence: Evidence,
}

/// The routing decision plus the concepts the next prompt should target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub route: Route,
    pub target_concepts: Vec<String>,
}

/// Decide the next transition for an assessed answer.
pub fn route(input: &RouteInput<'_>, config: &MasteryConfig) -> Decision {
    let score = input.score.clamp(0.0, 1.0);
    let route = if score >= config.mastery_threshold {
        Route::Feedback
    } else if input.failed_attempts >= config.max_attempts {
        Route::Reteach
    } else if input.evidence == Evidence::Blank || score >= config.rephrase_floor {
        Route::Rephrase
    } else {
        Route::Reteach
    };

    let target_concepts = match route {
        Route::Feedback => Vec::new(),
        Route::Rephrase | Route::Reteach => input.remaining_concepts.to_vec(),
    };

    Decision {
        route,
        target_concepts,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn decide(score: f64, failed_attempts: u32) -> Route {
        route(
            &RouteInput {
                score,
                failed_attempts,
                remaining_concepts: &[],
                evidence: Evidence::Scored,
            },
            &MasteryConfig::default(),
        )
        .route
    }

    #[test]
    fn mastery_at_threshold_gives_feedback() {
        assert_eq!(decide(0.8, 0), Route::Feedback);
        assert_eq!(decide(0.95, 2), Route::Feedback);
        assert_eq!(decide(0.79, 0), Route::Rephrase);
    }

    #[test]
    fn rephrase_band_is_floor_inclusive() {
        assert_eq!(decide(0.2, 0), Route::Rephrase);
        assert_eq!(decide(0.19, 0), Route::Reteach);
        assert_eq!(decide(0.0, 1), Route::Reteach);
    }

    #[test]
    fn attempt_cap_forces_reteach() {
        assert_eq!(decide(0.5, 1), Route::Rephrase);
        assert_eq!(decide(0.6, 2), Route::Reteach);
        assert_eq!(decide(0.6, 5), Route::Reteach);
    }

    #[test]
    fn out_of_range_scores_are_clamped() {
        assert_eq!(decide(1.7, 0), Route::Feedback);
        assert_eq!(decide(-0.4, 0), Route::Reteach);
    }

    #[test]
    fn blank_answers_rephrase_until_cap() {
        let blank = |failed_attempts| {
            route(
                &RouteInput {
                    score: 0.0,
                    failed_attempts,
                    remaining_concepts: &[],
                    evidence: Evidence::Blank,
                },
                &MasteryConfig::default(),
            )
            .route
        };
        assert_eq!(blank(0), Route::Rephrase);
        assert_eq!(blank(1), Route::Rephrase);
        assert_eq!(blank(2), Route::Reteach);
    }

    #[test]
    fn retries_target_remaining_concepts() {
        let remaining = vec!["super()".to_string()];
        let decision = route(
            &RouteInput {
                score: 0.5,
                failed_attempts: 0,
                remaining_concepts: &remaining,
                evidence: Evidence::Scored,
            },
            &MasteryConfig::default(),
        );
        assert_eq!(decision.route, Route::Rephrase);
        assert_eq!(decision.target_concepts, remaining);
    }

    #[test]
    fn respects_custom_thresholds() {
        let config = MasteryConfig {
            mastery_threshold: 0.6,
            rephrase_floor: 0.4,
            max_attempts: 0,
        };
        let input = |score| RouteInput {
            score,
            failed_attempts: 0,
            remaining_concepts: &[],
            evidence: Evidence::Scored,
        };
        assert_eq!(route(&input(0.65), &config).route, Route::Feedback);
        // no rephrases allowed at all
        assert_eq!(route(&input(0.5), &config).route, Route::Reteach);
    }
}
