//! Extracted name -> best roster identity, with a two-threshold decision.

use crate::normalize::normalize_name;
use crate::services::similarity::weighted_ratio;
use crate::types::{Decision, MatchDecision, ReferenceIdentity};

/// At or above this score the best candidate is a match outright.
pub const HIGH_CONFIDENCE_THRESHOLD: f64 = 90.0;
/// Below this score there is no reliable identity.
pub const LOW_CONFIDENCE_THRESHOLD: f64 = 70.0;

/// Decision for a ranked score list (best first).
///
/// Between the thresholds a runner-up that also clears the low threshold
/// makes the result ambiguous: two roster entries plausibly fit.
pub fn decide(best: f64, runner_up: Option<f64>) -> Decision {
    if best >= HIGH_CONFIDENCE_THRESHOLD {
        Decision::Match
    } else if best >= LOW_CONFIDENCE_THRESHOLD {
        match runner_up {
            Some(second) if second >= LOW_CONFIDENCE_THRESHOLD => Decision::Ambiguous,
            _ => Decision::Match,
        }
    } else {
        Decision::NoMatch
    }
}

/// Match a (normalized) extracted name against the roster.
///
/// The best candidate id is returned even for `no_match`. Equal scores keep
/// roster order.
pub fn match_identity(extracted_name: Option<&str>, roster: &[ReferenceIdentity]) -> MatchDecision {
    let name = match extracted_name.map(normalize_name) {
        Some(n) if !n.is_empty() => n,
        _ => return MatchDecision::no_match(),
    };
    if roster.is_empty() {
        return MatchDecision::no_match();
    }

    let mut ranked: Vec<(i64, f64)> = roster
        .iter()
        .map(|r| (r.id, weighted_ratio(&name, &normalize_name(&r.name))))
        .collect();
    ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

    let (best_id, best_score) = ranked[0];
    let runner_up = ranked.get(1).map(|(_, score)| *score);
    let decision = decide(best_score, runner_up);
    tracing::debug!(
        best_id,
        best_score,
        runner_up = ?runner_up,
        decision = decision.as_str(),
        "identity match scored"
    );

    MatchDecision {
        reference_id: Some(best_id),
        score: best_score,
        decision,
    }
}
