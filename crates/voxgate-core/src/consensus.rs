//! Merges deterministic and ensemble signals for one step into a single
//! decision plus review status.

use crate::model::{Decision, ReviewStatus, ValidationSignal};
use crate::thresholds::ReviewThresholds;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConsensusResult {
    pub final_decision: Decision,
    pub confidence: Option<f64>,
    pub review_status: ReviewStatus,
    /// Both validators explicitly failed the step.
    #[serde(default)]
    pub forced_fail: bool,
}

/// Monotone threshold function over confidence.
///
/// Missing confidence never auto-decides.
pub fn determine_review_status(confidence: Option<f64>, t: &ReviewThresholds) -> ReviewStatus {
    match confidence {
        None => ReviewStatus::NeedsReview,
        Some(c) if c.is_nan() => ReviewStatus::NeedsReview,
        Some(c) if c >= t.auto_pass_threshold => ReviewStatus::AutoPass,
        Some(c) if c < t.auto_fail_threshold => ReviewStatus::AutoFail,
        Some(_) => ReviewStatus::NeedsReview,
    }
}

/// Pass/fail agreement between the two validators, ignoring confidence.
pub fn merge_decisions(deterministic: Option<bool>, ensemble: Option<bool>) -> Decision {
    match (deterministic, ensemble) {
        (Some(a), Some(b)) if a == b => bool_decision(a),
        (Some(_), Some(_)) => Decision::Uncertain,
        (Some(a), None) | (None, Some(a)) => bool_decision(a),
        (None, None) => Decision::Uncertain,
    }
}

fn bool_decision(passed: bool) -> Decision {
    if passed {
        Decision::Pass
    } else {
        Decision::Fail
    }
}

pub fn build_consensus(signal: &ValidationSignal, t: &ReviewThresholds) -> ConsensusResult {
    // Externally supplied scalar, never derived from the agreement ratio.
    let confidence = signal.confidence.filter(|c| c.is_finite());

    let forced_fail =
        signal.deterministic_passed == Some(false) && signal.llm_passed == Some(false);
    if forced_fail {
        return ConsensusResult {
            final_decision: Decision::Fail,
            confidence,
            review_status: ReviewStatus::AutoFail,
            forced_fail,
        };
    }

    let merged = merge_decisions(signal.deterministic_passed, signal.llm_passed);
    let base = determine_review_status(confidence, t);

    let (final_decision, review_status) = match (merged, base) {
        (Decision::Pass, ReviewStatus::AutoPass) => (Decision::Pass, ReviewStatus::AutoPass),
        (_, ReviewStatus::AutoFail) => (Decision::Fail, ReviewStatus::AutoFail),
        (Decision::Fail, _) => (Decision::Fail, ReviewStatus::NeedsReview),
        (Decision::Pass, ReviewStatus::NeedsReview) | (Decision::Uncertain, _) => {
            (Decision::Uncertain, ReviewStatus::NeedsReview)
        }
    };

    ConsensusResult {
        final_decision,
        confidence,
        review_status,
        forced_fail,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(c: Option<f64>) -> ReviewStatus {
        determine_review_status(c, &ReviewThresholds::default())
    }

    #[test]
    fn test_review_status_boundaries() {
        assert_eq!(status(Some(0.80)), ReviewStatus::AutoPass);
        assert_eq!(status(Some(0.75)), ReviewStatus::AutoPass);
        assert_eq!(status(Some(0.74)), ReviewStatus::NeedsReview);
        assert_eq!(status(Some(0.40)), ReviewStatus::NeedsReview);
        assert_eq!(status(Some(0.39)), ReviewStatus::AutoFail);
        assert_eq!(status(None), ReviewStatus::NeedsReview);
        assert_eq!(status(Some(f64::NAN)), ReviewStatus::NeedsReview);
    }

    #[test]
    fn test_review_status_is_monotone() {
        fn rank(s: ReviewStatus) -> u8 {
            match s {
                ReviewStatus::AutoPass => 0,
                ReviewStatus::NeedsReview => 1,
                ReviewStatus::AutoFail => 2,
            }
        }
        let mut prev = rank(status(Some(1.0)));
        for i in (0..=100).rev() {
            let r = rank(status(Some(i as f64 / 100.0)));
            assert!(r >= prev, "strictness dropped at {}", i);
            prev = r;
        }
    }

    #[test]
    fn test_configured_cutoffs_apply() {
        let t = ReviewThresholds {
            auto_pass_threshold: 0.9,
            auto_fail_threshold: 0.2,
        };
        assert_eq!(
            determine_review_status(Some(0.8), &t),
            ReviewStatus::NeedsReview
        );
        assert_eq!(
            determine_review_status(Some(0.1), &t),
            ReviewStatus::AutoFail
        );
    }

    fn signal(det: Option<bool>, llm: Option<bool>, confidence: Option<f64>) -> ValidationSignal {
        ValidationSignal {
            deterministic_passed: det,
            llm_passed: llm,
            confidence,
            ..Default::default()
        }
    }

    #[test]
    fn test_agreeing_pass_with_high_confidence() {
        let c = build_consensus(
            &signal(Some(true), Some(true), Some(0.9)),
            &ReviewThresholds::default(),
        );
        assert_eq!(c.final_decision, Decision::Pass);
        assert_eq!(c.review_status, ReviewStatus::AutoPass);
    }

    #[test]
    fn test_fail_never_auto_passes() {
        let t = ReviewThresholds::default();
        for det in [Some(true), Some(false), None] {
            for llm in [Some(true), Some(false), None] {
                for conf in [None, Some(0.1), Some(0.5), Some(0.99)] {
                    let c = build_consensus(&signal(det, llm, conf), &t);
                    if c.final_decision == Decision::Fail {
                        assert_ne!(c.review_status, ReviewStatus::AutoPass);
                    }
                    if c.review_status == ReviewStatus::AutoFail {
                        let low = conf.map(|v| v < t.auto_fail_threshold).unwrap_or(false);
                        assert!(low || c.forced_fail);
                    }
                }
            }
        }
    }

    #[test]
    fn test_forced_fail_without_confidence() {
        let c = build_consensus(
            &signal(Some(false), Some(false), None),
            &ReviewThresholds::default(),
        );
        assert_eq!(c.review_status, ReviewStatus::AutoFail);
        assert!(c.forced_fail);
    }

    #[test]
    fn test_disagreement_goes_to_review() {
        let c = build_consensus(
            &signal(Some(true), Some(false), Some(0.95)),
            &ReviewThresholds::default(),
        );
        assert_eq!(c.final_decision, Decision::Uncertain);
        assert_eq!(c.review_status, ReviewStatus::NeedsReview);
    }

    #[test]
    fn test_single_fail_with_high_confidence_needs_review() {
        let c = build_consensus(
            &signal(None, Some(false), Some(0.95)),
            &ReviewThresholds::default(),
        );
        assert_eq!(c.final_decision, Decision::Fail);
        assert_eq!(c.review_status, ReviewStatus::NeedsReview);
    }
}
