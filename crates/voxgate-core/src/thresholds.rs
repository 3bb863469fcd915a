use serde::{Deserialize, Serialize};

pub const DEFAULT_AUTO_PASS: f64 = 0.75;
pub const DEFAULT_AUTO_FAIL: f64 = 0.40;
pub const DEFAULT_MIN_AGREEMENT: f64 = 0.66;
pub const DEFAULT_MIN_CONFIDENCE: f64 = 0.80;

/// Confidence cutoffs for the review-status function.
///
/// `confidence >= auto_pass` passes, `confidence < auto_fail` fails, the band in
/// between always goes to a human.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct ReviewThresholds {
    #[serde(default = "default_auto_pass")]
    pub auto_pass_threshold: f64,
    #[serde(default = "default_auto_fail")]
    pub auto_fail_threshold: f64,
}

impl Default for ReviewThresholds {
    fn default() -> Self {
        Self {
            auto_pass_threshold: DEFAULT_AUTO_PASS,
            auto_fail_threshold: DEFAULT_AUTO_FAIL,
        }
    }
}

fn default_auto_pass() -> f64 {
    DEFAULT_AUTO_PASS
}

fn default_auto_fail() -> f64 {
    DEFAULT_AUTO_FAIL
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct EscalationPolicyConfig {
    #[serde(default = "default_min_agreement")]
    pub min_agreement_ratio: f64,
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f64,
}

impl Default for EscalationPolicyConfig {
    fn default() -> Self {
        Self {
            min_agreement_ratio: DEFAULT_MIN_AGREEMENT,
            min_confidence: DEFAULT_MIN_CONFIDENCE,
        }
    }
}

fn default_min_agreement() -> f64 {
    DEFAULT_MIN_AGREEMENT
}

fn default_min_confidence() -> f64 {
    DEFAULT_MIN_CONFIDENCE
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum MetricDirection {
    HigherIsBetter,
    LowerIsBetter,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq)]
pub struct MetricRule {
    pub direction: MetricDirection,
    pub relative_tolerance: f64,
}

impl MetricRule {
    pub fn higher_is_better(relative_tolerance: f64) -> Self {
        Self {
            direction: MetricDirection::HigherIsBetter,
            relative_tolerance,
        }
    }

    pub fn lower_is_better(relative_tolerance: f64) -> Self {
        Self {
            direction: MetricDirection::LowerIsBetter,
            relative_tolerance,
        }
    }
}
