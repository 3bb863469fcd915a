use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

/// Raw evidence for one executed test step.
///
/// Written once by the upstream validators; the engine only reads it.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ValidationSignal {
    /// Deterministic command-kind match score from the voice platform (0..1).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command_kind_match_score: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asr_confidence_score: Option<f64>,
    /// Pass flag of the deterministic validator.
    #[serde(default, alias = "houndify_passed", skip_serializing_if = "Option::is_none")]
    pub deterministic_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "serde_json::Value::is_null")]
    pub raw_result: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub llm_passed: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agreement_ratio: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub dissenting_judges: Vec<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReviewStatus {
    AutoPass,
    NeedsReview,
    AutoFail,
}

impl ReviewStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewStatus::AutoPass => "auto_pass",
            ReviewStatus::NeedsReview => "needs_review",
            ReviewStatus::AutoFail => "auto_fail",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "auto_pass" => Some(ReviewStatus::AutoPass),
            "needs_review" => Some(ReviewStatus::NeedsReview),
            "auto_fail" => Some(ReviewStatus::AutoFail),
            _ => None,
        }
    }
}

impl fmt::Display for ReviewStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    Pass,
    Fail,
    Uncertain,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::Pass => "pass",
            Decision::Fail => "fail",
            Decision::Uncertain => "uncertain",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(Decision::Pass),
            "fail" => Some(Decision::Fail),
            "uncertain" => Some(Decision::Uncertain),
            _ => None,
        }
    }
}

impl fmt::Display for Decision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Outcome of one script execution as seen by regression detection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultStatus {
    Passed,
    Failed,
    Skipped,
    Error,
}

impl ResultStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ResultStatus::Passed => "passed",
            ResultStatus::Failed => "failed",
            ResultStatus::Skipped => "skipped",
            ResultStatus::Error => "error",
        }
    }

    /// Unknown strings map to `Error` so stored rows always rehydrate.
    pub fn parse(s: &str) -> Self {
        match s {
            "passed" | "pass" => ResultStatus::Passed,
            "failed" | "fail" => ResultStatus::Failed,
            "skipped" => ResultStatus::Skipped,
            _ => ResultStatus::Error,
        }
    }
}

impl fmt::Display for ResultStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Status plus named metrics for one script, as stored in baselines.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptSnapshot {
    pub status: ResultStatus,
    #[serde(default)]
    pub metrics: BTreeMap<String, f64>,
}

/// A snapshot tagged with the script it belongs to.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptResult {
    pub script_id: String,
    #[serde(flatten)]
    pub snapshot: ScriptSnapshot,
}

impl ScriptResult {
    pub fn new(script_id: impl Into<String>, status: ResultStatus) -> Self {
        Self {
            script_id: script_id.into(),
            snapshot: ScriptSnapshot {
                status,
                metrics: BTreeMap::new(),
            },
        }
    }

    pub fn with_metric(mut self, name: &str, value: f64) -> Self {
        self.snapshot.metrics.insert(name.to_string(), value);
        self
    }
}

/// Execution facts used for defect categorization.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ExecutionRecord {
    #[serde(default)]
    pub execution_id: String,
    pub script_id: String,
    pub test_case_id: String,
    /// Latency-like fields as reported by the runner; `_ms` suffixed names are milliseconds.
    #[serde(default)]
    pub timings: BTreeMap<String, f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub http_status: Option<u16>,
    #[serde(default)]
    pub integration_error: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub audio_error: Option<String>,
    #[serde(default)]
    pub asr_error: bool,
}

/// One step handed to the pipeline after the external validators ran.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepExecution {
    pub tenant_id: String,
    pub execution: ExecutionRecord,
    #[serde(default)]
    pub step_index: u32,
    #[serde(default)]
    pub utterance: String,
    #[serde(default)]
    pub expected_outcome: String,
    #[serde(default = "default_language")]
    pub language_code: String,
    pub signal: ValidationSignal,
}

fn default_language() -> String {
    "en-US".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_accepts_vendor_alias() {
        let s: ValidationSignal = serde_json::from_value(serde_json::json!({
            "command_kind_match_score": 0.9,
            "houndify_passed": true,
            "llm_passed": true,
            "agreement_ratio": 1.0,
            "confidence": 0.92
        }))
        .unwrap();
        assert_eq!(s.deterministic_passed, Some(true));
        assert!(s.dissenting_judges.is_empty());
    }

    #[test]
    fn test_script_result_flattens_snapshot() {
        let r: ScriptResult = serde_json::from_value(serde_json::json!({
            "script_id": "s1",
            "status": "passed",
            "metrics": {"pass_rate": 0.95}
        }))
        .unwrap();
        assert_eq!(r.snapshot.status, ResultStatus::Passed);
        assert_eq!(r.snapshot.metrics.get("pass_rate"), Some(&0.95));
    }

    #[test]
    fn test_status_parse_is_total() {
        assert_eq!(ResultStatus::parse("passed"), ResultStatus::Passed);
        assert_eq!(ResultStatus::parse("weird"), ResultStatus::Error);
        assert_eq!(ReviewStatus::parse("auto_fail"), Some(ReviewStatus::AutoFail));
        assert_eq!(ReviewStatus::parse("nope"), None);
    }
}
