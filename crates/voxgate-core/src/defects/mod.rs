//! Failure categorization and defect clustering.

use crate::config::DefectSettings;
use crate::model::{ExecutionRecord, ValidationSignal};
use crate::regression::RegressionFinding;
use chrono::{DateTime, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::sync::OnceLock;

pub mod tracker;

pub use tracker::{DefectTracker, PatternRefresh, PatternService, StreakObservation};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DefectCategory {
    CommandMismatch,
    Timing,
    Audio,
    Integration,
    EdgeCase,
}

impl DefectCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            DefectCategory::CommandMismatch => "command_mismatch",
            DefectCategory::Timing => "timing",
            DefectCategory::Audio => "audio",
            DefectCategory::Integration => "integration",
            DefectCategory::EdgeCase => "edge_case",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "command_mismatch" => Some(DefectCategory::CommandMismatch),
            "timing" => Some(DefectCategory::Timing),
            "audio" => Some(DefectCategory::Audio),
            "integration" => Some(DefectCategory::Integration),
            "edge_case" => Some(DefectCategory::EdgeCase),
            _ => None,
        }
    }

    pub fn default_severity(&self) -> Severity {
        match self {
            DefectCategory::Integration => Severity::Critical,
            DefectCategory::CommandMismatch => Severity::High,
            DefectCategory::Timing | DefectCategory::Audio => Severity::Medium,
            DefectCategory::EdgeCase => Severity::Low,
        }
    }
}

impl fmt::Display for DefectCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "low" => Some(Severity::Low),
            "medium" => Some(Severity::Medium),
            "high" => Some(Severity::High),
            "critical" => Some(Severity::Critical),
            _ => None,
        }
    }
}

/// A filed defect.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectRecord {
    pub id: String,
    pub script_id: String,
    pub test_case_id: String,
    pub category: DefectCategory,
    pub severity: Severity,
    pub title: String,
    pub occurrence_count: u32,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub pattern_key: Option<String>,
}

/// One failure observation fed to clustering.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectOccurrence {
    pub id: String,
    pub test_case_id: String,
    pub category: DefectCategory,
    pub severity: Severity,
    pub title: String,
    pub detected_at: DateTime<Utc>,
    /// Set when the occurrence is itself a filed defect.
    #[serde(default)]
    pub defect_id: Option<String>,
}

impl From<&DefectRecord> for DefectOccurrence {
    fn from(d: &DefectRecord) -> Self {
        DefectOccurrence {
            id: d.id.clone(),
            test_case_id: d.test_case_id.clone(),
            category: d.category,
            severity: d.severity,
            title: d.title.clone(),
            detected_at: d.last_detected,
            defect_id: Some(d.id.clone()),
        }
    }
}

impl DefectOccurrence {
    /// Regression findings cluster under their script id.
    pub fn from_finding(id: String, finding: &RegressionFinding, detected_at: DateTime<Utc>) -> Self {
        let (category, title) = match finding {
            RegressionFinding::Status {
                baseline_status,
                current_status,
                ..
            } => (
                DefectCategory::EdgeCase,
                format!("status regression {} -> {}", baseline_status, current_status),
            ),
            RegressionFinding::Metric {
                metric, change_pct, ..
            } => {
                let category = if is_latency_field(metric) {
                    DefectCategory::Timing
                } else {
                    DefectCategory::EdgeCase
                };
                (category, format!("{} regressed {:+.1}%", metric, change_pct))
            }
        };
        DefectOccurrence {
            id,
            test_case_id: finding.script_id().to_string(),
            category,
            severity: category.default_severity(),
            title,
            detected_at,
            defect_id: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DefectCluster {
    pub key: String,
    pub test_case_id: String,
    pub category: DefectCategory,
    /// Highest severity among members.
    pub severity: Severity,
    pub title: String,
    pub count: usize,
    pub first_detected: DateTime<Utc>,
    pub last_detected: DateTime<Utc>,
    pub member_ids: Vec<String>,
    pub linked_defect_id: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PatternSummary {
    pub category_counts: BTreeMap<DefectCategory, usize>,
    pub severity_counts: BTreeMap<Severity, usize>,
    pub repeating_test_cases: Vec<String>,
}

const LATENCY_FIELD: &str =
    r"^(?:[a-z0-9]+_)*(?:latency|response_time|duration|ttfb|time_to_first_byte)(?:_(ms|s|sec|secs|seconds))?$";

fn latency_field_re() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| Regex::new(LATENCY_FIELD).ok()).as_ref()
}

/// Lowercased, trimmed, inner whitespace collapsed to single spaces.
pub fn normalize_title(title: &str) -> String {
    title
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase()
}

pub fn is_latency_field(name: &str) -> bool {
    latency_field_re().is_some_and(|re| re.is_match(&name.to_ascii_lowercase()))
}

/// Latency value in seconds, if `name` is a recognized latency field.
pub fn latency_seconds(name: &str, value: f64) -> Option<f64> {
    let lower = name.to_ascii_lowercase();
    let caps = latency_field_re()?.captures(&lower)?;
    match caps.get(1).map(|m| m.as_str()) {
        Some("ms") => Some(value / 1000.0),
        _ => Some(value),
    }
}

/// First match wins: command mismatch, timing, audio, integration, edge case.
pub fn categorize(
    execution: &ExecutionRecord,
    signal: &ValidationSignal,
    settings: &DefectSettings,
) -> DefectCategory {
    if signal
        .command_kind_match_score
        .is_some_and(|s| s < settings.command_match_floor)
    {
        return DefectCategory::CommandMismatch;
    }

    let slow = execution.timings.iter().any(|(name, value)| {
        latency_seconds(name, *value).is_some_and(|secs| secs >= settings.latency_threshold_seconds)
    });
    if slow {
        return DefectCategory::Timing;
    }

    if execution.audio_error.is_some() || execution.asr_error {
        return DefectCategory::Audio;
    }

    if execution.integration_error || execution.http_status.is_some_and(|s| s >= 500) {
        return DefectCategory::Integration;
    }

    DefectCategory::EdgeCase
}

fn same_issue(a: &str, b: &str, similarity: f64) -> bool {
    if a == b {
        return true;
    }
    if a.is_empty() || b.is_empty() {
        return false;
    }
    a.contains(b) || b.contains(a) || strsim::normalized_levenshtein(a, b) >= similarity
}

pub fn cluster(items: &[DefectOccurrence]) -> Vec<DefectCluster> {
    cluster_with(items, DefectSettings::default().title_similarity)
}

/// Groups by `(test_case_id, category)`, then by title within each group.
/// Output is sorted by test case, category and first detection.
pub fn cluster_with(items: &[DefectOccurrence], similarity: f64) -> Vec<DefectCluster> {
    let mut groups: BTreeMap<(&str, DefectCategory), Vec<&DefectOccurrence>> = BTreeMap::new();
    for item in items {
        groups
            .entry((item.test_case_id.as_str(), item.category))
            .or_default()
            .push(item);
    }

    let mut out = Vec::new();
    for ((test_case_id, category), mut members) in groups {
        members.sort_by(|a, b| a.detected_at.cmp(&b.detected_at).then(a.id.cmp(&b.id)));

        // (normalized representative title, cluster)
        let mut local: Vec<(String, DefectCluster)> = Vec::new();
        for m in members {
            let norm = normalize_title(&m.title);
            match local
                .iter_mut()
                .find(|(rep, _)| same_issue(rep, &norm, similarity))
            {
                Some((_, c)) => {
                    c.count += 1;
                    c.severity = c.severity.max(m.severity);
                    c.first_detected = c.first_detected.min(m.detected_at);
                    c.last_detected = c.last_detected.max(m.detected_at);
                    c.member_ids.push(m.id.clone());
                    if c.linked_defect_id.is_none() {
                        c.linked_defect_id = m.defect_id.clone();
                    }
                }
                None => {
                    let key =
                        crate::fingerprint::defect_key(test_case_id, category.as_str(), &norm);
                    local.push((
                        norm,
                        DefectCluster {
                            key,
                            test_case_id: test_case_id.to_string(),
                            category,
                            severity: m.severity,
                            title: m.title.trim().to_string(),
                            count: 1,
                            first_detected: m.detected_at,
                            last_detected: m.detected_at,
                            member_ids: vec![m.id.clone()],
                            linked_defect_id: m.defect_id.clone(),
                        },
                    ));
                }
            }
        }
        out.extend(local.into_iter().map(|(_, c)| c));
    }
    out
}

pub fn summarize(clusters: &[DefectCluster]) -> PatternSummary {
    let mut summary = PatternSummary::default();
    let mut per_test_case: BTreeMap<&str, usize> = BTreeMap::new();

    for c in clusters {
        *summary.category_counts.entry(c.category).or_default() += c.count;
        *summary.severity_counts.entry(c.severity).or_default() += c.count;
        *per_test_case.entry(c.test_case_id.as_str()).or_default() += c.count;
    }

    summary.repeating_test_cases = per_test_case
        .into_iter()
        .filter(|(_, n)| *n > 1)
        .map(|(tc, _)| tc.to_string())
        .collect();
    summary
}
