//! Baseline-versus-current comparison.
//!
//! `detect` is pure over its inputs and safe to run concurrently for distinct
//! scripts. Metrics missing on either side, and metrics whose baseline value
//! is zero, are left out of the findings rather than reported.

use crate::model::{ResultStatus, ScriptResult};
use crate::thresholds::{MetricDirection, MetricRule};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};

pub mod service;

pub use service::{RegressionService, ScriptRegressionOutcome};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FindingCategory {
    Status,
    Metric,
}

impl FindingCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FindingCategory::Status => "status",
            FindingCategory::Metric => "metric",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "category", rename_all = "snake_case")]
pub enum RegressionFinding {
    Status {
        script_id: String,
        baseline_status: ResultStatus,
        current_status: ResultStatus,
    },
    Metric {
        script_id: String,
        metric: String,
        direction: MetricDirection,
        relative_tolerance: f64,
        baseline_value: f64,
        current_value: f64,
        change: f64,
        change_pct: f64,
    },
}

impl RegressionFinding {
    pub fn category(&self) -> FindingCategory {
        match self {
            RegressionFinding::Status { .. } => FindingCategory::Status,
            RegressionFinding::Metric { .. } => FindingCategory::Metric,
        }
    }

    pub fn script_id(&self) -> &str {
        match self {
            RegressionFinding::Status { script_id, .. } => script_id,
            RegressionFinding::Metric { script_id, .. } => script_id,
        }
    }

    pub fn metric(&self) -> Option<&str> {
        match self {
            RegressionFinding::Status { .. } => None,
            RegressionFinding::Metric { metric, .. } => Some(metric),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionSummary {
    pub status_regressions: usize,
    pub metric_regressions: usize,
    pub total_regressions: usize,
    pub scripts_compared: usize,
    /// Metric comparisons skipped for missing or zero baseline data.
    pub metrics_skipped: usize,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegressionReport {
    pub findings: Vec<RegressionFinding>,
    pub summary: RegressionSummary,
}

impl RegressionReport {
    pub fn has_regressions(&self) -> bool {
        self.summary.total_regressions > 0
    }
}

pub fn detect(
    current_results: &[ScriptResult],
    baseline_results: &[ScriptResult],
    metric_rules: &BTreeMap<String, MetricRule>,
) -> RegressionReport {
    let baseline_by_script: HashMap<&str, &ScriptResult> = baseline_results
        .iter()
        .map(|b| (b.script_id.as_str(), b))
        .collect();

    let mut report = RegressionReport::default();

    for current in current_results {
        let Some(baseline) = baseline_by_script.get(current.script_id.as_str()) else {
            continue;
        };
        report.summary.scripts_compared += 1;

        if baseline.snapshot.status == ResultStatus::Passed
            && current.snapshot.status == ResultStatus::Failed
        {
            report.findings.push(RegressionFinding::Status {
                script_id: current.script_id.clone(),
                baseline_status: baseline.snapshot.status,
                current_status: current.snapshot.status,
            });
        }

        let metric_names = baseline
            .snapshot
            .metrics
            .keys()
            .chain(current.snapshot.metrics.keys())
            .filter(|name| metric_rules.contains_key(name.as_str()));
        let mut seen = std::collections::BTreeSet::new();

        for name in metric_names {
            if !seen.insert(name.as_str()) {
                continue;
            }
            let rule = &metric_rules[name.as_str()];
            let (Some(&b), Some(&c)) = (
                baseline.snapshot.metrics.get(name),
                current.snapshot.metrics.get(name),
            ) else {
                report.summary.metrics_skipped += 1;
                continue;
            };
            match compare_metric(b, c, rule) {
                MetricComparison::Regressed { change, change_pct } => {
                    report.findings.push(RegressionFinding::Metric {
                        script_id: current.script_id.clone(),
                        metric: name.clone(),
                        direction: rule.direction,
                        relative_tolerance: rule.relative_tolerance,
                        baseline_value: b,
                        current_value: c,
                        change,
                        change_pct,
                    });
                }
                MetricComparison::WithinTolerance => {}
                MetricComparison::Skipped => report.summary.metrics_skipped += 1,
            }
        }
    }

    let s = &mut report.summary;
    s.status_regressions = report
        .findings
        .iter()
        .filter(|f| f.category() == FindingCategory::Status)
        .count();
    s.metric_regressions = report.findings.len() - s.status_regressions;
    s.total_regressions = s.status_regressions + s.metric_regressions;

    report
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MetricComparison {
    Regressed { change: f64, change_pct: f64 },
    WithinTolerance,
    /// No meaningful relative change (zero or non-finite values).
    Skipped,
}

pub fn compare_metric(baseline: f64, current: f64, rule: &MetricRule) -> MetricComparison {
    if !baseline.is_finite() || !current.is_finite() || baseline == 0.0 {
        return MetricComparison::Skipped;
    }
    let change = current - baseline;
    let relative = change / baseline;
    let regressed = match rule.direction {
        MetricDirection::HigherIsBetter => relative < -rule.relative_tolerance,
        MetricDirection::LowerIsBetter => relative > rule.relative_tolerance,
    };
    if regressed {
        MetricComparison::Regressed {
            change,
            change_pct: change * 100.0 / baseline,
        }
    } else {
        MetricComparison::WithinTolerance
    }
}
