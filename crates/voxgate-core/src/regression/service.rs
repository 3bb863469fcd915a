use super::{detect, RegressionReport};
use crate::errors::Result;
use crate::model::ScriptResult;
use crate::storage::Store;
use crate::thresholds::MetricRule;
use serde::Serialize;
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum ScriptRegressionOutcome {
    /// Nothing approved yet; not an error.
    NoBaseline { script_id: String },
    NoResults { script_id: String },
    Compared {
        script_id: String,
        baseline_version: u32,
        execution_id: String,
        report: RegressionReport,
    },
}

impl ScriptRegressionOutcome {
    pub fn regressions(&self) -> usize {
        match self {
            ScriptRegressionOutcome::Compared { report, .. } => report.summary.total_regressions,
            _ => 0,
        }
    }
}

/// Runs detection against stored baselines and persists the findings.
#[derive(Clone)]
pub struct RegressionService {
    store: Store,
    rules: BTreeMap<String, MetricRule>,
    config_fingerprint: String,
}

impl RegressionService {
    pub fn new(
        store: Store,
        rules: BTreeMap<String, MetricRule>,
        config_fingerprint: impl Into<String>,
    ) -> Self {
        Self {
            store,
            rules,
            config_fingerprint: config_fingerprint.into(),
        }
    }

    /// Compares the latest recorded execution with the current baseline.
    ///
    /// The script's previous findings are replaced in one transaction, so a
    /// re-run after an interruption converges on the same state.
    pub fn run_for_script(&self, script_id: &str) -> Result<ScriptRegressionOutcome> {
        let Some(baseline) = self.store.current_baseline(script_id)? else {
            tracing::debug!(script_id = %script_id, "no baseline yet, skipping");
            return Ok(ScriptRegressionOutcome::NoBaseline {
                script_id: script_id.to_string(),
            });
        };
        let Some(latest) = self.store.latest_script_result(script_id)? else {
            return Ok(ScriptRegressionOutcome::NoResults {
                script_id: script_id.to_string(),
            });
        };

        let baseline_result = ScriptResult {
            script_id: script_id.to_string(),
            snapshot: baseline.snapshot.clone(),
        };
        let report = detect(
            std::slice::from_ref(&latest.result),
            std::slice::from_ref(&baseline_result),
            &self.rules,
        );

        self.store.replace_regressions(
            script_id,
            baseline.version,
            &latest.execution_id,
            &self.config_fingerprint,
            &report,
        )?;

        if report.has_regressions() {
            tracing::warn!(
                event = "voxgate.regression.detected",
                script_id = %script_id,
                baseline_version = baseline.version,
                status_regressions = report.summary.status_regressions,
                metric_regressions = report.summary.metric_regressions,
                "regressions detected against baseline"
            );
        }

        Ok(ScriptRegressionOutcome::Compared {
            script_id: script_id.to_string(),
            baseline_version: baseline.version,
            execution_id: latest.execution_id,
            report,
        })
    }

    pub fn run_all(&self) -> Result<Vec<ScriptRegressionOutcome>> {
        let mut out = Vec::new();
        for script_id in self.store.baseline_script_ids()? {
            out.push(self.run_for_script(&script_id)?);
        }
        Ok(out)
    }
}
