use super::{cluster_with, summarize, DefectCategory, DefectCluster, DefectOccurrence, DefectRecord, PatternSummary};
use crate::errors::Result;
use crate::storage::Store;
use chrono::{DateTime, Utc};
use serde::Serialize;

/// One step outcome as seen by the streak counter.
#[derive(Debug, Clone)]
pub struct StreakObservation {
    pub script_id: String,
    pub test_case_id: String,
    pub category: DefectCategory,
    pub title: String,
    /// Whether this occurrence extends the streak (an `auto_fail`).
    pub qualifying: bool,
    pub observed_at: DateTime<Utc>,
}

/// Per-script strict-consecutive failure counter.
#[derive(Clone)]
pub struct DefectTracker {
    store: Store,
    threshold: u32,
}

impl DefectTracker {
    pub fn new(store: Store, threshold: u32) -> Self {
        Self {
            store,
            threshold: threshold.max(1),
        }
    }

    pub fn threshold(&self) -> u32 {
        self.threshold
    }

    /// Returns the defect filed by this observation, if it completed a streak.
    pub fn observe(&self, obs: &StreakObservation) -> Result<Option<DefectRecord>> {
        let filed = self.store.observe_defect_streak(obs, self.threshold)?;
        if let Some(d) = &filed {
            log_filed(d);
        }
        Ok(filed)
    }
}

pub(crate) fn log_filed(d: &DefectRecord) {
    tracing::warn!(
        event = "voxgate.defect.created",
        defect_id = %d.id,
        script_id = %d.script_id,
        category = d.category.as_str(),
        severity = d.severity.as_str(),
        occurrences = d.occurrence_count,
        "defect auto-created after consecutive failures"
    );
}

#[derive(Debug, Clone, Serialize)]
pub struct PatternRefresh {
    pub clusters: Vec<DefectCluster>,
    pub summary: PatternSummary,
}

/// Re-clusters filed defects and stored regression findings.
#[derive(Clone)]
pub struct PatternService {
    store: Store,
    similarity: f64,
}

impl PatternService {
    pub fn new(store: Store, similarity: f64) -> Self {
        Self { store, similarity }
    }

    pub fn refresh(&self) -> Result<PatternRefresh> {
        let mut items: Vec<DefectOccurrence> = self
            .store
            .list_defects(None)?
            .iter()
            .map(DefectOccurrence::from)
            .collect();

        for (i, stored) in self.store.list_regressions(None)?.into_iter().enumerate() {
            let detected_at = match DateTime::parse_from_rfc3339(&stored.detected_at) {
                Ok(t) => t.with_timezone(&Utc),
                Err(e) => {
                    tracing::warn!(
                        script_id = %stored.finding.script_id(),
                        error = %e,
                        "skipping regression with unreadable timestamp"
                    );
                    continue;
                }
            };
            let id = format!("reg:{}:{}", stored.finding.script_id(), i);
            items.push(DefectOccurrence::from_finding(id, &stored.finding, detected_at));
        }

        let clusters = cluster_with(&items, self.similarity);
        self.store.replace_defect_patterns(&clusters)?;
        let summary = summarize(&clusters);

        tracing::info!(
            event = "voxgate.defect.patterns",
            occurrences = items.len(),
            clusters = clusters.len(),
            repeating = summary.repeating_test_cases.len(),
            "defect patterns refreshed"
        );
        Ok(PatternRefresh { clusters, summary })
    }
}
