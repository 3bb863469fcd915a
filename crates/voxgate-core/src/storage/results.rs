use super::store::{new_id, now_rfc3339, Store};
use super::defects::observe_streak_on;
use super::queue::insert_item_on;
use crate::defects::{DefectRecord, StreakObservation};
use crate::errors::Result;
use crate::model::{ResultStatus, ScriptResult, ScriptSnapshot};
use crate::pipeline::ValidationRecord;
use crate::queue::{NewQueueItem, QueueItem};
use crate::regression::{RegressionFinding, RegressionReport};
use rusqlite::{params, Connection, OptionalExtension};

#[derive(Debug, Clone, PartialEq)]
pub struct RecordedScriptResult {
    pub id: i64,
    pub execution_id: String,
    pub result: ScriptResult,
    pub recorded_at: String,
}

/// Where an escalated step lands in the review queue.
#[derive(Debug, Clone)]
pub struct QueuePlacement {
    pub item: NewQueueItem,
    pub priority: u8,
    pub requires_native_speaker: bool,
}

#[derive(Debug, Clone)]
pub struct RecordedStep {
    pub validation_id: String,
    pub queue_item: Option<QueueItem>,
    pub defect: Option<DefectRecord>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct StoredRegression {
    pub finding: RegressionFinding,
    pub detected_at: String,
}

impl Store {
    pub fn record_script_result(&self, execution_id: &str, result: &ScriptResult) -> Result<i64> {
        let conn = self.lock()?;
        conn.execute(
            "INSERT INTO script_results (script_id, execution_id, status, metrics_json, recorded_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                result.script_id,
                execution_id,
                result.snapshot.status.as_str(),
                serde_json::to_string(&result.snapshot.metrics)?,
                now_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn latest_script_result(&self, script_id: &str) -> Result<Option<RecordedScriptResult>> {
        let conn = self.lock()?;
        let row = conn
            .query_row(
                "SELECT id, execution_id, status, metrics_json, recorded_at
                 FROM script_results WHERE script_id = ?1 ORDER BY id DESC LIMIT 1",
                params![script_id],
                |r| {
                    Ok((
                        r.get::<_, i64>(0)?,
                        r.get::<_, String>(1)?,
                        r.get::<_, String>(2)?,
                        r.get::<_, String>(3)?,
                        r.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()?;

        match row {
            None => Ok(None),
            Some((id, execution_id, status, metrics, recorded_at)) => {
                Ok(Some(RecordedScriptResult {
                    id,
                    execution_id,
                    result: ScriptResult {
                        script_id: script_id.to_string(),
                        snapshot: ScriptSnapshot {
                            status: ResultStatus::parse(&status),
                            metrics: serde_json::from_str(&metrics)?,
                        },
                    },
                    recorded_at,
                }))
            }
        }
    }

    /// Swaps a script's findings for a fresh run, all or nothing.
    pub fn replace_regressions(
        &self,
        script_id: &str,
        baseline_version: u32,
        execution_id: &str,
        config_fingerprint: &str,
        report: &RegressionReport,
    ) -> Result<()> {
        let now = now_rfc3339();
        self.write_tx(|tx| {
            tx.execute(
                "DELETE FROM regressions WHERE script_id = ?1",
                params![script_id],
            )?;
            let mut stmt = tx.prepare(
                "INSERT INTO regressions (script_id, category, metric, detail_json, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for f in &report.findings {
                stmt.execute(params![
                    script_id,
                    f.category().as_str(),
                    f.metric(),
                    serde_json::to_string(f)?,
                    now,
                ])?;
            }
            tx.execute(
                "INSERT INTO regression_runs (script_id, baseline_version, execution_id,
                    config_fingerprint, status_regressions, metric_regressions, detected_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(script_id) DO UPDATE SET
                    baseline_version = excluded.baseline_version,
                    execution_id = excluded.execution_id,
                    config_fingerprint = excluded.config_fingerprint,
                    status_regressions = excluded.status_regressions,
                    metric_regressions = excluded.metric_regressions,
                    detected_at = excluded.detected_at",
                params![
                    script_id,
                    baseline_version as i64,
                    execution_id,
                    config_fingerprint,
                    report.summary.status_regressions as i64,
                    report.summary.metric_regressions as i64,
                    now,
                ],
            )?;
            Ok(())
        })
    }

    pub fn list_regressions(&self, script_id: Option<&str>) -> Result<Vec<StoredRegression>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT detail_json, detected_at FROM regressions
             WHERE (?1 IS NULL OR script_id = ?1)
             ORDER BY script_id ASC, id ASC",
        )?;
        let rows = stmt.query_map(params![script_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (detail, detected_at) = r?;
            out.push(StoredRegression {
                finding: serde_json::from_str(&detail)?,
                detected_at,
            });
        }
        Ok(out)
    }

    // validation records

    /// Persists one decided step as a single unit: the validation row, its
    /// queue item when escalated, and the streak update. A failure anywhere
    /// leaves none of them behind.
    pub fn record_step(
        &self,
        record: &ValidationRecord,
        escalation: Option<QueuePlacement>,
        streak: &StreakObservation,
        streak_threshold: u32,
    ) -> Result<RecordedStep> {
        self.write_tx(|tx| {
            let validation_id = insert_validation_on(tx, record)?;
            let queue_item = match escalation {
                Some(mut placement) => {
                    placement.item.validation_result_id = Some(validation_id.clone());
                    Some(insert_item_on(
                        tx,
                        &placement.item,
                        placement.priority,
                        placement.requires_native_speaker,
                    )?)
                }
                None => None,
            };
            let defect = observe_streak_on(tx, streak, streak_threshold)?;
            Ok(RecordedStep {
                validation_id,
                queue_item,
                defect,
            })
        })
    }
}

fn insert_validation_on(conn: &Connection, record: &ValidationRecord) -> Result<String> {
    let id = new_id("vr");
    conn.execute(
        "INSERT INTO validation_results (id, tenant_id, execution_id, script_id, test_case_id,
            step_index, signal_json, final_decision, confidence, review_status, action, reason,
            category, created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
        params![
            id,
            record.tenant_id,
            record.execution_id,
            record.script_id,
            record.test_case_id,
            record.step_index as i64,
            serde_json::to_string(&record.signal)?,
            record.consensus.final_decision.as_str(),
            record.consensus.confidence,
            record.consensus.review_status.as_str(),
            record.escalation.action.as_str(),
            record.escalation.reason,
            record.category.map(|c| c.as_str()),
            now_rfc3339(),
        ],
    )?;
    Ok(id)
}
