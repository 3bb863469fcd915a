use super::store::{new_id, now_rfc3339, Store};
use crate::errors::{EngineError, Result};
use crate::feedback::{OutboxEntry, OverrideSample};
use crate::model::Decision;
use crate::queue::{
    ClaimOutcome, DecisionSubmission, HumanValidation, NewQueueItem, QueueItem, QueueStats,
    QueueStatus, ValidatorPerformance,
};
use rusqlite::{params, Connection, OptionalExtension, Row};

const QUEUE_COLUMNS: &str = "id, tenant_id, validation_result_id, script_id, test_case_id,
    utterance, expected_outcome, automated_label, confidence, escalation_reason,
    dissenting_judges_json, language_code, requires_native_speaker, priority, status,
    claimed_by, claimed_at, created_at, completed_at";

fn queue_item_from_row(row: &Row<'_>) -> rusqlite::Result<QueueItem> {
    let label: String = row.get(7)?;
    let judges: String = row.get(10)?;
    let status: String = row.get(14)?;
    Ok(QueueItem {
        id: row.get(0)?,
        tenant_id: row.get(1)?,
        validation_result_id: row.get(2)?,
        script_id: row.get(3)?,
        test_case_id: row.get(4)?,
        utterance: row.get(5)?,
        expected_outcome: row.get(6)?,
        automated_label: Decision::parse(&label).unwrap_or(Decision::Uncertain),
        confidence: row.get(8)?,
        escalation_reason: row.get(9)?,
        dissenting_judges: serde_json::from_str(&judges).unwrap_or_default(),
        language_code: row.get(11)?,
        requires_native_speaker: row.get::<_, i64>(12)? != 0,
        priority: row.get::<_, i64>(13)? as u8,
        status: QueueStatus::parse(&status).unwrap_or(QueueStatus::Pending),
        claimed_by: row.get(15)?,
        claimed_at: row.get(16)?,
        created_at: row.get(17)?,
        completed_at: row.get(18)?,
    })
}

fn load_item(conn: &Connection, queue_id: &str) -> Result<Option<QueueItem>> {
    let sql = format!("SELECT {} FROM queue_items WHERE id = ?1", QUEUE_COLUMNS);
    let item = conn
        .query_row(&sql, params![queue_id], queue_item_from_row)
        .optional()?;
    Ok(item)
}

/// Loads an item and rejects foreign tenants instead of hiding the row.
fn load_scoped(conn: &Connection, queue_id: &str, tenant_id: &str) -> Result<QueueItem> {
    let item = load_item(conn, queue_id)?
        .ok_or_else(|| EngineError::not_found("queue item", queue_id))?;
    if item.tenant_id != tenant_id {
        return Err(EngineError::Forbidden {
            entity: "queue item",
            id: queue_id.to_string(),
            tenant_id: tenant_id.to_string(),
        });
    }
    Ok(item)
}

pub(crate) fn insert_item_on(
    conn: &Connection,
    item: &NewQueueItem,
    priority: u8,
    requires_native_speaker: bool,
) -> Result<QueueItem> {
    let id = new_id("q");
    conn.execute(
        "INSERT INTO queue_items (id, tenant_id, validation_result_id, script_id, test_case_id,
            utterance, expected_outcome, automated_label, confidence, escalation_reason,
            dissenting_judges_json, language_code, requires_native_speaker, priority, status,
            created_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, 'pending', ?15)",
        params![
            id,
            item.tenant_id,
            item.validation_result_id,
            item.script_id,
            item.test_case_id,
            item.utterance,
            item.expected_outcome,
            item.automated_label.as_str(),
            item.confidence,
            item.escalation_reason,
            serde_json::to_string(&item.dissenting_judges)?,
            item.language_code,
            requires_native_speaker as i64,
            priority as i64,
            now_rfc3339(),
        ],
    )?;
    load_item(conn, &id)?.ok_or_else(|| EngineError::not_found("queue item", id))
}

impl Store {
    pub fn insert_queue_item(
        &self,
        item: &NewQueueItem,
        priority: u8,
        requires_native_speaker: bool,
    ) -> Result<QueueItem> {
        let conn = self.lock()?;
        insert_item_on(&conn, item, priority, requires_native_speaker)
    }

    pub fn get_queue_item(&self, queue_id: &str, tenant_id: &str) -> Result<QueueItem> {
        let conn = self.lock()?;
        load_scoped(&conn, queue_id, tenant_id)
    }

    pub fn next_pending_item(
        &self,
        tenant_id: &str,
        language_code: Option<&str>,
    ) -> Result<Option<QueueItem>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM queue_items
             WHERE tenant_id = ?1 AND status = 'pending'
               AND (?2 IS NULL OR language_code = ?2)
             ORDER BY priority ASC, created_at ASC, rowid ASC
             LIMIT 1",
            QUEUE_COLUMNS
        );
        let item = conn
            .query_row(&sql, params![tenant_id, language_code], queue_item_from_row)
            .optional()?;
        Ok(item)
    }

    pub fn claim_queue_item(
        &self,
        queue_id: &str,
        validator_id: &str,
        tenant_id: &str,
        claimed_at: &str,
    ) -> Result<ClaimOutcome> {
        self.write_tx(|tx| {
            let item = load_scoped(tx, queue_id, tenant_id)?;
            if item.status != QueueStatus::Pending {
                return Ok(ClaimOutcome::NotAvailable {
                    status: item.status,
                });
            }
            // The status guard keeps this safe even without the immediate lock.
            let changed = tx.execute(
                "UPDATE queue_items SET status = 'claimed', claimed_by = ?1, claimed_at = ?2
                 WHERE id = ?3 AND status = 'pending'",
                params![validator_id, claimed_at, queue_id],
            )?;
            if changed != 1 {
                return Ok(ClaimOutcome::NotAvailable {
                    status: QueueStatus::Claimed,
                });
            }
            let claimed = load_item(tx, queue_id)?
                .ok_or_else(|| EngineError::not_found("queue item", queue_id))?;
            Ok(ClaimOutcome::Claimed(claimed))
        })
    }

    pub fn release_queue_item(&self, queue_id: &str, tenant_id: &str) -> Result<QueueItem> {
        self.write_tx(|tx| {
            let item = load_scoped(tx, queue_id, tenant_id)?;
            if item.status != QueueStatus::Claimed {
                return Err(EngineError::InvalidTransition {
                    op: "release",
                    from: item.status.to_string(),
                });
            }
            tx.execute(
                "UPDATE queue_items SET status = 'pending', claimed_by = NULL, claimed_at = NULL
                 WHERE id = ?1 AND status = 'claimed'",
                params![queue_id],
            )?;
            load_item(tx, queue_id)?.ok_or_else(|| EngineError::not_found("queue item", queue_id))
        })
    }

    pub fn complete_queue_item(
        &self,
        queue_id: &str,
        validator_id: &str,
        tenant_id: &str,
        submission: &DecisionSubmission,
    ) -> Result<HumanValidation> {
        self.write_tx(|tx| {
            let item = load_scoped(tx, queue_id, tenant_id)?;
            if item.status != QueueStatus::Claimed {
                return Err(EngineError::InvalidTransition {
                    op: "complete",
                    from: item.status.to_string(),
                });
            }
            let claimed_by = item.claimed_by.clone().unwrap_or_default();
            if claimed_by != validator_id {
                return Err(EngineError::NotClaimant {
                    queue_id: queue_id.to_string(),
                    claimed_by,
                    validator_id: validator_id.to_string(),
                });
            }

            let now = now_rfc3339();
            let overrode = submission.decision.as_decision() != item.automated_label;
            let hv = HumanValidation {
                id: new_id("hv"),
                queue_id: queue_id.to_string(),
                tenant_id: tenant_id.to_string(),
                validator_id: validator_id.to_string(),
                decision: submission.decision,
                feedback: submission.feedback.clone(),
                time_spent_seconds: submission.time_spent_seconds,
                overrode_automation: overrode,
                created_at: now.clone(),
            };

            tx.execute(
                "INSERT INTO human_validations (id, queue_id, tenant_id, validator_id, decision,
                    feedback, time_spent_seconds, overrode_automation, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    hv.id,
                    hv.queue_id,
                    hv.tenant_id,
                    hv.validator_id,
                    hv.decision.as_decision().as_str(),
                    hv.feedback,
                    hv.time_spent_seconds as i64,
                    overrode as i64,
                    hv.created_at,
                ],
            )?;

            tx.execute(
                "UPDATE queue_items SET status = 'completed', completed_at = ?1
                 WHERE id = ?2 AND status = 'claimed'",
                params![now, queue_id],
            )?;

            tx.execute(
                "INSERT INTO validator_performance (validator_id, tenant_id, total_validations,
                    total_time_seconds, override_count, last_validation_at)
                 VALUES (?1, ?2, 1, ?3, ?4, ?5)
                 ON CONFLICT(validator_id, tenant_id) DO UPDATE SET
                    total_validations = total_validations + 1,
                    total_time_seconds = total_time_seconds + excluded.total_time_seconds,
                    override_count = override_count + excluded.override_count,
                    last_validation_at = excluded.last_validation_at",
                params![
                    validator_id,
                    tenant_id,
                    submission.time_spent_seconds as i64,
                    overrode as i64,
                    now,
                ],
            )?;

            if overrode {
                let sample = OverrideSample {
                    queue_id: queue_id.to_string(),
                    tenant_id: tenant_id.to_string(),
                    utterance: item.utterance.clone(),
                    expected_outcome: item.expected_outcome.clone(),
                    automated_label: item.automated_label,
                    human_decision: submission.decision,
                    locale: item.language_code.clone(),
                    metadata: serde_json::json!({
                        "script_id": item.script_id,
                        "test_case_id": item.test_case_id,
                        "validation_result_id": item.validation_result_id,
                        "confidence": item.confidence,
                        "escalation_reason": item.escalation_reason,
                        "dissenting_judges": item.dissenting_judges,
                        "validator_id": validator_id,
                        "feedback": submission.feedback,
                    }),
                };
                tx.execute(
                    "INSERT INTO override_outbox (queue_id, tenant_id, payload_json, created_at)
                     VALUES (?1, ?2, ?3, ?4)",
                    params![queue_id, tenant_id, serde_json::to_string(&sample)?, now],
                )?;
            }

            Ok(hv)
        })
    }

    pub fn queue_stats(&self, tenant_id: &str) -> Result<QueueStats> {
        let conn = self.lock()?;
        let mut stats = QueueStats::default();

        let mut stmt = conn.prepare(
            "SELECT status, COUNT(*) FROM queue_items WHERE tenant_id = ?1 GROUP BY status",
        )?;
        let rows = stmt.query_map(params![tenant_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, i64>(1)? as u64))
        })?;
        for r in rows {
            let (status, n) = r?;
            match QueueStatus::parse(&status) {
                Some(QueueStatus::Pending) => stats.pending = n,
                Some(QueueStatus::Claimed) => stats.claimed = n,
                Some(QueueStatus::Completed) => stats.completed = n,
                None => {}
            }
        }

        let mut stmt = conn.prepare(
            "SELECT created_at, completed_at FROM queue_items
             WHERE tenant_id = ?1 AND status = 'completed' AND completed_at IS NOT NULL",
        )?;
        let waits = stmt.query_map(params![tenant_id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        let mut total = 0.0;
        let mut n = 0usize;
        for w in waits {
            let (created, completed) = w?;
            if let (Ok(c), Ok(d)) = (
                chrono::DateTime::parse_from_rfc3339(&created),
                chrono::DateTime::parse_from_rfc3339(&completed),
            ) {
                total += (d - c).num_milliseconds() as f64 / 1000.0;
                n += 1;
            }
        }
        if n > 0 {
            stats.average_wait_seconds = Some(total / n as f64);
        }

        Ok(stats)
    }

    pub fn validator_performance(
        &self,
        validator_id: &str,
        tenant_id: &str,
    ) -> Result<ValidatorPerformance> {
        let conn = self.lock()?;
        let perf = conn
            .query_row(
                "SELECT total_validations, total_time_seconds, override_count, last_validation_at
                 FROM validator_performance WHERE validator_id = ?1 AND tenant_id = ?2",
                params![validator_id, tenant_id],
                |r| {
                    Ok(ValidatorPerformance {
                        validator_id: validator_id.to_string(),
                        tenant_id: tenant_id.to_string(),
                        total_validations: r.get::<_, i64>(0)? as u64,
                        total_time_seconds: r.get::<_, i64>(1)? as u64,
                        override_count: r.get::<_, i64>(2)? as u64,
                        last_validation_at: r.get(3)?,
                    })
                },
            )
            .optional()?;
        perf.ok_or_else(|| EngineError::not_found("validator", validator_id))
    }

    // override outbox

    pub fn pending_overrides(&self, limit: u32) -> Result<Vec<OutboxEntry>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, payload_json, created_at FROM override_outbox
             WHERE delivered_at IS NULL ORDER BY id ASC LIMIT ?1",
        )?;
        let rows = stmt.query_map(params![limit], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
            ))
        })?;
        let mut out = Vec::new();
        for r in rows {
            let (id, payload, created_at) = r?;
            out.push(OutboxEntry {
                id,
                sample: serde_json::from_str(&payload)?,
                created_at,
            });
        }
        Ok(out)
    }

    pub fn mark_overrides_delivered(&self, ids: &[i64]) -> Result<()> {
        let now = now_rfc3339();
        self.write_tx(|tx| {
            let mut stmt =
                tx.prepare("UPDATE override_outbox SET delivered_at = ?1 WHERE id = ?2")?;
            for id in ids {
                stmt.execute(params![now, id])?;
            }
            Ok(())
        })
    }
}
