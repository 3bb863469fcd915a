use super::store::{now_rfc3339, Store};
use crate::baseline::{Baseline, BaselineHistory, BaselineStatus};
use crate::errors::{EngineError, Result};
use crate::fingerprint::snapshot_digest;
use crate::model::ScriptSnapshot;
use rusqlite::{params, Connection, OptionalExtension};

fn current(conn: &Connection, script_id: &str) -> Result<Option<Baseline>> {
    let row = conn
        .query_row(
            "SELECT version, status, snapshot_json, snapshot_digest, approved_by, approved_at, note
             FROM baselines WHERE script_id = ?1",
            params![script_id],
            |r| {
                Ok((
                    r.get::<_, i64>(0)?,
                    r.get::<_, String>(1)?,
                    r.get::<_, String>(2)?,
                    r.get::<_, String>(3)?,
                    r.get::<_, String>(4)?,
                    r.get::<_, String>(5)?,
                    r.get::<_, Option<String>>(6)?,
                ))
            },
        )
        .optional()?;

    match row {
        None => Ok(None),
        Some((version, status, snapshot, digest, approved_by, approved_at, note)) => {
            Ok(Some(Baseline {
                script_id: script_id.to_string(),
                version: version as u32,
                status: BaselineStatus::parse(&status),
                snapshot: serde_json::from_str(&snapshot)?,
                snapshot_digest: digest,
                approved_by,
                approved_at,
                note,
            }))
        }
    }
}

fn is_constraint_violation(e: &rusqlite::Error) -> bool {
    matches!(
        e,
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation
    )
}

impl Store {
    pub fn current_baseline(&self, script_id: &str) -> Result<Option<Baseline>> {
        let conn = self.lock()?;
        current(&conn, script_id)
    }

    pub fn approve_baseline(
        &self,
        script_id: &str,
        snapshot: &ScriptSnapshot,
        approved_by: &str,
        note: Option<&str>,
    ) -> Result<Baseline> {
        let snapshot_json = serde_json::to_string(snapshot)?;
        let digest = snapshot_digest(snapshot);
        let now = now_rfc3339();

        self.write_tx(|tx| {
            let version = match current(tx, script_id)? {
                None => {
                    tx.execute(
                        "INSERT INTO baselines (script_id, version, status, snapshot_json,
                            snapshot_digest, approved_by, approved_at, note)
                         VALUES (?1, 1, 'active', ?2, ?3, ?4, ?5, ?6)",
                        params![script_id, snapshot_json, digest, approved_by, now, note],
                    )
                    .map_err(|e| {
                        if is_constraint_violation(&e) {
                            EngineError::Conflict(format!(
                                "baseline for '{}' was created concurrently",
                                script_id
                            ))
                        } else {
                            EngineError::Storage(e)
                        }
                    })?;
                    1
                }
                Some(prev) => {
                    tx.execute(
                        "INSERT INTO baseline_history (script_id, version, status, snapshot_json,
                            snapshot_digest, approved_by, approved_at, note, archived_at)
                         VALUES (?1, ?2, 'superseded', ?3, ?4, ?5, ?6, ?7, ?8)",
                        params![
                            script_id,
                            prev.version as i64,
                            serde_json::to_string(&prev.snapshot)?,
                            prev.snapshot_digest,
                            prev.approved_by,
                            prev.approved_at,
                            prev.note,
                            now,
                        ],
                    )
                    .map_err(|e| {
                        if is_constraint_violation(&e) {
                            EngineError::Conflict(format!(
                                "version {} of '{}' was already archived",
                                prev.version, script_id
                            ))
                        } else {
                            EngineError::Storage(e)
                        }
                    })?;

                    let next = prev.version + 1;
                    let changed = tx.execute(
                        "UPDATE baselines SET version = ?1, status = 'active', snapshot_json = ?2,
                            snapshot_digest = ?3, approved_by = ?4, approved_at = ?5, note = ?6
                         WHERE script_id = ?7 AND version = ?8",
                        params![
                            next as i64,
                            snapshot_json,
                            digest,
                            approved_by,
                            now,
                            note,
                            script_id,
                            prev.version as i64,
                        ],
                    )?;
                    if changed != 1 {
                        return Err(EngineError::Conflict(format!(
                            "baseline for '{}' moved past version {}",
                            script_id, prev.version
                        )));
                    }
                    next
                }
            };

            Ok(Baseline {
                script_id: script_id.to_string(),
                version,
                status: BaselineStatus::Active,
                snapshot: snapshot.clone(),
                snapshot_digest: digest.clone(),
                approved_by: approved_by.to_string(),
                approved_at: now.clone(),
                note: note.map(str::to_string),
            })
        })
    }

    pub fn baseline_history(&self, script_id: &str) -> Result<Vec<BaselineHistory>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT version, status, snapshot_json, snapshot_digest, approved_by, approved_at,
                note, archived_at
             FROM baseline_history WHERE script_id = ?1 ORDER BY version ASC",
        )?;
        let rows = stmt.query_map(params![script_id], |r| {
            Ok((
                r.get::<_, i64>(0)?,
                r.get::<_, String>(1)?,
                r.get::<_, String>(2)?,
                r.get::<_, String>(3)?,
                r.get::<_, String>(4)?,
                r.get::<_, String>(5)?,
                r.get::<_, Option<String>>(6)?,
                r.get::<_, String>(7)?,
            ))
        })?;

        let mut out = Vec::new();
        for r in rows {
            let (version, status, snapshot, digest, approved_by, approved_at, note, archived_at) =
                r?;
            out.push(BaselineHistory {
                script_id: script_id.to_string(),
                version: version as u32,
                status: BaselineStatus::parse(&status),
                snapshot: serde_json::from_str(&snapshot)?,
                snapshot_digest: digest,
                approved_by,
                approved_at,
                note,
                archived_at,
            });
        }
        Ok(out)
    }

    pub fn baseline_script_ids(&self) -> Result<Vec<String>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare("SELECT script_id FROM baselines ORDER BY script_id")?;
        let rows = stmt.query_map([], |r| r.get::<_, String>(0))?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}
