use super::store::{new_id, now_rfc3339, Store};
use crate::defects::{DefectCategory, DefectCluster, DefectRecord, Severity, StreakObservation};
use crate::errors::Result;
use crate::fingerprint::defect_key;
use chrono::{DateTime, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};

fn conversion_error(idx: usize, msg: String) -> rusqlite::Error {
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, msg.into())
}

fn ts_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let s: String = r.get(idx)?;
    DateTime::parse_from_rfc3339(&s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| conversion_error(idx, format!("bad timestamp '{}': {}", s, e)))
}

fn category_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<DefectCategory> {
    let s: String = r.get(idx)?;
    DefectCategory::parse(&s).ok_or_else(|| conversion_error(idx, format!("unknown category '{}'", s)))
}

fn severity_column(r: &Row<'_>, idx: usize) -> rusqlite::Result<Severity> {
    let s: String = r.get(idx)?;
    Severity::parse(&s).ok_or_else(|| conversion_error(idx, format!("unknown severity '{}'", s)))
}

fn defect_from_row(r: &Row<'_>) -> rusqlite::Result<DefectRecord> {
    Ok(DefectRecord {
        id: r.get(0)?,
        script_id: r.get(1)?,
        test_case_id: r.get(2)?,
        category: category_column(r, 3)?,
        severity: severity_column(r, 4)?,
        title: r.get(5)?,
        occurrence_count: r.get::<_, i64>(6)? as u32,
        first_detected: ts_column(r, 7)?,
        last_detected: ts_column(r, 8)?,
        pattern_key: r.get(9)?,
    })
}

const DEFECT_COLUMNS: &str = "id, script_id, test_case_id, category, severity, title,
    occurrence_count, first_detected, last_detected, pattern_key";

/// Streak update on an open connection; callers own the transaction.
pub(crate) fn observe_streak_on(
    conn: &Connection,
    obs: &StreakObservation,
    threshold: u32,
) -> Result<Option<DefectRecord>> {
    let now = now_rfc3339();
    if !obs.qualifying {
        conn.execute(
            "INSERT INTO defect_streaks (script_id, consecutive, streak_started_at, updated_at)
             VALUES (?1, 0, NULL, ?2)
             ON CONFLICT(script_id) DO UPDATE SET
                consecutive = 0, streak_started_at = NULL, updated_at = excluded.updated_at",
            params![obs.script_id, now],
        )?;
        return Ok(None);
    }

    let prev: Option<(i64, Option<String>)> = conn
        .query_row(
            "SELECT consecutive, streak_started_at FROM defect_streaks WHERE script_id = ?1",
            params![obs.script_id],
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let (count, started_at) = match prev {
        Some((n, started)) if n > 0 => (
            n as u32 + 1,
            started.unwrap_or_else(|| fmt_ts(obs.observed_at)),
        ),
        _ => (1, fmt_ts(obs.observed_at)),
    };

    if count < threshold {
        conn.execute(
            "INSERT INTO defect_streaks (script_id, consecutive, streak_started_at, updated_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(script_id) DO UPDATE SET
                consecutive = excluded.consecutive,
                streak_started_at = excluded.streak_started_at,
                updated_at = excluded.updated_at",
            params![obs.script_id, count as i64, started_at, now],
        )?;
        return Ok(None);
    }

    let normalized = crate::defects::normalize_title(&obs.title);
    let record = DefectRecord {
        id: new_id("def"),
        script_id: obs.script_id.clone(),
        test_case_id: obs.test_case_id.clone(),
        category: obs.category,
        severity: obs.category.default_severity(),
        title: obs.title.clone(),
        occurrence_count: count,
        first_detected: parse_or(&started_at, obs.observed_at),
        last_detected: obs.observed_at,
        pattern_key: Some(defect_key(
            &obs.test_case_id,
            obs.category.as_str(),
            &normalized,
        )),
    };
    conn.execute(
        "INSERT INTO defects (id, script_id, test_case_id, category, severity, title,
            occurrence_count, first_detected, last_detected, pattern_key)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
        params![
            record.id,
            record.script_id,
            record.test_case_id,
            record.category.as_str(),
            record.severity.as_str(),
            record.title,
            record.occurrence_count as i64,
            fmt_ts(record.first_detected),
            fmt_ts(record.last_detected),
            record.pattern_key,
        ],
    )?;
    conn.execute(
        "INSERT INTO defect_streaks (script_id, consecutive, streak_started_at, updated_at)
         VALUES (?1, 0, NULL, ?2)
         ON CONFLICT(script_id) DO UPDATE SET
            consecutive = 0, streak_started_at = NULL, updated_at = excluded.updated_at",
        params![obs.script_id, now],
    )?;
    Ok(Some(record))
}

impl Store {
    /// Advances or resets the script's consecutive-failure counter, filing a
    /// defect and zeroing the counter once `threshold` is reached.
    pub fn observe_defect_streak(
        &self,
        obs: &StreakObservation,
        threshold: u32,
    ) -> Result<Option<DefectRecord>> {
        self.write_tx(|tx| observe_streak_on(tx, obs, threshold))
    }

    pub fn defect_streak(&self, script_id: &str) -> Result<u32> {
        let conn = self.lock()?;
        let n: Option<i64> = conn
            .query_row(
                "SELECT consecutive FROM defect_streaks WHERE script_id = ?1",
                params![script_id],
                |r| r.get(0),
            )
            .optional()?;
        Ok(n.unwrap_or(0) as u32)
    }

    pub fn list_defects(&self, script_id: Option<&str>) -> Result<Vec<DefectRecord>> {
        let conn = self.lock()?;
        let sql = format!(
            "SELECT {} FROM defects WHERE (?1 IS NULL OR script_id = ?1)
             ORDER BY last_detected DESC, id ASC",
            DEFECT_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params![script_id], defect_from_row)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Swaps the stored pattern set for a fresh clustering, all or nothing.
    pub fn replace_defect_patterns(&self, clusters: &[DefectCluster]) -> Result<()> {
        let now = now_rfc3339();
        self.write_tx(|tx| {
            tx.execute("DELETE FROM defect_patterns", [])?;
            let mut insert = tx.prepare(
                "INSERT INTO defect_patterns (pattern_key, test_case_id, category, severity, title,
                    occurrence_count, first_detected, last_detected, linked_defect_id, refreshed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
                 ON CONFLICT(pattern_key) DO UPDATE SET
                    occurrence_count = defect_patterns.occurrence_count + excluded.occurrence_count,
                    first_detected = MIN(defect_patterns.first_detected, excluded.first_detected),
                    last_detected = MAX(defect_patterns.last_detected, excluded.last_detected)",
            )?;
            let mut link = tx.prepare("UPDATE defects SET pattern_key = ?1 WHERE id = ?2")?;
            for c in clusters {
                insert.execute(params![
                    c.key,
                    c.test_case_id,
                    c.category.as_str(),
                    c.severity.as_str(),
                    c.title,
                    c.count as i64,
                    fmt_ts(c.first_detected),
                    fmt_ts(c.last_detected),
                    c.linked_defect_id,
                    now,
                ])?;
                for id in &c.member_ids {
                    link.execute(params![c.key, id])?;
                }
            }
            Ok(())
        })
    }

    pub fn list_defect_patterns(&self) -> Result<Vec<DefectCluster>> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT pattern_key, test_case_id, category, severity, title, occurrence_count,
                first_detected, last_detected, linked_defect_id
             FROM defect_patterns ORDER BY occurrence_count DESC, pattern_key ASC",
        )?;
        let rows = stmt.query_map([], |r| {
            Ok(DefectCluster {
                key: r.get(0)?,
                test_case_id: r.get(1)?,
                category: category_column(r, 2)?,
                severity: severity_column(r, 3)?,
                title: r.get(4)?,
                count: r.get::<_, i64>(5)? as usize,
                first_detected: ts_column(r, 6)?,
                last_detected: ts_column(r, 7)?,
                member_ids: Vec::new(),
                linked_defect_id: r.get(8)?,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }
}

fn fmt_ts(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(chrono::SecondsFormat::Micros, true)
}

fn parse_or(s: &str, fallback: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or(fallback)
}
