//! Versioned known-good snapshots per script.

use crate::errors::{EngineError, Result};
use crate::model::ScriptSnapshot;
use crate::storage::Store;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BaselineStatus {
    Active,
    Superseded,
}

impl BaselineStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BaselineStatus::Active => "active",
            BaselineStatus::Superseded => "superseded",
        }
    }

    pub fn parse(s: &str) -> Self {
        match s {
            "superseded" => BaselineStatus::Superseded,
            _ => BaselineStatus::Active,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Baseline {
    pub script_id: String,
    pub version: u32,
    pub status: BaselineStatus,
    pub snapshot: ScriptSnapshot,
    pub snapshot_digest: String,
    pub approved_by: String,
    pub approved_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// A superseded baseline. Written once, never updated.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BaselineHistory {
    pub script_id: String,
    pub version: u32,
    pub status: BaselineStatus,
    pub snapshot: ScriptSnapshot,
    pub snapshot_digest: String,
    pub approved_by: String,
    pub approved_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    pub archived_at: String,
}

impl From<BaselineHistory> for Baseline {
    fn from(h: BaselineHistory) -> Self {
        Baseline {
            script_id: h.script_id,
            version: h.version,
            status: h.status,
            snapshot: h.snapshot,
            snapshot_digest: h.snapshot_digest,
            approved_by: h.approved_by,
            approved_at: h.approved_at,
            note: h.note,
        }
    }
}

#[derive(Clone)]
pub struct BaselineManager {
    store: Store,
}

impl BaselineManager {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    /// Creates version 1, or archives the current baseline and writes
    /// `previous + 1`. The read of the current version and both writes share
    /// one immediate transaction, so concurrent approvals serialize.
    pub fn approve(
        &self,
        script_id: &str,
        snapshot: &ScriptSnapshot,
        approved_by: &str,
        note: Option<&str>,
    ) -> Result<Baseline> {
        let baseline = self
            .store
            .approve_baseline(script_id, snapshot, approved_by, note)?;
        tracing::info!(
            event = "voxgate.baseline.approved",
            script_id = %script_id,
            version = baseline.version,
            approved_by = %approved_by,
            digest = %baseline.snapshot_digest,
            "baseline approved"
        );
        Ok(baseline)
    }

    /// Approves the most recent recorded execution of the script.
    pub fn approve_latest(
        &self,
        script_id: &str,
        approved_by: &str,
        note: Option<&str>,
    ) -> Result<Baseline> {
        let latest = self
            .store
            .latest_script_result(script_id)?
            .ok_or_else(|| EngineError::not_found("script result", script_id))?;
        self.approve(script_id, &latest.result.snapshot, approved_by, note)
    }

    pub fn get(&self, script_id: &str) -> Result<Baseline> {
        self.store
            .current_baseline(script_id)?
            .ok_or_else(|| EngineError::not_found("baseline", script_id))
    }

    /// Oldest first.
    pub fn history(&self, script_id: &str) -> Result<Vec<BaselineHistory>> {
        self.store.baseline_history(script_id)
    }

    pub fn get_version(&self, script_id: &str, version: u32) -> Result<Baseline> {
        if let Some(current) = self.store.current_baseline(script_id)? {
            if current.version == version {
                return Ok(current);
            }
        }
        self.history(script_id)?
            .into_iter()
            .find(|h| h.version == version)
            .map(Baseline::from)
            .ok_or_else(|| EngineError::not_found("baseline version", format!("{}@{}", script_id, version)))
    }
}
