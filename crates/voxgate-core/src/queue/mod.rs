//! Human review queue for escalated steps.
//!
//! Items move `pending -> claimed -> completed`, with `claimed -> pending` on
//! release. Every transition runs in one write transaction, so a refused or
//! failed call leaves the item exactly as it was.

use crate::config::{QueueSettings, MAX_PRIORITY, MIN_PRIORITY};
use crate::errors::Result;
use crate::model::Decision;
use crate::storage::{QueuePlacement, Store};
use serde::{Deserialize, Serialize};
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    Pending,
    Claimed,
    Completed,
}

impl QueueStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            QueueStatus::Pending => "pending",
            QueueStatus::Claimed => "claimed",
            QueueStatus::Completed => "completed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(QueueStatus::Pending),
            "claimed" => Some(QueueStatus::Claimed),
            "completed" => Some(QueueStatus::Completed),
            _ => None,
        }
    }
}

impl fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct QueueItem {
    pub id: String,
    pub tenant_id: String,
    pub validation_result_id: Option<String>,
    pub script_id: String,
    pub test_case_id: String,
    pub utterance: String,
    pub expected_outcome: String,
    /// Automated decision that triggered the escalation.
    pub automated_label: Decision,
    pub confidence: Option<f64>,
    pub escalation_reason: String,
    pub dissenting_judges: Vec<String>,
    pub language_code: String,
    pub requires_native_speaker: bool,
    /// 1 is most urgent, 10 least.
    pub priority: u8,
    pub status: QueueStatus,
    pub claimed_by: Option<String>,
    pub claimed_at: Option<String>,
    pub created_at: String,
    pub completed_at: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewQueueItem {
    pub tenant_id: String,
    #[serde(default)]
    pub validation_result_id: Option<String>,
    pub script_id: String,
    pub test_case_id: String,
    #[serde(default)]
    pub utterance: String,
    #[serde(default)]
    pub expected_outcome: String,
    pub automated_label: Decision,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub escalation_reason: String,
    #[serde(default)]
    pub dissenting_judges: Vec<String>,
    pub language_code: String,
    #[serde(default)]
    pub priority: Option<u8>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum ClaimOutcome {
    Claimed(QueueItem),
    /// Someone else holds the item, or it is already done. Re-query `get_next`.
    NotAvailable { status: QueueStatus },
}

impl ClaimOutcome {
    pub fn is_claimed(&self) -> bool {
        matches!(self, ClaimOutcome::Claimed(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HumanDecision {
    Pass,
    Fail,
}

impl HumanDecision {
    pub fn as_decision(&self) -> Decision {
        match self {
            HumanDecision::Pass => Decision::Pass,
            HumanDecision::Fail => Decision::Fail,
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pass" => Some(HumanDecision::Pass),
            "fail" => Some(HumanDecision::Fail),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionSubmission {
    pub decision: HumanDecision,
    #[serde(default)]
    pub feedback: Option<String>,
    pub time_spent_seconds: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HumanValidation {
    pub id: String,
    pub queue_id: String,
    pub tenant_id: String,
    pub validator_id: String,
    pub decision: HumanDecision,
    pub feedback: Option<String>,
    pub time_spent_seconds: u32,
    pub overrode_automation: bool,
    pub created_at: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct QueueStats {
    pub pending: u64,
    pub claimed: u64,
    pub completed: u64,
    pub average_wait_seconds: Option<f64>,
}

impl QueueStats {
    pub fn total(&self) -> u64 {
        self.pending + self.claimed + self.completed
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ValidatorPerformance {
    pub validator_id: String,
    pub tenant_id: String,
    pub total_validations: u64,
    pub total_time_seconds: u64,
    pub override_count: u64,
    pub last_validation_at: Option<String>,
}

impl ValidatorPerformance {
    pub fn average_time_seconds(&self) -> Option<f64> {
        if self.total_validations == 0 {
            return None;
        }
        Some(self.total_time_seconds as f64 / self.total_validations as f64)
    }

    /// Share of this validator's decisions that disagreed with automation.
    pub fn override_rate(&self) -> Option<f64> {
        if self.total_validations == 0 {
            return None;
        }
        Some(self.override_count as f64 / self.total_validations as f64)
    }
}

pub(crate) fn log_enqueued(item: &QueueItem) {
    tracing::info!(
        event = "voxgate.queue.enqueued",
        queue_id = %item.id,
        tenant_id = %item.tenant_id,
        script_id = %item.script_id,
        priority = item.priority,
        requires_native_speaker = item.requires_native_speaker,
        "escalated step queued for review"
    );
}

pub fn clamp_priority(p: u8) -> u8 {
    p.clamp(MIN_PRIORITY, MAX_PRIORITY)
}

#[derive(Clone)]
pub struct HumanValidationQueue {
    store: Store,
    settings: QueueSettings,
}

impl HumanValidationQueue {
    pub fn new(store: Store, settings: QueueSettings) -> Self {
        Self { store, settings }
    }

    pub fn requires_native_speaker(&self, language_code: &str) -> bool {
        !self
            .settings
            .base_locales
            .iter()
            .any(|l| l.eq_ignore_ascii_case(language_code))
    }

    /// Resolves the effective priority and native-speaker flag for an item.
    pub fn placement(&self, item: NewQueueItem) -> QueuePlacement {
        QueuePlacement {
            priority: clamp_priority(item.priority.unwrap_or(self.settings.default_priority)),
            requires_native_speaker: self.requires_native_speaker(&item.language_code),
            item,
        }
    }

    pub fn enqueue(&self, item: NewQueueItem) -> Result<QueueItem> {
        let p = self.placement(item);
        let created = self
            .store
            .insert_queue_item(&p.item, p.priority, p.requires_native_speaker)?;
        log_enqueued(&created);
        Ok(created)
    }

    pub fn get(&self, queue_id: &str, tenant_id: &str) -> Result<QueueItem> {
        self.store.get_queue_item(queue_id, tenant_id)
    }

    /// Highest priority, then oldest, pending item for the tenant. Does not claim.
    pub fn get_next(
        &self,
        validator_id: &str,
        tenant_id: &str,
        language_code: Option<&str>,
    ) -> Result<Option<QueueItem>> {
        let next = self.store.next_pending_item(tenant_id, language_code)?;
        tracing::debug!(
            validator_id = %validator_id,
            tenant_id = %tenant_id,
            found = next.is_some(),
            "queue next"
        );
        Ok(next)
    }

    pub fn claim(&self, queue_id: &str, validator_id: &str, tenant_id: &str) -> Result<ClaimOutcome> {
        let outcome = self
            .store
            .claim_queue_item(queue_id, validator_id, tenant_id, &crate::storage::now_rfc3339())?;
        match &outcome {
            ClaimOutcome::Claimed(_) => tracing::info!(
                event = "voxgate.queue.claimed",
                queue_id = %queue_id,
                validator_id = %validator_id,
                "queue item claimed"
            ),
            ClaimOutcome::NotAvailable { status } => tracing::debug!(
                event = "voxgate.queue.claim_lost",
                queue_id = %queue_id,
                validator_id = %validator_id,
                status = %status,
                "queue item no longer available"
            ),
        }
        Ok(outcome)
    }

    pub fn release(&self, queue_id: &str, tenant_id: &str) -> Result<QueueItem> {
        let item = self.store.release_queue_item(queue_id, tenant_id)?;
        tracing::info!(
            event = "voxgate.queue.released",
            queue_id = %queue_id,
            "queue item returned to pending"
        );
        Ok(item)
    }

    /// Completes a claimed item. When the human disagrees with the automated
    /// label, an override sample is written to the outbox in the same transaction.
    pub fn submit_decision(
        &self,
        queue_id: &str,
        validator_id: &str,
        tenant_id: &str,
        submission: &DecisionSubmission,
    ) -> Result<HumanValidation> {
        let hv = self
            .store
            .complete_queue_item(queue_id, validator_id, tenant_id, submission)?;
        tracing::info!(
            event = "voxgate.queue.completed",
            queue_id = %queue_id,
            validator_id = %validator_id,
            decision = ?hv.decision,
            overrode_automation = hv.overrode_automation,
            time_spent_seconds = hv.time_spent_seconds,
            "human decision recorded"
        );
        Ok(hv)
    }

    pub fn get_stats(&self, tenant_id: &str) -> Result<QueueStats> {
        self.store.queue_stats(tenant_id)
    }

    pub fn validator_performance(
        &self,
        validator_id: &str,
        tenant_id: &str,
    ) -> Result<ValidatorPerformance> {
        self.store.validator_performance(validator_id, tenant_id)
    }
}
