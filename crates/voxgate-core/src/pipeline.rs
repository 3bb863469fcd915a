//! Per-step decision flow: consensus, escalation policy, persistence,
//! queueing and defect streak tracking.

use crate::config::{DefectSettings, EngineConfig};
use crate::consensus::{build_consensus, ConsensusResult};
use crate::defects::tracker::log_filed;
use crate::defects::{categorize, DefectCategory, DefectRecord, DefectTracker, StreakObservation};
use crate::errors::Result;
use crate::escalation::{determine_action, EnsembleConsensus, EscalationAction, EscalationDecision};
use crate::model::{Decision, ReviewStatus, ScriptResult, StepExecution, ValidationSignal};
use crate::queue::{log_enqueued, HumanValidationQueue, NewQueueItem, QueueItem};
use crate::storage::{RecordedStep, Store};
use crate::thresholds::{EscalationPolicyConfig, ReviewThresholds};
use serde::{Deserialize, Serialize};

const FAIL_PRIORITY: u8 = 2;
const MISSING_CONFIDENCE_PRIORITY: u8 = 4;

/// What gets written to `validation_results` for every step.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRecord {
    pub tenant_id: String,
    pub execution_id: String,
    pub script_id: String,
    pub test_case_id: String,
    pub step_index: u32,
    pub signal: ValidationSignal,
    pub consensus: ConsensusResult,
    pub escalation: EscalationDecision,
    pub category: Option<DefectCategory>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StepOutcome {
    pub validation_id: String,
    pub action: EscalationAction,
    pub consensus: ConsensusResult,
    pub escalation: EscalationDecision,
    pub category: Option<DefectCategory>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub queue_item: Option<QueueItem>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub defect: Option<DefectRecord>,
}

/// One line of an ingest stream.
#[derive(Debug, Clone, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestRecord {
    Step(StepExecution),
    ScriptResult {
        execution_id: String,
        #[serde(flatten)]
        result: ScriptResult,
    },
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum IngestOutcome {
    Step(Box<StepOutcome>),
    ScriptResult { script_id: String, id: i64 },
}

/// Routes a consensus result through the escalation policy.
///
/// `auto_fail` records directly and `needs_review` always escalates. An
/// `auto_pass` only stands when the ensemble returned a verdict and also
/// clears the policy floors; otherwise the step is escalated.
pub fn route(
    consensus: &ConsensusResult,
    ensemble: &EnsembleConsensus,
    policy: &EscalationPolicyConfig,
) -> EscalationDecision {
    let dissenting_judges = ensemble.dissenting_judges.clone();
    match consensus.review_status {
        ReviewStatus::AutoFail => EscalationDecision {
            action: EscalationAction::AutoFail,
            reason: if consensus.forced_fail {
                "both validators failed the step".to_string()
            } else {
                match consensus.confidence {
                    Some(c) => format!("confidence {:.2} below auto-fail cutoff", c),
                    None => "confidence below auto-fail cutoff".to_string(),
                }
            },
            dissenting_judges,
        },
        ReviewStatus::NeedsReview => {
            let policy_view = determine_action(ensemble, policy);
            let reason = match policy_view.action {
                EscalationAction::Escalate => policy_view.reason,
                _ => match consensus.confidence {
                    Some(c) => format!("confidence {:.2} inside review band", c),
                    None => "confidence missing".to_string(),
                },
            };
            EscalationDecision {
                action: EscalationAction::Escalate,
                reason,
                dissenting_judges,
            }
        }
        ReviewStatus::AutoPass if ensemble.decision == Decision::Uncertain => EscalationDecision {
            action: EscalationAction::Escalate,
            reason: "ensemble reported no verdict".to_string(),
            dissenting_judges,
        },
        ReviewStatus::AutoPass => {
            let policy_view = determine_action(ensemble, policy);
            match policy_view.action {
                EscalationAction::AutoPass | EscalationAction::Escalate => policy_view,
                EscalationAction::AutoFail => EscalationDecision {
                    action: EscalationAction::Escalate,
                    reason: policy_view.reason,
                    dissenting_judges,
                },
            }
        }
    }
}

fn escalation_priority(consensus: &ConsensusResult) -> Option<u8> {
    if consensus.final_decision == Decision::Fail {
        Some(FAIL_PRIORITY)
    } else if consensus.confidence.is_none() {
        Some(MISSING_CONFIDENCE_PRIORITY)
    } else {
        None
    }
}

fn defect_title(category: DefectCategory, step: &StepExecution) -> String {
    if step.utterance.trim().is_empty() {
        format!("{} failure in {}", category.as_str(), step.execution.test_case_id)
    } else {
        format!("{}: {}", category.as_str(), step.utterance.trim())
    }
}

#[derive(Clone)]
pub struct ValidationPipeline {
    store: Store,
    review: ReviewThresholds,
    policy: EscalationPolicyConfig,
    defect_settings: DefectSettings,
    queue: HumanValidationQueue,
    tracker: DefectTracker,
}

impl ValidationPipeline {
    pub fn new(store: Store, config: &EngineConfig) -> Self {
        Self {
            queue: HumanValidationQueue::new(store.clone(), config.queue.clone()),
            tracker: DefectTracker::new(store.clone(), config.defects.auto_creation_threshold),
            review: config.review.clone(),
            policy: config.escalation.clone(),
            defect_settings: config.defects.clone(),
            store,
        }
    }

    pub fn process_step(&self, step: &StepExecution) -> Result<StepOutcome> {
        let exec = &step.execution;
        let consensus = build_consensus(&step.signal, &self.review);
        let ensemble = EnsembleConsensus::from_signal(&step.signal);
        let escalation = route(&consensus, &ensemble, &self.policy);

        let category = (consensus.final_decision != Decision::Pass)
            .then(|| categorize(exec, &step.signal, &self.defect_settings));

        let record = ValidationRecord {
            tenant_id: step.tenant_id.clone(),
            execution_id: exec.execution_id.clone(),
            script_id: exec.script_id.clone(),
            test_case_id: exec.test_case_id.clone(),
            step_index: step.step_index,
            signal: step.signal.clone(),
            consensus: consensus.clone(),
            escalation: escalation.clone(),
            category,
        };
        let placement = (escalation.action == EscalationAction::Escalate).then(|| {
            self.queue.placement(NewQueueItem {
                tenant_id: step.tenant_id.clone(),
                validation_result_id: None,
                script_id: exec.script_id.clone(),
                test_case_id: exec.test_case_id.clone(),
                utterance: step.utterance.clone(),
                expected_outcome: step.expected_outcome.clone(),
                automated_label: consensus.final_decision,
                confidence: consensus.confidence,
                escalation_reason: escalation.reason.clone(),
                dissenting_judges: escalation.dissenting_judges.clone(),
                language_code: step.language_code.clone(),
                priority: escalation_priority(&consensus),
            })
        });

        let streak_category = category.unwrap_or(DefectCategory::EdgeCase);
        let streak = StreakObservation {
            script_id: exec.script_id.clone(),
            test_case_id: exec.test_case_id.clone(),
            category: streak_category,
            title: defect_title(streak_category, step),
            qualifying: escalation.action == EscalationAction::AutoFail,
            observed_at: chrono::Utc::now(),
        };

        let RecordedStep {
            validation_id,
            queue_item,
            defect,
        } = self
            .store
            .record_step(&record, placement, &streak, self.tracker.threshold())?;
        if let Some(item) = &queue_item {
            log_enqueued(item);
        }
        if let Some(d) = &defect {
            log_filed(d);
        }

        tracing::info!(
            event = "voxgate.step.decided",
            validation_id = %validation_id,
            tenant_id = %step.tenant_id,
            script_id = %exec.script_id,
            step_index = step.step_index,
            decision = consensus.final_decision.as_str(),
            review_status = consensus.review_status.as_str(),
            action = escalation.action.as_str(),
            "step decided"
        );

        Ok(StepOutcome {
            validation_id,
            action: escalation.action,
            consensus,
            escalation,
            category,
            queue_item,
            defect,
        })
    }

    pub fn ingest(&self, record: &IngestRecord) -> Result<IngestOutcome> {
        match record {
            IngestRecord::Step(step) => Ok(IngestOutcome::Step(Box::new(self.process_step(step)?))),
            IngestRecord::ScriptResult {
                execution_id,
                result,
            } => {
                let id = self.store.record_script_result(execution_id, result)?;
                Ok(IngestOutcome::ScriptResult {
                    script_id: result.script_id.clone(),
                    id,
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ensemble(decision: Decision, agreement: f64, confidence: f64) -> EnsembleConsensus {
        EnsembleConsensus {
            decision,
            agreement_ratio: Some(agreement),
            confidence: Some(confidence),
            dissenting_judges: vec!["judge-b".into()],
        }
    }

    fn consensus(decision: Decision, status: ReviewStatus, confidence: Option<f64>) -> ConsensusResult {
        ConsensusResult {
            final_decision: decision,
            confidence,
            review_status: status,
            forced_fail: false,
        }
    }

    #[test]
    fn test_auto_pass_needs_policy_agreement() {
        let policy = EscalationPolicyConfig::default();
        let c = consensus(Decision::Pass, ReviewStatus::AutoPass, Some(0.9));

        let ok = route(&c, &ensemble(Decision::Pass, 0.9, 0.9), &policy);
        assert_eq!(ok.action, EscalationAction::AutoPass);

        let weak = route(&c, &ensemble(Decision::Pass, 0.5, 0.9), &policy);
        assert_eq!(weak.action, EscalationAction::Escalate);
        assert!(weak.reason.contains("agreement ratio 0.50"));
        assert_eq!(weak.dissenting_judges, vec!["judge-b".to_string()]);
    }

    #[test]
    fn test_auto_pass_without_ensemble_verdict_escalates() {
        let policy = EscalationPolicyConfig::default();
        let c = consensus(Decision::Pass, ReviewStatus::AutoPass, Some(0.9));
        let d = route(&c, &ensemble(Decision::Uncertain, 0.9, 0.9), &policy);
        assert_eq!(d.action, EscalationAction::Escalate);
        assert_eq!(d.reason, "ensemble reported no verdict");
    }

    #[test]
    fn test_needs_review_always_escalates() {
        let policy = EscalationPolicyConfig::default();
        let c = consensus(Decision::Uncertain, ReviewStatus::NeedsReview, Some(0.6));
        let d = route(&c, &ensemble(Decision::Pass, 1.0, 1.0), &policy);
        assert_eq!(d.action, EscalationAction::Escalate);
        assert!(d.reason.contains("review band"));
    }

    #[test]
    fn test_auto_fail_is_recorded_directly() {
        let policy = EscalationPolicyConfig::default();
        let c = consensus(Decision::Fail, ReviewStatus::AutoFail, Some(0.2));
        let d = route(&c, &ensemble(Decision::Pass, 1.0, 1.0), &policy);
        assert_eq!(d.action, EscalationAction::AutoFail);
    }

    #[test]
    fn test_fail_escalations_jump_the_queue() {
        let c = consensus(Decision::Fail, ReviewStatus::NeedsReview, Some(0.5));
        assert_eq!(escalation_priority(&c), Some(FAIL_PRIORITY));
        let c = consensus(Decision::Uncertain, ReviewStatus::NeedsReview, None);
        assert_eq!(escalation_priority(&c), Some(MISSING_CONFIDENCE_PRIORITY));
        let c = consensus(Decision::Uncertain, ReviewStatus::NeedsReview, Some(0.5));
        assert_eq!(escalation_priority(&c), None);
    }

    #[test]
    fn test_ingest_record_kinds() {
        let step: IngestRecord = serde_json::from_value(serde_json::json!({
            "kind": "step",
            "tenant_id": "t1",
            "execution": {"script_id": "s1", "test_case_id": "tc1"},
            "signal": {"confidence": 0.9}
        }))
        .unwrap();
        assert!(matches!(step, IngestRecord::Step(_)));

        let result: IngestRecord = serde_json::from_value(serde_json::json!({
            "kind": "script_result",
            "execution_id": "e1",
            "script_id": "s1",
            "status": "passed",
            "metrics": {"pass_rate": 0.9}
        }))
        .unwrap();
        match result {
            IngestRecord::ScriptResult { execution_id, result } => {
                assert_eq!(execution_id, "e1");
                assert_eq!(result.snapshot.metrics["pass_rate"], 0.9);
            }
            other => panic!("unexpected {:?}", other),
        }
    }
}
