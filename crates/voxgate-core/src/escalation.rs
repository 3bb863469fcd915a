use crate::model::{Decision, ValidationSignal};
use crate::thresholds::EscalationPolicyConfig;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EscalationAction {
    AutoPass,
    AutoFail,
    Escalate,
}

impl EscalationAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            EscalationAction::AutoPass => "auto_pass",
            EscalationAction::AutoFail => "auto_fail",
            EscalationAction::Escalate => "escalate",
        }
    }
}

/// The judge-panel view of a step, as consumed by the policy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConsensus {
    pub decision: Decision,
    pub agreement_ratio: Option<f64>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub dissenting_judges: Vec<String>,
}

impl EnsembleConsensus {
    pub fn from_signal(signal: &ValidationSignal) -> Self {
        let decision = match signal.llm_passed {
            Some(true) => Decision::Pass,
            Some(false) => Decision::Fail,
            None => Decision::Uncertain,
        };
        Self {
            decision,
            agreement_ratio: signal.agreement_ratio,
            confidence: signal.confidence,
            dissenting_judges: signal.dissenting_judges.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EscalationDecision {
    pub action: EscalationAction,
    pub reason: String,
    pub dissenting_judges: Vec<String>,
}

pub fn determine_action(
    consensus: &EnsembleConsensus,
    policy: &EscalationPolicyConfig,
) -> EscalationDecision {
    let dissenting_judges = consensus.dissenting_judges.clone();

    if consensus.decision == Decision::Fail {
        return EscalationDecision {
            action: EscalationAction::AutoFail,
            reason: "consensus decision is fail".to_string(),
            dissenting_judges,
        };
    }

    let mut shortfalls = Vec::new();
    check_floor(
        &mut shortfalls,
        "agreement ratio",
        consensus.agreement_ratio,
        policy.min_agreement_ratio,
    );
    check_floor(
        &mut shortfalls,
        "confidence",
        consensus.confidence,
        policy.min_confidence,
    );

    if shortfalls.is_empty() {
        EscalationDecision {
            action: EscalationAction::AutoPass,
            reason: "agreement and confidence meet policy".to_string(),
            dissenting_judges,
        }
    } else {
        EscalationDecision {
            action: EscalationAction::Escalate,
            reason: shortfalls.join("; "),
            dissenting_judges,
        }
    }
}

fn check_floor(out: &mut Vec<String>, label: &str, observed: Option<f64>, required: f64) {
    match observed {
        Some(v) if v >= required => {}
        Some(v) => out.push(format!(
            "{} {:.2} below required {:.2}",
            label, v, required
        )),
        None => out.push(format!("{} missing (required {:.2})", label, required)),
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

    #[test]
    fn test_auto_pass_when_both_floors_met() {
        let d = determine_action(
            &ensemble(Decision::Pass, 0.70, 0.85),
            &EscalationPolicyConfig::default(),
        );
        assert_eq!(d.action, EscalationAction::AutoPass);
        assert_eq!(d.dissenting_judges, vec!["judge-b".to_string()]);
    }

    #[test]
    fn test_escalate_lists_every_shortfall() {
        let d = determine_action(
            &ensemble(Decision::Pass, 0.50, 0.60),
            &EscalationPolicyConfig::default(),
        );
        assert_eq!(d.action, EscalationAction::Escalate);
        assert!(d.reason.contains("agreement ratio 0.50 below required 0.66"));
        assert!(d.reason.contains("confidence 0.60 below required 0.80"));
        assert_eq!(d.reason.matches("; ").count(), 1);
    }

    #[test]
    fn test_single_shortfall_has_no_separator() {
        let d = determine_action(
            &ensemble(Decision::Pass, 0.90, 0.60),
            &EscalationPolicyConfig::default(),
        );
        assert_eq!(d.action, EscalationAction::Escalate);
        assert!(!d.reason.contains("agreement"));
        assert!(!d.reason.contains("; "));
    }

    #[test]
    fn test_fail_wins_over_thresholds() {
        let d = determine_action(
            &ensemble(Decision::Fail, 1.0, 1.0),
            &EscalationPolicyConfig::default(),
        );
        assert_eq!(d.action, EscalationAction::AutoFail);
        assert_eq!(d.reason, "consensus decision is fail");
        assert_eq!(d.dissenting_judges.len(), 1);
    }

    #[test]
    fn test_uncertain_verdict_meeting_floors_auto_passes() {
        let d = determine_action(
            &ensemble(Decision::Uncertain, 0.70, 0.85),
            &EscalationPolicyConfig::default(),
        );
        assert_eq!(d.action, EscalationAction::AutoPass);
        assert_eq!(d.reason, "agreement and confidence meet policy");
    }

    #[test]
    fn test_missing_ratio_escalates() {
        let c = EnsembleConsensus {
            decision: Decision::Pass,
            agreement_ratio: None,
            confidence: Some(0.95),
            dissenting_judges: vec![],
        };
        let d = determine_action(&c, &EscalationPolicyConfig::default());
        assert_eq!(d.action, EscalationAction::Escalate);
        assert!(d.reason.contains("agreement ratio missing"));
    }

    #[test]
    fn test_from_signal_maps_llm_flag() {
        let s = ValidationSignal {
            llm_passed: Some(false),
            ..Default::default()
        };
        assert_eq!(EnsembleConsensus::from_signal(&s).decision, Decision::Fail);
    }
}
