use async_trait::async_trait;
use std::sync::Arc;
use tempfile::tempdir;
use tokio::sync::mpsc;
use voxgate_core::config::QueueSettings;
use voxgate_core::errors::EngineError;
use voxgate_core::feedback::{ChannelSink, FeedbackRelay, JsonlSink, OverrideSample, OverrideSink};
use voxgate_core::model::Decision;
use voxgate_core::queue::{DecisionSubmission, HumanDecision, HumanValidationQueue, NewQueueItem};
use voxgate_core::storage::Store;

struct RejectingSink;

#[async_trait]
impl OverrideSink for RejectingSink {
    fn name(&self) -> &'static str {
        "rejecting"
    }

    async fn deliver(&self, _batch: &[OverrideSample]) -> anyhow::Result<()> {
        anyhow::bail!("collector unavailable")
    }
}

/// Runs `n` reviews where the human overturns an automated pass.
fn store_with_overrides(n: usize) -> anyhow::Result<Store> {
    let store = Store::memory()?;
    store.init_schema()?;
    let q = HumanValidationQueue::new(store.clone(), QueueSettings::default());
    for i in 0..n {
        let item = q.enqueue(NewQueueItem {
            tenant_id: "t1".into(),
            validation_result_id: None,
            script_id: format!("s{}", i),
            test_case_id: "tc".into(),
            utterance: "call mom".into(),
            expected_outcome: "dialing mom".into(),
            automated_label: Decision::Pass,
            confidence: Some(0.7),
            escalation_reason: "agreement ratio 0.50 below required 0.66".into(),
            dissenting_judges: vec![],
            language_code: "en-GB".into(),
            priority: None,
        })?;
        assert!(q.claim(&item.id, "v1", "t1")?.is_claimed());
        q.submit_decision(
            &item.id,
            "v1",
            "t1",
            &DecisionSubmission {
                decision: HumanDecision::Fail,
                feedback: Some("called the wrong contact".into()),
                time_spent_seconds: 30,
            },
        )?;
    }
    Ok(store)
}

#[tokio::test]
async fn test_drain_delivers_once() -> anyhow::Result<()> {
    let store = store_with_overrides(3)?;
    let (tx, mut rx) = mpsc::channel(16);
    let relay = FeedbackRelay::new(store.clone(), Arc::new(ChannelSink::new(tx))).with_batch_size(2);

    assert_eq!(relay.drain().await?, 3);
    let mut got = Vec::new();
    while let Ok(s) = rx.try_recv() {
        got.push(s);
    }
    assert_eq!(got.len(), 3);
    assert_eq!(got[0].automated_label, Decision::Pass);
    assert_eq!(got[0].human_decision, HumanDecision::Fail);
    assert_eq!(got[0].locale, "en-GB");
    assert_eq!(got[0].metadata["validator_id"], "v1");

    assert_eq!(relay.drain().await?, 0);
    assert!(store.pending_overrides(10)?.is_empty());
    Ok(())
}

#[tokio::test]
async fn test_failed_delivery_keeps_samples() -> anyhow::Result<()> {
    let store = store_with_overrides(2)?;
    let relay = FeedbackRelay::new(store.clone(), Arc::new(RejectingSink));

    let err = relay.drain().await.unwrap_err();
    assert!(matches!(err, EngineError::Delivery(_)));
    assert!(err.is_recoverable());
    assert_eq!(store.pending_overrides(10)?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn test_jsonl_sink_appends_lines() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("overrides.jsonl");
    let store = store_with_overrides(2)?;
    let relay = FeedbackRelay::new(store, Arc::new(JsonlSink::new(&path)));

    assert_eq!(relay.drain().await?, 2);
    let raw = std::fs::read_to_string(&path)?;
    let lines = raw
        .lines()
        .map(|l| serde_json::from_str::<OverrideSample>(l))
        .collect::<Result<Vec<_>, _>>()?;
    assert_eq!(lines.len(), 2);
    assert_eq!(lines[1].utterance, "call mom");
    Ok(())
}

#[test]
fn test_matching_decision_writes_no_sample() -> anyhow::Result<()> {
    let store = Store::memory()?;
    store.init_schema()?;
    let q = HumanValidationQueue::new(store.clone(), QueueSettings::default());
    let item = q.enqueue(NewQueueItem {
        tenant_id: "t1".into(),
        validation_result_id: None,
        script_id: "s1".into(),
        test_case_id: "tc".into(),
        utterance: "stop".into(),
        expected_outcome: "stopped".into(),
        automated_label: Decision::Fail,
        confidence: Some(0.5),
        escalation_reason: "confidence 0.50 inside review band".into(),
        dissenting_judges: vec![],
        language_code: "en-US".into(),
        priority: None,
    })?;
    q.claim(&item.id, "v1", "t1")?;
    let hv = q.submit_decision(
        &item.id,
        "v1",
        "t1",
        &DecisionSubmission {
            decision: HumanDecision::Fail,
            feedback: None,
            time_spent_seconds: 3,
        },
    )?;
    assert!(!hv.overrode_automation);
    assert!(store.pending_overrides(10)?.is_empty());
    Ok(())
}
