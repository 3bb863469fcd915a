use voxgate_core::baseline::{BaselineManager, BaselineStatus};
use voxgate_core::config::EngineConfig;
use voxgate_core::model::{ResultStatus, ScriptResult, ScriptSnapshot};
use voxgate_core::regression::{RegressionFinding, RegressionService, ScriptRegressionOutcome};
use voxgate_core::storage::Store;
use std::sync::{Arc, Barrier};
use tempfile::tempdir;

fn store() -> anyhow::Result<Store> {
    let store = Store::memory()?;
    store.init_schema()?;
    Ok(store)
}

fn snapshot(status: ResultStatus, pass_rate: f64, response_ms: f64) -> ScriptSnapshot {
    ScriptResult::new("s1", status)
        .with_metric("pass_rate", pass_rate)
        .with_metric("response_time_ms", response_ms)
        .snapshot
}

#[test]
fn test_approvals_version_and_archive() -> anyhow::Result<()> {
    let mgr = BaselineManager::new(store()?);

    let v1 = mgr.approve("s1", &snapshot(ResultStatus::Passed, 0.95, 120.0), "alice", None)?;
    assert_eq!(v1.version, 1);
    assert_eq!(v1.status, BaselineStatus::Active);
    assert!(mgr.history("s1")?.is_empty());

    let v2 = mgr.approve(
        "s1",
        &snapshot(ResultStatus::Passed, 0.97, 110.0),
        "bob",
        Some("new asr model"),
    )?;
    assert_eq!(v2.version, 2);

    let history = mgr.history("s1")?;
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].version, 1);
    assert_eq!(history[0].status, BaselineStatus::Superseded);
    assert_eq!(history[0].approved_by, "alice");
    assert_eq!(history[0].snapshot_digest, v1.snapshot_digest);

    let v3 = mgr.approve("s1", &snapshot(ResultStatus::Passed, 0.99, 100.0), "carol", None)?;
    assert_eq!(v3.version, 3);

    // archived v1 is untouched by later approvals
    let history = mgr.history("s1")?;
    assert_eq!(
        history.iter().map(|h| h.version).collect::<Vec<_>>(),
        vec![1, 2]
    );
    assert_eq!(history[0].approved_by, "alice");
    assert_eq!(history[0].snapshot.metrics["pass_rate"], 0.95);

    let current = mgr.get("s1")?;
    assert_eq!(current.version, 3);
    assert_eq!(current.approved_by, "carol");
    assert_eq!(mgr.get_version("s1", 2)?.approved_by, "bob");
    assert!(mgr.get_version("s1", 7).unwrap_err().is_not_found());
    assert!(mgr.get("unknown").unwrap_err().is_not_found());
    Ok(())
}

#[test]
fn test_approve_latest_uses_recorded_execution() -> anyhow::Result<()> {
    let store = store()?;
    let mgr = BaselineManager::new(store.clone());
    assert!(mgr.approve_latest("s1", "alice", None).unwrap_err().is_not_found());

    store.record_script_result(
        "exec-1",
        &ScriptResult::new("s1", ResultStatus::Passed).with_metric("pass_rate", 0.9),
    )?;
    store.record_script_result(
        "exec-2",
        &ScriptResult::new("s1", ResultStatus::Passed).with_metric("pass_rate", 0.93),
    )?;

    let b = mgr.approve_latest("s1", "alice", Some("nightly"))?;
    assert_eq!(b.version, 1);
    assert_eq!(b.snapshot.metrics["pass_rate"], 0.93);
    assert_eq!(b.note.as_deref(), Some("nightly"));
    Ok(())
}

#[test]
fn test_regression_run_persists_and_replaces() -> anyhow::Result<()> {
    let store = store()?;
    let cfg = EngineConfig::default();
    let svc = RegressionService::new(store.clone(), cfg.regression.metrics.clone(), cfg.fingerprint());

    // nothing approved yet is an outcome, not an error
    assert!(matches!(
        svc.run_for_script("s1")?,
        ScriptRegressionOutcome::NoBaseline { .. }
    ));

    BaselineManager::new(store.clone()).approve(
        "s1",
        &snapshot(ResultStatus::Passed, 0.95, 120.0),
        "alice",
        None,
    )?;
    assert!(matches!(
        svc.run_for_script("s1")?,
        ScriptRegressionOutcome::NoResults { .. }
    ));

    store.record_script_result(
        "exec-bad",
        &ScriptResult {
            script_id: "s1".into(),
            snapshot: snapshot(ResultStatus::Failed, 0.85, 156.0),
        },
    )?;
    let outcome = svc.run_for_script("s1")?;
    assert_eq!(outcome.regressions(), 3);

    // re-running converges on the same stored set
    svc.run_for_script("s1")?;
    let stored = store.list_regressions(Some("s1"))?;
    assert_eq!(stored.len(), 3);
    assert!(stored
        .iter()
        .any(|r| matches!(r.finding, RegressionFinding::Status { .. })));

    store.record_script_result(
        "exec-good",
        &ScriptResult {
            script_id: "s1".into(),
            snapshot: snapshot(ResultStatus::Passed, 0.96, 118.0),
        },
    )?;
    let outcome = svc.run_for_script("s1")?;
    assert_eq!(outcome.regressions(), 0);
    assert!(store.list_regressions(Some("s1"))?.is_empty());
    Ok(())
}

#[test]
fn test_run_all_covers_each_baselined_script() -> anyhow::Result<()> {
    let store = store()?;
    let cfg = EngineConfig::default();
    let mgr = BaselineManager::new(store.clone());
    for id in ["a", "b"] {
        mgr.approve(
            id,
            &ScriptSnapshot {
                status: ResultStatus::Passed,
                metrics: Default::default(),
            },
            "qa",
            None,
        )?;
    }
    store.record_script_result("e1", &ScriptResult::new("a", ResultStatus::Failed))?;

    let svc = RegressionService::new(store, cfg.regression.metrics.clone(), cfg.fingerprint());
    let outcomes = svc.run_all()?;
    assert_eq!(outcomes.len(), 2);
    assert_eq!(outcomes.iter().map(|o| o.regressions()).sum::<usize>(), 1);
    Ok(())
}

#[test]
fn test_concurrent_approvals_serialize() -> anyhow::Result<()> {
    let dir = tempdir()?;
    let db_path = dir.path().join("baselines.db");
    let setup = Store::open(&db_path)?;
    setup.init_schema()?;
    BaselineManager::new(setup).approve("s1", &snapshot(ResultStatus::Passed, 0.9, 100.0), "seed", None)?;

    let approvers = 6;
    let barrier = Arc::new(Barrier::new(approvers));
    let mut handles = Vec::new();
    for i in 0..approvers {
        let barrier = barrier.clone();
        let path = db_path.clone();
        handles.push(std::thread::spawn(move || -> anyhow::Result<u32> {
            let mgr = BaselineManager::new(Store::open(&path)?);
            let snap = snapshot(ResultStatus::Passed, 0.9 + i as f64 / 100.0, 100.0);
            barrier.wait();
            Ok(mgr.approve("s1", &snap, &format!("qa-{}", i), None)?.version)
        }));
    }

    let mut versions = Vec::new();
    for h in handles {
        versions.push(h.join().expect("thread panicked")?);
    }
    versions.sort_unstable();
    assert_eq!(versions, (2..=approvers as u32 + 1).collect::<Vec<_>>());

    let mgr = BaselineManager::new(Store::open(&db_path)?);
    assert_eq!(mgr.get("s1")?.version, approvers as u32 + 1);
    let history: Vec<u32> = mgr.history("s1")?.iter().map(|h| h.version).collect();
    assert_eq!(history, (1..=approvers as u32).collect::<Vec<_>>());
    Ok(())
}
