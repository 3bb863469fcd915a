use assert_cmd::Command;
use predicates::str::contains;
use std::fs;
use std::path::Path;
use tempfile::TempDir;

fn voxgate(dir: &Path) -> Command {
    let mut cmd = Command::cargo_bin("voxgate").unwrap();
    cmd.current_dir(dir)
        .env_remove("VOXGATE_DB")
        .env_remove("VOXGATE_LOG")
        .arg("--db")
        .arg(dir.join("state.db"));
    cmd
}

fn stdout_json(cmd: &mut Command) -> serde_json::Value {
    let out = cmd.output().unwrap();
    assert!(out.status.success(), "stderr: {}", String::from_utf8_lossy(&out.stderr));
    serde_json::from_slice(&out.stdout).unwrap()
}

#[test]
fn test_version() {
    let dir = TempDir::new().unwrap();
    voxgate(dir.path())
        .arg("version")
        .assert()
        .success()
        .stdout(contains("voxgate "));
}

#[test]
fn test_init_then_config_check() {
    let dir = TempDir::new().unwrap();
    voxgate(dir.path()).arg("init").assert().success();
    assert!(dir.path().join("voxgate.yaml").exists());
    assert!(dir.path().join("state.db").exists());

    voxgate(dir.path())
        .args(["--strict", "config", "check"])
        .assert()
        .success()
        .stderr(contains("config ok (sha256:"));

    voxgate(dir.path())
        .arg("init")
        .assert()
        .code(2)
        .stderr(contains("already exists"));
}

#[test]
fn test_strict_config_rejects_unknown_keys() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("voxgate.yaml"),
        "configVersion: 1\nreview:\n  auto_pass_threshold: 0.8\n  auto_pas_threshold: 0.9\n",
    )
    .unwrap();

    voxgate(dir.path())
        .args(["--strict", "config", "check"])
        .assert()
        .code(2)
        .stderr(contains("unknown fields"));

    // lenient mode only warns
    voxgate(dir.path()).args(["config", "check"]).assert().success();
}

#[test]
fn test_invalid_thresholds_fail_config_check() {
    let dir = TempDir::new().unwrap();
    fs::write(
        dir.path().join("voxgate.yaml"),
        "review:\n  auto_pass_threshold: 0.3\n  auto_fail_threshold: 0.5\n",
    )
    .unwrap();
    voxgate(dir.path()).args(["config", "check"]).assert().code(2);
}

#[test]
fn test_baseline_and_regression_gate() {
    let dir = TempDir::new().unwrap();
    let good = dir.path().join("good.jsonl");
    fs::write(
        &good,
        r#"{"kind":"script_result","execution_id":"e1","script_id":"weather","status":"passed","metrics":{"pass_rate":0.95,"response_time_ms":120}}
"#,
    )
    .unwrap();
    voxgate(dir.path())
        .args(["ingest", "--input"])
        .arg(&good)
        .assert()
        .success()
        .stdout(contains("\"script_results\": 1"));

    voxgate(dir.path())
        .args(["baseline", "approve", "weather", "--by", "qa-lead"])
        .assert()
        .success()
        .stderr(contains("Approved weather v1"));

    voxgate(dir.path()).arg("regress").assert().success().stdout(contains("weather: ok"));

    let bad = dir.path().join("bad.jsonl");
    fs::write(
        &bad,
        r#"{"kind":"script_result","execution_id":"e2","script_id":"weather","status":"failed","metrics":{"pass_rate":0.80,"response_time_ms":125}}
"#,
    )
    .unwrap();
    voxgate(dir.path()).args(["ingest", "--input"]).arg(&bad).assert().success();

    voxgate(dir.path())
        .arg("regress")
        .assert()
        .code(1)
        .stdout(contains("status passed -> failed"))
        .stdout(contains("pass_rate"));

    let out = voxgate(dir.path())
        .args(["regress", "--script", "weather", "--format", "json"])
        .output()
        .unwrap();
    assert_eq!(out.status.code(), Some(1));
    let v: serde_json::Value = serde_json::from_slice(&out.stdout).unwrap();
    assert_eq!(v[0]["report"]["summary"]["total_regressions"], 2);

    voxgate(dir.path())
        .args(["baseline", "approve", "weather", "--by", "qa-lead", "--note", "accept"])
        .assert()
        .success();
    let history = stdout_json(voxgate(dir.path()).args(["baseline", "history", "weather"]));
    assert_eq!(history.as_array().unwrap().len(), 1);
    assert_eq!(history[0]["version"], 1);
}

#[test]
fn test_escalated_step_review_cycle() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("steps.jsonl");
    fs::write(
        &input,
        concat!(
            r#"{"kind":"step","tenant_id":"t1","execution":{"script_id":"s1","test_case_id":"tc1"},"utterance":"play jazz","signal":{"confidence":0.6,"llm_passed":true,"agreement_ratio":0.5}}"#,
            "\n",
            r#"{"kind":"step","tenant_id":"t1","execution":{"script_id":"s1","test_case_id":"tc1"},"signal":{"deterministic_passed":true,"llm_passed":true,"agreement_ratio":1.0,"confidence":0.95}}"#,
            "\n",
        ),
    )
    .unwrap();

    let summary = stdout_json(voxgate(dir.path()).args(["ingest", "--input"]).arg(&input));
    assert_eq!(summary["steps"], 2);
    assert_eq!(summary["escalated"], 1);
    assert_eq!(summary["auto_pass"], 1);

    let next = stdout_json(voxgate(dir.path()).args([
        "queue", "next", "--tenant", "t1", "--validator", "v1",
    ]));
    let id = next["id"].as_str().unwrap().to_string();
    assert_eq!(next["status"], "pending");

    voxgate(dir.path())
        .args(["queue", "claim", &id, "--tenant", "t1", "--validator", "v1"])
        .assert()
        .success();
    voxgate(dir.path())
        .args(["queue", "claim", &id, "--tenant", "t1", "--validator", "v2"])
        .assert()
        .code(1)
        .stderr(contains("not available"));

    voxgate(dir.path())
        .args([
            "queue", "submit", &id, "--tenant", "t1", "--validator", "v1", "--decision", "fail",
            "--time-spent", "20",
        ])
        .assert()
        .success()
        .stdout(contains("\"overrode_automation\": true"));

    let stats = stdout_json(voxgate(dir.path()).args([
        "queue", "stats", "--tenant", "t1", "--validator", "v1",
    ]));
    assert_eq!(stats["completed"], 1);
    assert_eq!(stats["validator"]["override_count"], 1);
}

#[test]
fn test_bad_ingest_line_is_reported() {
    let dir = TempDir::new().unwrap();
    let input = dir.path().join("broken.jsonl");
    fs::write(&input, "{\"kind\":\"mystery\"}\n").unwrap();
    voxgate(dir.path())
        .args(["ingest", "--input"])
        .arg(&input)
        .assert()
        .code(2)
        .stderr(contains("line 1"));
}

#[test]
fn test_serve_once_sweeps_and_exits() {
    let dir = TempDir::new().unwrap();
    let sink = dir.path().join("overrides.jsonl");
    voxgate(dir.path())
        .args(["serve", "--once", "--sink-jsonl"])
        .arg(&sink)
        .assert()
        .success()
        .stdout(contains("analyze_patterns"))
        .stdout(contains("relay_overrides"));
}
