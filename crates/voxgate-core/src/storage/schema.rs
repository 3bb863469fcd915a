pub const SCHEMA_VERSION: i64 = 2;

pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS validation_results (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  execution_id TEXT NOT NULL,
  script_id TEXT NOT NULL,
  test_case_id TEXT NOT NULL,
  step_index INTEGER NOT NULL,
  signal_json TEXT NOT NULL,
  final_decision TEXT NOT NULL,
  confidence REAL,
  review_status TEXT NOT NULL,
  action TEXT NOT NULL,
  reason TEXT NOT NULL,
  category TEXT,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS queue_items (
  id TEXT PRIMARY KEY,
  tenant_id TEXT NOT NULL,
  validation_result_id TEXT,
  script_id TEXT NOT NULL,
  test_case_id TEXT NOT NULL,
  utterance TEXT NOT NULL,
  expected_outcome TEXT NOT NULL,
  automated_label TEXT NOT NULL,
  confidence REAL,
  escalation_reason TEXT NOT NULL,
  dissenting_judges_json TEXT NOT NULL,
  language_code TEXT NOT NULL,
  requires_native_speaker INTEGER NOT NULL DEFAULT 0,
  priority INTEGER NOT NULL CHECK (priority BETWEEN 1 AND 10),
  status TEXT NOT NULL CHECK (status IN ('pending', 'claimed', 'completed')),
  claimed_by TEXT,
  claimed_at TEXT,
  created_at TEXT NOT NULL,
  completed_at TEXT,
  CHECK ((status = 'claimed') = (claimed_by IS NOT NULL) OR status = 'completed')
);

CREATE INDEX IF NOT EXISTS idx_queue_next
  ON queue_items(tenant_id, status, priority, created_at);

CREATE TABLE IF NOT EXISTS human_validations (
  id TEXT PRIMARY KEY,
  queue_id TEXT NOT NULL UNIQUE REFERENCES queue_items(id),
  tenant_id TEXT NOT NULL,
  validator_id TEXT NOT NULL,
  decision TEXT NOT NULL,
  feedback TEXT,
  time_spent_seconds INTEGER NOT NULL,
  overrode_automation INTEGER NOT NULL,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS validator_performance (
  validator_id TEXT NOT NULL,
  tenant_id TEXT NOT NULL,
  total_validations INTEGER NOT NULL DEFAULT 0,
  total_time_seconds INTEGER NOT NULL DEFAULT 0,
  override_count INTEGER NOT NULL DEFAULT 0,
  last_validation_at TEXT,
  PRIMARY KEY (validator_id, tenant_id)
);

CREATE TABLE IF NOT EXISTS override_outbox (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  queue_id TEXT NOT NULL,
  tenant_id TEXT NOT NULL,
  payload_json TEXT NOT NULL,
  created_at TEXT NOT NULL,
  delivered_at TEXT
);

CREATE TABLE IF NOT EXISTS baselines (
  script_id TEXT PRIMARY KEY,
  version INTEGER NOT NULL CHECK (version >= 1),
  status TEXT NOT NULL,
  snapshot_json TEXT NOT NULL,
  snapshot_digest TEXT NOT NULL,
  approved_by TEXT NOT NULL,
  approved_at TEXT NOT NULL,
  note TEXT
);

CREATE TABLE IF NOT EXISTS baseline_history (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  script_id TEXT NOT NULL,
  version INTEGER NOT NULL,
  status TEXT NOT NULL,
  snapshot_json TEXT NOT NULL,
  snapshot_digest TEXT NOT NULL,
  approved_by TEXT NOT NULL,
  approved_at TEXT NOT NULL,
  note TEXT,
  archived_at TEXT NOT NULL,
  UNIQUE (script_id, version)
);

CREATE TABLE IF NOT EXISTS script_results (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  script_id TEXT NOT NULL,
  execution_id TEXT NOT NULL,
  status TEXT NOT NULL,
  metrics_json TEXT NOT NULL,
  recorded_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_script_results_script ON script_results(script_id, id);

CREATE TABLE IF NOT EXISTS regression_runs (
  script_id TEXT PRIMARY KEY,
  baseline_version INTEGER NOT NULL,
  execution_id TEXT NOT NULL,
  config_fingerprint TEXT NOT NULL,
  status_regressions INTEGER NOT NULL,
  metric_regressions INTEGER NOT NULL,
  detected_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS regressions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  script_id TEXT NOT NULL,
  category TEXT NOT NULL,
  metric TEXT,
  detail_json TEXT NOT NULL,
  detected_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_regressions_script ON regressions(script_id);

CREATE TABLE IF NOT EXISTS defects (
  id TEXT PRIMARY KEY,
  script_id TEXT NOT NULL,
  test_case_id TEXT NOT NULL,
  category TEXT NOT NULL,
  severity TEXT NOT NULL,
  title TEXT NOT NULL,
  occurrence_count INTEGER NOT NULL,
  first_detected TEXT NOT NULL,
  last_detected TEXT NOT NULL,
  pattern_key TEXT
);

CREATE TABLE IF NOT EXISTS defect_streaks (
  script_id TEXT PRIMARY KEY,
  consecutive INTEGER NOT NULL DEFAULT 0,
  streak_started_at TEXT,
  updated_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS defect_patterns (
  pattern_key TEXT PRIMARY KEY,
  test_case_id TEXT NOT NULL,
  category TEXT NOT NULL,
  severity TEXT NOT NULL,
  title TEXT NOT NULL,
  occurrence_count INTEGER NOT NULL,
  first_detected TEXT NOT NULL,
  last_detected TEXT NOT NULL,
  linked_defect_id TEXT,
  refreshed_at TEXT NOT NULL
);
"#;
