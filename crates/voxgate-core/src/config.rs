use crate::errors::ConfigError;
use crate::thresholds::{EscalationPolicyConfig, MetricRule, ReviewThresholds};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::path::{Path, PathBuf};

pub const SUPPORTED_CONFIG_VERSION: u32 = 1;
pub const MIN_PRIORITY: u8 = 1;
pub const MAX_PRIORITY: u8 = 10;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EngineConfig {
    #[serde(default = "default_version", rename = "configVersion", alias = "version")]
    pub version: u32,
    #[serde(default)]
    pub review: ReviewThresholds,
    #[serde(default)]
    pub escalation: EscalationPolicyConfig,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub regression: RegressionSettings,
    #[serde(default)]
    pub defects: DefectSettings,
    #[serde(default)]
    pub jobs: JobSettings,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: SUPPORTED_CONFIG_VERSION,
            review: ReviewThresholds::default(),
            escalation: EscalationPolicyConfig::default(),
            queue: QueueSettings::default(),
            regression: RegressionSettings::default(),
            defects: DefectSettings::default(),
            jobs: JobSettings::default(),
        }
    }
}

fn default_version() -> u32 {
    SUPPORTED_CONFIG_VERSION
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QueueSettings {
    #[serde(default = "default_priority")]
    pub default_priority: u8,
    /// Locales every reviewer can handle; anything else needs a native speaker.
    #[serde(default = "default_base_locales")]
    pub base_locales: Vec<String>,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            default_priority: default_priority(),
            base_locales: default_base_locales(),
        }
    }
}

fn default_priority() -> u8 {
    5
}

fn default_base_locales() -> Vec<String> {
    vec!["en-US".to_string()]
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RegressionSettings {
    #[serde(default = "default_metric_rules")]
    pub metrics: BTreeMap<String, MetricRule>,
}

impl Default for RegressionSettings {
    fn default() -> Self {
        Self {
            metrics: default_metric_rules(),
        }
    }
}

fn default_metric_rules() -> BTreeMap<String, MetricRule> {
    let mut m = BTreeMap::new();
    m.insert("pass_rate".to_string(), MetricRule::higher_is_better(0.05));
    m.insert(
        "response_time_ms".to_string(),
        MetricRule::lower_is_better(0.20),
    );
    m
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DefectSettings {
    #[serde(default = "default_auto_creation_threshold")]
    pub auto_creation_threshold: u32,
    #[serde(default = "default_title_similarity")]
    pub title_similarity: f64,
    #[serde(default = "default_latency_threshold")]
    pub latency_threshold_seconds: f64,
    #[serde(default = "default_command_match_floor")]
    pub command_match_floor: f64,
}

impl Default for DefectSettings {
    fn default() -> Self {
        Self {
            auto_creation_threshold: default_auto_creation_threshold(),
            title_similarity: default_title_similarity(),
            latency_threshold_seconds: default_latency_threshold(),
            command_match_floor: default_command_match_floor(),
        }
    }
}

fn default_auto_creation_threshold() -> u32 {
    3
}

fn default_title_similarity() -> f64 {
    0.85
}

fn default_latency_threshold() -> f64 {
    3.0
}

fn default_command_match_floor() -> f64 {
    0.5
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobSettings {
    #[serde(default = "default_workers")]
    pub workers: usize,
    #[serde(default = "default_interval")]
    pub interval_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
}

impl Default for JobSettings {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            interval_seconds: default_interval(),
            max_retries: default_max_retries(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_interval() -> u64 {
    300
}

fn default_max_retries() -> u32 {
    2
}

impl EngineConfig {
    /// Rejects settings the engine cannot act on. Runs at load time so a bad
    /// threshold never surfaces deep inside a detection run.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.version != SUPPORTED_CONFIG_VERSION {
            return Err(ConfigError(format!(
                "unsupported config version {} (supported: {})",
                self.version, SUPPORTED_CONFIG_VERSION
            )));
        }

        let r = &self.review;
        check_unit("review.auto_pass_threshold", r.auto_pass_threshold)?;
        check_unit("review.auto_fail_threshold", r.auto_fail_threshold)?;
        if r.auto_fail_threshold >= r.auto_pass_threshold {
            return Err(ConfigError(format!(
                "review.auto_fail_threshold ({}) must be below review.auto_pass_threshold ({})",
                r.auto_fail_threshold, r.auto_pass_threshold
            )));
        }

        check_unit("escalation.min_agreement_ratio", self.escalation.min_agreement_ratio)?;
        check_unit("escalation.min_confidence", self.escalation.min_confidence)?;

        let p = self.queue.default_priority;
        if !(MIN_PRIORITY..=MAX_PRIORITY).contains(&p) {
            return Err(ConfigError(format!(
                "queue.default_priority {} outside {}..={}",
                p, MIN_PRIORITY, MAX_PRIORITY
            )));
        }

        for (name, rule) in &self.regression.metrics {
            if !(rule.relative_tolerance.is_finite() && rule.relative_tolerance > 0.0) {
                return Err(ConfigError(format!(
                    "regression.metrics.{}.relative_tolerance must be a positive number (got {})",
                    name, rule.relative_tolerance
                )));
            }
        }

        let d = &self.defects;
        if d.auto_creation_threshold < 1 {
            return Err(ConfigError(
                "defects.auto_creation_threshold must be at least 1".into(),
            ));
        }
        check_unit("defects.title_similarity", d.title_similarity)?;
        check_positive(
            "defects.latency_threshold_seconds",
            d.latency_threshold_seconds,
        )?;
        check_unit("defects.command_match_floor", d.command_match_floor)?;

        if self.jobs.workers == 0 {
            return Err(ConfigError("jobs.workers must be at least 1".into()));
        }
        if self.jobs.interval_seconds == 0 {
            return Err(ConfigError("jobs.interval_seconds must be at least 1".into()));
        }

        Ok(())
    }

    /// `sha256:` digest of the canonical JSON form, stamped on regression runs.
    pub fn fingerprint(&self) -> String {
        let canonical = serde_json::to_string(self).unwrap_or_default();
        format!("sha256:{}", crate::fingerprint::sha256_hex(&canonical))
    }
}

fn check_unit(name: &str, v: f64) -> Result<(), ConfigError> {
    if !(v > 0.0 && v <= 1.0) {
        return Err(ConfigError(format!(
            "{} must be in (0, 1] (got {})",
            name, v
        )));
    }
    Ok(())
}

fn check_positive(name: &str, v: f64) -> Result<(), ConfigError> {
    if !(v.is_finite() && v > 0.0) {
        return Err(ConfigError(format!("{} must be positive (got {})", name, v)));
    }
    Ok(())
}

pub fn load_config(path: &Path, strict: bool) -> Result<EngineConfig, ConfigError> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| ConfigError(format!("failed to read config {}: {}", path.display(), e)))?;
    parse_config(&raw, strict)
        .map_err(|e| ConfigError(format!("{} (file: {})", e.0, path.display())))
}

pub fn parse_config(raw: &str, strict: bool) -> Result<EngineConfig, ConfigError> {
    if raw.trim().is_empty() {
        let cfg = EngineConfig::default();
        cfg.validate()?;
        return Ok(cfg);
    }

    let mut ignored_keys = HashSet::new();
    let deserializer = serde_yaml::Deserializer::from_str(raw);
    let cfg: EngineConfig = serde_ignored::deserialize(deserializer, |path| {
        ignored_keys.insert(path.to_string());
    })
    .map_err(|e| ConfigError(format!("failed to parse YAML: {}", e)))?;

    let mut unknown: Vec<_> = ignored_keys
        .into_iter()
        .filter(|k| !k.starts_with('_') && !k.starts_with("x-"))
        .collect();
    unknown.sort();

    if !unknown.is_empty() {
        if strict {
            return Err(ConfigError(format!(
                "unknown fields detected in strict mode: {:?}",
                unknown
            )));
        }
        tracing::warn!(
            event = "voxgate.config.unknown_fields",
            fields = ?unknown,
            "ignored unknown config fields"
        );
    }

    cfg.validate()?;
    Ok(cfg)
}

/// Process-level settings read from the environment.
#[derive(Debug, Clone)]
pub struct EnvOverrides {
    pub db_path: Option<PathBuf>,
    pub log_level: Option<String>,
}

impl EnvOverrides {
    pub fn from_env() -> Self {
        Self {
            db_path: std::env::var("VOXGATE_DB").ok().map(PathBuf::from),
            log_level: std::env::var("VOXGATE_LOG").ok(),
        }
    }
}

pub const SAMPLE_CONFIG: &str = r#"configVersion: 1
review:
  auto_pass_threshold: 0.75
  auto_fail_threshold: 0.40
escalation:
  min_agreement_ratio: 0.66
  min_confidence: 0.80
queue:
  default_priority: 5
  base_locales: ["en-US"]
regression:
  metrics:
    pass_rate:
      direction: higher_is_better
      relative_tolerance: 0.05
    response_time_ms:
      direction: lower_is_better
      relative_tolerance: 0.20
defects:
  auto_creation_threshold: 3
jobs:
  workers: 4
  interval_seconds: 300
"#;

pub fn write_sample_config(path: &Path) -> Result<(), ConfigError> {
    std::fs::write(path, SAMPLE_CONFIG)
        .map_err(|e| ConfigError(format!("failed to write sample config: {}", e)))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::thresholds::MetricDirection;

    #[test]
    fn test_sample_config_round_trips_to_defaults() {
        let cfg = parse_config(SAMPLE_CONFIG, true).unwrap();
        assert_eq!(cfg, EngineConfig::default());
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse_config("", true).unwrap();
        assert_eq!(cfg.defects.auto_creation_threshold, 3);
        assert_eq!(cfg.escalation.min_agreement_ratio, 0.66);
    }

    #[test]
    fn test_rejects_zero_auto_creation_threshold() {
        let err = parse_config("defects:\n  auto_creation_threshold: 0\n", false).unwrap_err();
        assert!(err.0.contains("auto_creation_threshold"));
    }

    #[test]
    fn test_rejects_unknown_direction() {
        let raw = r#"
regression:
  metrics:
    pass_rate:
      direction: sideways
      relative_tolerance: 0.1
"#;
        let err = parse_config(raw, false).unwrap_err();
        assert!(err.0.contains("failed to parse YAML"));
    }

    #[test]
    fn test_rejects_non_positive_tolerance() {
        for tol in ["0", "-0.1"] {
            let raw = format!(
                "regression:\n  metrics:\n    wer:\n      direction: lower_is_better\n      relative_tolerance: {}\n",
                tol
            );
            let err = parse_config(&raw, false).unwrap_err();
            assert!(err.0.contains("regression.metrics.wer.relative_tolerance"), "{}", err.0);
        }
    }

    #[test]
    fn test_rejects_non_positive_agreement() {
        let err = parse_config("escalation:\n  min_agreement_ratio: 0\n", false).unwrap_err();
        assert!(err.0.contains("min_agreement_ratio"));
    }

    #[test]
    fn test_rejects_inverted_review_cutoffs() {
        let raw = "review:\n  auto_pass_threshold: 0.4\n  auto_fail_threshold: 0.6\n";
        assert!(parse_config(raw, false).is_err());
    }

    #[test]
    fn test_strict_mode_rejects_unknown_keys() {
        let raw = "escalation:\n  min_confidense: 0.9\n";
        let err = parse_config(raw, true).unwrap_err();
        assert!(err.0.contains("escalation.min_confidense"));

        // lenient mode keeps going with defaults
        let cfg = parse_config(raw, false).unwrap();
        assert_eq!(cfg.escalation.min_confidence, 0.80);
    }

    #[test]
    fn test_custom_metric_rule() {
        let raw = r#"
regression:
  metrics:
    wer:
      direction: lower_is_better
      relative_tolerance: 0.1
"#;
        let cfg = parse_config(raw, true).unwrap();
        let rule = cfg.regression.metrics.get("wer").unwrap();
        assert_eq!(rule.direction, MetricDirection::LowerIsBetter);
        // an explicit map replaces the defaults
        assert!(!cfg.regression.metrics.contains_key("pass_rate"));
    }

    #[test]
    fn test_fingerprint_tracks_content() {
        let a = EngineConfig::default();
        let mut b = EngineConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.escalation.min_confidence = 0.9;
        assert_ne!(a.fingerprint(), b.fingerprint());
        assert!(a.fingerprint().starts_with("sha256:"));
    }
}
