use crate::model::ScriptSnapshot;
use sha2::{Digest, Sha256};

pub fn sha256_hex(s: &str) -> String {
    let mut h = Sha256::new();
    h.update(s.as_bytes());
    hex::encode(h.finalize())
}

/// Digest of a baseline snapshot.
///
/// Metrics live in a `BTreeMap`, so the JSON form is already key-sorted and the
/// digest is stable across processes.
pub fn snapshot_digest(snapshot: &ScriptSnapshot) -> String {
    let canonical = serde_json::to_string(snapshot).unwrap_or_default();
    format!("sha256:{}", sha256_hex(&canonical))
}

/// Stable identity of a defect pattern: test case, category and normalized title.
pub fn defect_key(test_case_id: &str, category: &str, normalized_title: &str) -> String {
    let raw = [
        format!("test_case={}", test_case_id),
        format!("category={}", category),
        format!("title={}", normalized_title),
    ]
    .join("\n");
    sha256_hex(&raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ResultStatus;
    use std::collections::BTreeMap;

    #[test]
    fn test_snapshot_digest_ignores_insertion_order() {
        let mut a = BTreeMap::new();
        a.insert("pass_rate".to_string(), 0.9);
        a.insert("latency_ms".to_string(), 120.0);
        let mut b = BTreeMap::new();
        b.insert("latency_ms".to_string(), 120.0);
        b.insert("pass_rate".to_string(), 0.9);

        let sa = ScriptSnapshot {
            status: ResultStatus::Passed,
            metrics: a,
        };
        let sb = ScriptSnapshot {
            status: ResultStatus::Passed,
            metrics: b,
        };
        assert_eq!(snapshot_digest(&sa), snapshot_digest(&sb));
    }

    #[test]
    fn test_defect_key_separates_categories() {
        assert_ne!(
            defect_key("tc1", "timing", "slow reply"),
            defect_key("tc1", "audio", "slow reply")
        );
    }
}
