use super::stats::psi;
use super::{psi_severity, Draft};
use crate::config::Settings;
use crate::model::{Finding, Severity};
use serde_json::json;

/// Distribution drift: Population Stability Index over the five severity
/// buckets.
pub(super) fn detect(current: &[Finding], baseline: &[Finding], settings: &Settings) -> Vec<Draft> {
    if current.is_empty() || baseline.is_empty() {
        return Vec::new();
    }

    let current_counts = bucket_counts(current);
    let baseline_counts = bucket_counts(baseline);
    let value = psi(&current_counts, &baseline_counts, settings.psi_epsilon);

    let Some(severity) = psi_severity(value) else {
        return Vec::new();
    };
    vec![Draft {
        metric: "severity_psi".to_string(),
        value,
        severity,
        confidence: Some(0.8),
        details: json!({
            "current_severity_dist": dist_map(&current_counts),
            "baseline_severity_dist": dist_map(&baseline_counts),
        }),
    }]
}

fn bucket_counts(findings: &[Finding]) -> [u64; 5] {
    let mut counts = [0u64; 5];
    for f in findings {
        let idx = Severity::ALL
            .iter()
            .position(|s| *s == f.severity)
            .unwrap_or(4);
        counts[idx] += 1;
    }
    counts
}

fn dist_map(counts: &[u64; 5]) -> serde_json::Value {
    let mut map = serde_json::Map::new();
    for (severity, count) in Severity::ALL.iter().zip(counts) {
        map.insert(severity.as_str().to_string(), json!(count));
    }
    serde_json::Value::Object(map)
}
