use super::stats::{ks_statistic, mean_entropy};
use super::{bracket_severity, Draft};
use crate::config::Settings;
use crate::model::Finding;
use serde_json::json;

/// Output drift: response length distribution (two-sample KS) and mean
/// per-response Shannon entropy delta.
pub(super) fn detect(current: &[Finding], baseline: &[Finding], settings: &Settings) -> Vec<Draft> {
    let current_responses: Vec<&str> = responses(current);
    let baseline_responses: Vec<&str> = responses(baseline);
    if current_responses.is_empty() || baseline_responses.is_empty() {
        return Vec::new();
    }

    let mut drafts = Vec::new();

    let current_lengths: Vec<f64> = current_responses
        .iter()
        .map(|r| r.chars().count() as f64)
        .collect();
    let baseline_lengths: Vec<f64> = baseline_responses
        .iter()
        .map(|r| r.chars().count() as f64)
        .collect();
    let d = ks_statistic(&current_lengths, &baseline_lengths);
    if let Some(severity) = bracket_severity(d) {
        drafts.push(Draft {
            metric: "response_length_ks".to_string(),
            value: d,
            severity,
            confidence: Some(d.min(1.0)),
            details: json!({
                "current_samples": current_lengths.len(),
                "baseline_samples": baseline_lengths.len(),
                "current_mean_length": mean(&current_lengths),
                "baseline_mean_length": mean(&baseline_lengths),
            }),
        });
    }

    let current_entropy = mean_entropy(&current_responses);
    let baseline_entropy = mean_entropy(&baseline_responses);
    let entropy_delta =
        (current_entropy - baseline_entropy).abs() / baseline_entropy.max(settings.entropy_epsilon);
    if let Some(severity) = bracket_severity(entropy_delta) {
        drafts.push(Draft {
            metric: "response_entropy_delta".to_string(),
            value: entropy_delta,
            severity,
            confidence: Some(0.7),
            details: json!({
                "current_entropy": current_entropy,
                "baseline_entropy": baseline_entropy,
            }),
        });
    }

    drafts
}

fn responses(findings: &[Finding]) -> Vec<&str> {
    findings
        .iter()
        .filter_map(|f| f.evidence_response.as_deref())
        .filter(|r| !r.is_empty())
        .collect()
}

fn mean(xs: &[f64]) -> f64 {
    if xs.is_empty() {
        0.0
    } else {
        xs.iter().sum::<f64>() / xs.len() as f64
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Severity;
    use serde_json::json;

    fn finding(response: &str) -> Finding {
        Finding {
            id: 0,
            execution_id: 1,
            library: "garak".into(),
            test_category: "jailbreak".into(),
            severity: Severity::Low,
            risk_type: "jailbreak".into(),
            evidence_prompt: None,
            evidence_response: Some(response.to_string()),
            confidence: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn disjoint_length_distributions_are_critical() {
        let baseline: Vec<Finding> = (0..20).map(|_| finding(&"x".repeat(100))).collect();
        let current: Vec<Finding> = (0..20).map(|_| finding(&"x".repeat(500))).collect();
        let drafts = detect(&current, &baseline, &Settings::default());
        let ks = drafts
            .iter()
            .find(|d| d.metric == "response_length_ks")
            .unwrap();
        assert!((ks.value - 1.0).abs() < 1e-12);
        assert_eq!(ks.severity, Severity::Critical);
    }

    #[test]
    fn identical_sides_emit_nothing() {
        let side: Vec<Finding> = (0..10).map(|i| finding(&"ab".repeat(i + 1))).collect();
        assert!(detect(&side, &side, &Settings::default()).is_empty());
    }

    #[test]
    fn empty_sides_emit_nothing() {
        let side = vec![finding("hello")];
        assert!(detect(&[], &side, &Settings::default()).is_empty());
        assert!(detect(&side, &[], &Settings::default()).is_empty());
    }

    #[test]
    fn entropy_collapse_is_flagged() {
        // Baseline is varied text, current collapses to one repeated char.
        let baseline: Vec<Finding> = (0..10)
            .map(|i| finding(&format!("the quick brown fox {i} jumps")))
            .collect();
        let current: Vec<Finding> = (0..10).map(|_| finding(&"a".repeat(27))).collect();
        let drafts = detect(&current, &baseline, &Settings::default());
        assert!(drafts
            .iter()
            .any(|d| d.metric == "response_entropy_delta" && d.value > 0.45));
    }
}
