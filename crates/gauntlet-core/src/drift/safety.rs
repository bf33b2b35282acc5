use super::{bracket_severity, Draft};
use crate::model::{Finding, Severity};
use crate::scoring::safety_score;
use serde_json::json;

/// Safety drift: normalized safety-score delta plus one finding per severity
/// level whose count changed.
pub(super) fn detect(current: &[Finding], baseline: &[Finding]) -> Vec<Draft> {
    let mut drafts = Vec::new();

    let current_score = safety_score(current);
    let baseline_score = safety_score(baseline);
    let score_delta = (current_score - baseline_score).abs() / 100.0;
    if let Some(severity) = bracket_severity(score_delta) {
        drafts.push(Draft {
            metric: "safety_score_delta".to_string(),
            value: score_delta,
            severity,
            confidence: Some(0.9),
            details: json!({
                "current_safety_score": current_score,
                "baseline_safety_score": baseline_score,
            }),
        });
    }

    for level in Severity::ALL {
        let current_count = count(current, level);
        let baseline_count = count(baseline, level);
        let delta = current_count as i64 - baseline_count as i64;
        if delta == 0 {
            continue;
        }
        let value = delta.unsigned_abs() as f64 / (baseline_count.max(1)) as f64;
        if let Some(severity) = bracket_severity(value) {
            drafts.push(Draft {
                metric: format!("severity_count_delta_{}", level.as_str()),
                value,
                severity,
                confidence: Some(0.9),
                details: json!({
                    "level": level.as_str(),
                    "current_count": current_count,
                    "baseline_count": baseline_count,
                    "delta": delta,
                }),
            });
        }
    }

    drafts
}

fn count(findings: &[Finding], level: Severity) -> u64 {
    findings.iter().filter(|f| f.severity == level).count() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn finding(severity: Severity) -> Finding {
        Finding {
            id: 0,
            execution_id: 1,
            library: "garak".into(),
            test_category: "jailbreak".into(),
            severity,
            risk_type: "jailbreak".into(),
            evidence_prompt: None,
            evidence_response: None,
            confidence: None,
            metadata: json!({}),
        }
    }

    #[test]
    fn identical_sides_are_silent() {
        let side = vec![finding(Severity::High), finding(Severity::Low)];
        assert!(detect(&side, &side).is_empty());
    }

    #[test]
    fn empty_vs_empty_is_silent() {
        assert!(detect(&[], &[]).is_empty());
    }

    #[test]
    fn new_criticals_move_score_and_counts() {
        let baseline: Vec<Finding> = Vec::new();
        let current = vec![finding(Severity::Critical), finding(Severity::Critical)];
        // Score drops 40 points: delta 0.40 -> high.
        let drafts = detect(&current, &baseline);
        let score = drafts
            .iter()
            .find(|d| d.metric == "safety_score_delta")
            .unwrap();
        assert!((score.value - 0.40).abs() < 1e-9);
        assert_eq!(score.severity, Severity::High);

        let counts = drafts
            .iter()
            .find(|d| d.metric == "severity_count_delta_critical")
            .unwrap();
        // |2 - 0| / max(1, 0) = 2.0 -> critical bracket.
        assert!((counts.value - 2.0).abs() < 1e-9);
        assert_eq!(counts.severity, Severity::Critical);
    }

    #[test]
    fn small_count_shift_below_floor_is_omitted() {
        let baseline: Vec<Finding> = (0..20).map(|_| finding(Severity::Low)).collect();
        let mut current = baseline.clone();
        current.push(finding(Severity::Low));
        // Count delta 1/20 = 0.05 < 0.10 and score delta 2/100 = 0.02.
        assert!(detect(&current, &baseline).is_empty());
    }
}
