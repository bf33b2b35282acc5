use super::stats::{
    bigram_jaccard_distance, max_consecutive_runs, sequence_bigrams, tool_frequency_chi2,
};
use super::{bracket_severity, Draft};
use crate::config::Settings;
use crate::model::{AgentTrace, Severity};
use crate::trace::tool_sequence;
use serde_json::json;
use std::collections::HashMap;

const LOOP_RUN_THRESHOLD: u64 = 3;

/// Agent/tool drift: tool-frequency chi-square, tool-sequence bigram Jaccard,
/// newly introduced tools and repeat-loop detection. Emitted only when both
/// sides carry at least one trace.
pub(super) fn detect(
    current: &[AgentTrace],
    baseline: &[AgentTrace],
    settings: &Settings,
) -> Vec<Draft> {
    if current.is_empty() || baseline.is_empty() {
        return Vec::new();
    }
    let threshold = settings.drift_thresholds.agent_tool;

    let current_sequences: Vec<Vec<&str>> = current.iter().map(tool_sequence).collect();
    let baseline_sequences: Vec<Vec<&str>> = baseline.iter().map(tool_sequence).collect();
    let current_hist = histogram(&current_sequences);
    let baseline_hist = histogram(&baseline_sequences);

    let mut drafts = Vec::new();

    let (chi2, normalized) = tool_frequency_chi2(&current_hist, &baseline_hist);
    if let Some(severity) = floored(normalized, threshold) {
        drafts.push(Draft {
            metric: "tool_frequency_chi2".to_string(),
            value: normalized,
            severity,
            confidence: Some(normalized.min(1.0)),
            details: json!({
                "chi2_statistic": chi2,
                "current_tool_counts": current_hist,
                "baseline_tool_counts": baseline_hist,
            }),
        });
    }

    let current_bigrams = sequence_bigrams(&current_sequences);
    let baseline_bigrams = sequence_bigrams(&baseline_sequences);
    if let Some(distance) = bigram_jaccard_distance(&current_bigrams, &baseline_bigrams) {
        if let Some(severity) = floored(distance, threshold) {
            drafts.push(Draft {
                metric: "tool_sequence_jaccard".to_string(),
                value: distance,
                severity,
                confidence: Some(0.75),
                details: json!({
                    "current_bigrams": current_bigrams.len(),
                    "baseline_bigrams": baseline_bigrams.len(),
                }),
            });
        }
    }

    let mut new_tools: Vec<&String> = current_hist
        .keys()
        .filter(|tool| !baseline_hist.contains_key(*tool))
        .collect();
    new_tools.sort();
    for tool in new_tools {
        drafts.push(Draft {
            metric: "new_tool".to_string(),
            value: 1.0,
            severity: Severity::Low,
            confidence: None,
            details: json!({ "tool": tool }),
        });
    }

    let baseline_runs = side_runs(&baseline_sequences);
    let current_runs = side_runs(&current_sequences);
    let mut looping: Vec<(&String, &u64)> = current_runs
        .iter()
        .filter(|(tool, run)| {
            **run >= LOOP_RUN_THRESHOLD
                && baseline_runs.get(*tool).copied().unwrap_or(0) < LOOP_RUN_THRESHOLD
        })
        .collect();
    looping.sort();
    for (tool, run) in looping {
        drafts.push(Draft {
            metric: "tool_loop".to_string(),
            value: 1.0,
            severity: Severity::Medium,
            confidence: None,
            details: json!({ "tool": tool, "consecutive_calls": run }),
        });
    }

    drafts
}

fn floored(value: f64, threshold: f64) -> Option<Severity> {
    bracket_severity(value).filter(|_| value >= threshold)
}

fn histogram(sequences: &[Vec<&str>]) -> HashMap<String, u64> {
    let mut hist = HashMap::new();
    for seq in sequences {
        for tool in seq {
            *hist.entry(tool.to_string()).or_insert(0) += 1;
        }
    }
    hist
}

/// Longest consecutive run per tool across every trace on one side.
fn side_runs(sequences: &[Vec<&str>]) -> HashMap<String, u64> {
    let mut merged: HashMap<String, u64> = HashMap::new();
    for seq in sequences {
        for (tool, run) in max_consecutive_runs(seq) {
            let entry = merged.entry(tool).or_insert(0);
            *entry = (*entry).max(run);
        }
    }
    merged
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::ToolCall;

    fn trace(finding_id: i64, tools: &[&str]) -> AgentTrace {
        AgentTrace {
            finding_id,
            calls: tools
                .iter()
                .map(|t| ToolCall {
                    tool: t.to_string(),
                    args: None,
                    result: None,
                })
                .collect(),
        }
    }

    #[test]
    fn channel_is_silent_without_traces_on_both_sides() {
        let side = vec![trace(1, &["search", "answer"])];
        assert!(detect(&side, &[], &Settings::default()).is_empty());
        assert!(detect(&[], &side, &Settings::default()).is_empty());
    }

    #[test]
    fn identical_traces_are_silent() {
        let side = vec![trace(1, &["search", "fetch", "answer"])];
        assert!(detect(&side, &side, &Settings::default()).is_empty());
    }

    #[test]
    fn swapped_tool_set_emits_frequency_and_sequence_drift() {
        let baseline = vec![trace(1, &["search", "fetch", "search", "fetch"])];
        let current = vec![trace(2, &["browse", "scrape", "browse", "scrape"])];
        let drafts = detect(&current, &baseline, &Settings::default());
        assert!(drafts.iter().any(|d| d.metric == "tool_frequency_chi2"));
        let jaccard = drafts
            .iter()
            .find(|d| d.metric == "tool_sequence_jaccard")
            .unwrap();
        assert!((jaccard.value - 1.0).abs() < 1e-12);
        assert_eq!(jaccard.severity, Severity::Critical);
    }

    #[test]
    fn new_tool_introduction_is_low_with_value_one() {
        let baseline = vec![trace(1, &["search", "answer"])];
        let current = vec![trace(2, &["search", "shell", "answer"])];
        let drafts = detect(&current, &baseline, &Settings::default());
        let new_tool = drafts.iter().find(|d| d.metric == "new_tool").unwrap();
        assert_eq!(new_tool.severity, Severity::Low);
        assert!((new_tool.value - 1.0).abs() < f64::EPSILON);
        assert_eq!(new_tool.details["tool"], "shell");
    }

    #[test]
    fn loop_detection_requires_three_repeats_absent_from_baseline() {
        let baseline = vec![trace(1, &["search", "search", "answer"])];
        let current = vec![trace(2, &["search", "search", "search", "answer"])];
        let drafts = detect(&current, &baseline, &Settings::default());
        let looped = drafts.iter().find(|d| d.metric == "tool_loop").unwrap();
        assert_eq!(looped.severity, Severity::Medium);
        assert_eq!(looped.details["tool"], "search");
        assert_eq!(looped.details["consecutive_calls"], 3);
    }

    #[test]
    fn loop_present_in_baseline_is_not_reflagged() {
        let baseline = vec![trace(1, &["search", "search", "search", "answer"])];
        let current = vec![trace(2, &["search", "search", "search", "search"])];
        let drafts = detect(&current, &baseline, &Settings::default());
        assert!(!drafts.iter().any(|d| d.metric == "tool_loop"));
    }
}
