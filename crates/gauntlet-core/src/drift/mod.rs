use crate::baseline::{self, BaselineRef};
use crate::config::Settings;
use crate::errors::EngineError;
use crate::model::{DriftChannel, DriftFinding, ExecutionStatus, Severity};
use crate::scoring::{drift_grade, drift_score};
use crate::storage::Store;
use serde_json::json;
use std::time::Duration;

mod agent_tool;
mod distribution;
mod embedding;
mod output;
mod safety;
pub mod stats;

/// One channel observation before it is bound to an execution pair.
#[derive(Debug, Clone)]
pub(crate) struct Draft {
    pub metric: String,
    pub value: f64,
    pub severity: Severity,
    pub confidence: Option<f64>,
    pub details: serde_json::Value,
}

/// Generic drift severity brackets. Values under 0.10 are not reported.
pub(crate) fn bracket_severity(value: f64) -> Option<Severity> {
    if value >= 0.45 {
        Some(Severity::Critical)
    } else if value >= 0.30 {
        Some(Severity::High)
    } else if value >= 0.20 {
        Some(Severity::Medium)
    } else if value >= 0.10 {
        Some(Severity::Low)
    } else {
        None
    }
}

/// PSI uses its own brackets.
pub(crate) fn psi_severity(value: f64) -> Option<Severity> {
    if value >= 0.25 {
        Some(Severity::Critical)
    } else if value >= 0.15 {
        Some(Severity::High)
    } else if value >= 0.10 {
        Some(Severity::Medium)
    } else {
        None
    }
}

/// Embedding brackets sit on the channel threshold: anything below it is
/// omitted, 0.45 and up is critical, the rest high.
pub(crate) fn embedding_severity(value: f64, threshold: f64) -> Option<Severity> {
    if value < threshold {
        None
    } else if value >= 0.45 {
        Some(Severity::Critical)
    } else {
        Some(Severity::High)
    }
}

/// Lifecycle of one comparison. Channels run as independent steps between
/// Computing and Emitting; a channel failure surfaces as a `channel_error`
/// finding without failing the comparison.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ComparisonState {
    Requested,
    Collecting,
    Computing,
    Emitting,
    Aggregated,
    Failed,
}

impl ComparisonState {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComparisonState::Requested => "requested",
            ComparisonState::Collecting => "collecting",
            ComparisonState::Computing => "computing",
            ComparisonState::Emitting => "emitting",
            ComparisonState::Aggregated => "aggregated",
            ComparisonState::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct DriftReport {
    pub current_execution_id: i64,
    pub baseline_execution_id: i64,
    pub findings: Vec<DriftFinding>,
    pub drift_score: f64,
    pub drift_grade: String,
}

/// Compares a current execution's persisted artifacts against a baseline's
/// across the five channels and aggregates the unified drift score.
pub struct DriftEngine {
    store: Store,
    settings: Settings,
    /// Allows comparing an execution against itself; test harness only.
    self_check: bool,
}

impl DriftEngine {
    pub fn new(store: Store, settings: Settings) -> Self {
        Self {
            store,
            settings,
            self_check: false,
        }
    }

    pub fn with_self_check(store: Store, settings: Settings) -> Self {
        Self {
            store,
            settings,
            self_check: true,
        }
    }

    /// Run a full comparison. Idempotent per `(current, baseline)`: prior
    /// drift findings for the pair are replaced. Typed failures
    /// (`BaselineNotFound`, `BaselineNotUsable`, `Timeout`) persist nothing.
    pub async fn compare(
        &self,
        current_id: i64,
        baseline_ref: &BaselineRef,
    ) -> Result<DriftReport, EngineError> {
        let timeout = Duration::from_secs(self.settings.drift_comparison_timeout_seconds);
        match tokio::time::timeout(timeout, self.compare_inner(current_id, baseline_ref)).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(current_id, "drift comparison timed out");
                Err(EngineError::Timeout(
                    self.settings.drift_comparison_timeout_seconds,
                ))
            }
        }
    }

    async fn compare_inner(
        &self,
        current_id: i64,
        baseline_ref: &BaselineRef,
    ) -> Result<DriftReport, EngineError> {
        let mut state = ComparisonState::Requested;
        tracing::debug!(current_id, state = state.as_str(), "drift comparison");

        let current = self
            .store
            .get_execution(current_id)
            .map_err(persistence)?
            .ok_or_else(|| {
                EngineError::BaselineNotFound(format!("execution {current_id} not found"))
            })?;
        if current.status != ExecutionStatus::Completed {
            return Err(EngineError::BaselineNotUsable(format!(
                "current execution {current_id} is {} (must be completed)",
                current.status.as_str()
            )));
        }
        let baseline_id = baseline::resolve(&self.store, &current, baseline_ref)?;
        if baseline_id == current_id && !self.self_check {
            return Err(EngineError::BaselineNotUsable(
                "an execution cannot be its own baseline".to_string(),
            ));
        }

        state = ComparisonState::Collecting;
        tracing::debug!(current_id, baseline_id, state = state.as_str(), "drift comparison");
        let current_findings = self
            .store
            .findings_for_execution(current_id)
            .map_err(persistence)?;
        let baseline_findings = self
            .store
            .findings_for_execution(baseline_id)
            .map_err(persistence)?;
        let current_embeddings = self
            .store
            .embeddings_for_execution(current_id)
            .map_err(persistence)?;
        let baseline_embeddings = self
            .store
            .embeddings_for_execution(baseline_id)
            .map_err(persistence)?;
        let current_traces = self
            .store
            .traces_for_execution(current_id)
            .map_err(persistence)?;
        let baseline_traces = self
            .store
            .traces_for_execution(baseline_id)
            .map_err(persistence)?;

        state = ComparisonState::Computing;
        tracing::debug!(current_id, baseline_id, state = state.as_str(), "drift comparison");
        let mut findings: Vec<DriftFinding> = Vec::new();
        for channel in DriftChannel::ALL {
            let result = match channel {
                DriftChannel::Output => Ok(output::detect(
                    &current_findings,
                    &baseline_findings,
                    &self.settings,
                )),
                DriftChannel::Safety => Ok(safety::detect(&current_findings, &baseline_findings)),
                DriftChannel::Distribution => Ok(distribution::detect(
                    &current_findings,
                    &baseline_findings,
                    &self.settings,
                )),
                DriftChannel::Embedding => embedding::detect(
                    &current_embeddings,
                    &baseline_embeddings,
                    &self.settings,
                ),
                DriftChannel::AgentTool => Ok(agent_tool::detect(
                    &current_traces,
                    &baseline_traces,
                    &self.settings,
                )),
            };

            let drafts = match result {
                Ok(drafts) => drafts,
                Err(e) => {
                    tracing::warn!(channel = channel.as_str(), "drift channel failed: {e}");
                    vec![Draft {
                        metric: "channel_error".to_string(),
                        value: 0.0,
                        severity: Severity::Low,
                        confidence: None,
                        details: json!({ "error": e.to_string() }),
                    }]
                }
            };
            let threshold = self.settings.drift_thresholds.for_channel(channel);
            findings.extend(drafts.into_iter().map(|d| DriftFinding {
                id: 0,
                execution_id: current_id,
                baseline_execution_id: baseline_id,
                channel,
                metric: d.metric,
                value: d.value,
                threshold,
                severity: d.severity,
                confidence: d.confidence,
                details: d.details,
            }));
        }

        state = ComparisonState::Emitting;
        tracing::debug!(
            current_id,
            baseline_id,
            state = state.as_str(),
            count = findings.len(),
            "drift comparison"
        );
        self.store
            .replace_drift_findings(current_id, baseline_id, &findings)
            .map_err(persistence)?;
        let persisted = self
            .store
            .drift_findings_for_pair(current_id, baseline_id)
            .map_err(persistence)?;

        let score = drift_score(&persisted);
        state = ComparisonState::Aggregated;
        tracing::info!(
            current_id,
            baseline_id,
            state = state.as_str(),
            score,
            "drift comparison done"
        );
        Ok(DriftReport {
            current_execution_id: current_id,
            baseline_execution_id: baseline_id,
            findings: persisted,
            drift_score: score,
            drift_grade: drift_grade(score).to_string(),
        })
    }
}

fn persistence(e: anyhow::Error) -> EngineError {
    EngineError::Persistence(e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn generic_brackets() {
        assert_eq!(bracket_severity(0.50), Some(Severity::Critical));
        assert_eq!(bracket_severity(0.45), Some(Severity::Critical));
        assert_eq!(bracket_severity(0.30), Some(Severity::High));
        assert_eq!(bracket_severity(0.20), Some(Severity::Medium));
        assert_eq!(bracket_severity(0.10), Some(Severity::Low));
        assert_eq!(bracket_severity(0.09), None);
    }

    #[test]
    fn psi_brackets() {
        assert_eq!(psi_severity(0.32), Some(Severity::Critical));
        assert_eq!(psi_severity(0.20), Some(Severity::High));
        assert_eq!(psi_severity(0.10), Some(Severity::Medium));
        assert_eq!(psi_severity(0.05), None);
    }

    #[test]
    fn embedding_brackets_floor_at_threshold() {
        assert_eq!(embedding_severity(0.29, 0.30), None);
        assert_eq!(embedding_severity(0.30, 0.30), Some(Severity::High));
        assert_eq!(embedding_severity(0.46, 0.30), Some(Severity::Critical));
    }

    #[test]
    fn state_names() {
        assert_eq!(ComparisonState::Requested.as_str(), "requested");
        assert_eq!(ComparisonState::Aggregated.as_str(), "aggregated");
        assert_eq!(ComparisonState::Failed.as_str(), "failed");
    }
}
