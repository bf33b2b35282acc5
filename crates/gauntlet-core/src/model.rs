use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Normalized finding severity. Adapters may emit anything; `fold` maps the
/// known synonyms and everything unknown lands on `Info`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    High,
    Medium,
    Low,
    Info,
}

impl Severity {
    pub const ALL: [Severity; 5] = [
        Severity::Critical,
        Severity::High,
        Severity::Medium,
        Severity::Low,
        Severity::Info,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Critical => "critical",
            Severity::High => "high",
            Severity::Medium => "medium",
            Severity::Low => "low",
            Severity::Info => "info",
        }
    }

    pub fn parse(s: &str) -> Option<Severity> {
        match s {
            "critical" => Some(Severity::Critical),
            "high" => Some(Severity::High),
            "medium" => Some(Severity::Medium),
            "low" => Some(Severity::Low),
            "info" => Some(Severity::Info),
            _ => None,
        }
    }

    /// Fold a raw adapter severity into the canonical set. `warning` and
    /// `error` are the two synonyms the probe libraries actually emit.
    pub fn fold(raw: &str) -> Severity {
        match raw.to_ascii_lowercase().as_str() {
            "critical" => Severity::Critical,
            "high" | "error" => Severity::High,
            "medium" | "warning" => Severity::Medium,
            "low" => Severity::Low,
            _ => Severity::Info,
        }
    }

    /// Safety-score deduction per finding of this severity.
    pub fn safety_deduction(&self) -> f64 {
        match self {
            Severity::Critical => 20.0,
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
            Severity::Info => 0.5,
        }
    }

    /// Drift-score deduction per drift finding of this severity.
    pub fn drift_deduction(&self) -> f64 {
        match self {
            Severity::Critical => 20.0,
            Severity::High => 10.0,
            Severity::Medium => 5.0,
            Severity::Low => 2.0,
            Severity::Info => 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Pending => "pending",
            ExecutionStatus::Running => "running",
            ExecutionStatus::Completed => "completed",
            ExecutionStatus::Failed => "failed",
            ExecutionStatus::Cancelled => "cancelled",
        }
    }

    pub fn parse(s: &str) -> Option<ExecutionStatus> {
        match s {
            "pending" => Some(ExecutionStatus::Pending),
            "running" => Some(ExecutionStatus::Running),
            "completed" => Some(ExecutionStatus::Completed),
            "failed" => Some(ExecutionStatus::Failed),
            "cancelled" => Some(ExecutionStatus::Cancelled),
            _ => None,
        }
    }

    /// Terminal states admit no further findings or embeddings.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ExecutionStatus::Completed | ExecutionStatus::Failed | ExecutionStatus::Cancelled
        )
    }
}

/// Target endpoint description. Read-only during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LlmConfig {
    pub id: i64,
    pub name: String,
    pub endpoint_url: String,
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// JSON text; `{prompt}` and `{system_prompt}` placeholders are
    /// substituted at request time. Empty means "synthesize a chat payload".
    #[serde(default)]
    pub payload_template: Option<String>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default)]
    pub environment: String,
}

fn default_timeout_seconds() -> u64 {
    30
}

fn default_max_retries() -> u32 {
    3
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Pipeline {
    pub id: i64,
    pub name: String,
    /// Selected probe suite (adapter) names.
    pub libraries: Vec<String>,
    pub test_categories: Vec<String>,
    #[serde(default)]
    pub severity_thresholds: BTreeMap<String, i64>,
    pub llm_config_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub pipeline_id: i64,
    pub llm_config_id: i64,
    pub status: ExecutionStatus,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub error_message: Option<String>,
}

/// What an adapter hands back for one probe, before normalization.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RawFinding {
    pub library: String,
    pub test_category: String,
    pub severity: String,
    #[serde(default)]
    pub risk_type: String,
    #[serde(default)]
    pub prompt: Option<String>,
    #[serde(default)]
    pub response: Option<String>,
    #[serde(default)]
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

/// One normalized probe outcome. Immutable once persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Finding {
    pub id: i64,
    pub execution_id: i64,
    pub library: String,
    pub test_category: String,
    pub severity: Severity,
    pub risk_type: String,
    pub evidence_prompt: Option<String>,
    pub evidence_response: Option<String>,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub metadata: serde_json::Value,
}

#[derive(Debug, Clone)]
pub struct EmbeddingRow {
    pub id: i64,
    pub finding_id: i64,
    pub execution_id: i64,
    pub model: String,
    pub vector: Vec<f32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Baseline {
    pub id: i64,
    pub execution_id: i64,
    pub name: String,
    pub tag: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DriftChannel {
    Output,
    Safety,
    Distribution,
    Embedding,
    AgentTool,
}

impl DriftChannel {
    pub const ALL: [DriftChannel; 5] = [
        DriftChannel::Output,
        DriftChannel::Safety,
        DriftChannel::Distribution,
        DriftChannel::Embedding,
        DriftChannel::AgentTool,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            DriftChannel::Output => "output",
            DriftChannel::Safety => "safety",
            DriftChannel::Distribution => "distribution",
            DriftChannel::Embedding => "embedding",
            DriftChannel::AgentTool => "agent_tool",
        }
    }

    pub fn parse(s: &str) -> Option<DriftChannel> {
        match s {
            "output" => Some(DriftChannel::Output),
            "safety" => Some(DriftChannel::Safety),
            "distribution" => Some(DriftChannel::Distribution),
            "embedding" => Some(DriftChannel::Embedding),
            "agent_tool" => Some(DriftChannel::AgentTool),
            _ => None,
        }
    }
}

/// One statistical observation on one drift channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DriftFinding {
    pub id: i64,
    pub execution_id: i64,
    pub baseline_execution_id: i64,
    pub channel: DriftChannel,
    pub metric: String,
    pub value: f64,
    pub threshold: f64,
    pub severity: Severity,
    pub confidence: Option<f64>,
    #[serde(default)]
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    pub tool: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub args: Option<serde_json::Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
}

/// Tool-call sequence reconstructed from a finding's metadata. Derived data,
/// not authoritative.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentTrace {
    pub finding_id: i64,
    pub calls: Vec<ToolCall>,
}

/// Read-side filter for `list_findings`.
#[derive(Debug, Clone, Default)]
pub struct FindingFilter {
    pub severity: Option<Severity>,
    pub library: Option<String>,
    pub test_category: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn severity_fold_synonyms() {
        assert_eq!(Severity::fold("critical"), Severity::Critical);
        assert_eq!(Severity::fold("WARNING"), Severity::Medium);
        assert_eq!(Severity::fold("error"), Severity::High);
        assert_eq!(Severity::fold("weird"), Severity::Info);
        assert_eq!(Severity::fold(""), Severity::Info);
    }

    #[test]
    fn status_roundtrip() {
        for s in [
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
            ExecutionStatus::Failed,
            ExecutionStatus::Cancelled,
        ] {
            assert_eq!(ExecutionStatus::parse(s.as_str()), Some(s));
        }
        assert!(ExecutionStatus::parse("done").is_none());
    }

    #[test]
    fn terminal_states() {
        assert!(!ExecutionStatus::Running.is_terminal());
        assert!(ExecutionStatus::Completed.is_terminal());
        assert!(ExecutionStatus::Failed.is_terminal());
        assert!(ExecutionStatus::Cancelled.is_terminal());
    }
}
