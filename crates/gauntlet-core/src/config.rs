use crate::model::DriftChannel;
use serde::{Deserialize, Serialize};

/// Runtime settings. Defaults match the documented option table; everything
/// can be overridden from the environment via `Settings::from_env`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    pub worker_parallelism: usize,
    pub http_timeout_seconds: u64,
    pub http_max_retries: u32,
    pub embedding_service_url: Option<String>,
    pub embedding_model_name: String,
    pub embedding_batch_size: usize,
    pub drift_thresholds: DriftThresholds,
    pub drift_comparison_timeout_seconds: u64,
    /// Per-job execution budget; the whole run gets this times the work-set size.
    pub execution_job_timeout_seconds: u64,
    pub enable_agent_traces: bool,
    /// Divisor guard for the entropy-delta metric.
    pub entropy_epsilon: f64,
    /// Fractions below this count as empty PSI buckets and are skipped.
    pub psi_epsilon: f64,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            worker_parallelism: 8,
            http_timeout_seconds: 30,
            http_max_retries: 3,
            embedding_service_url: None,
            embedding_model_name: "text-embedding-nomic-embed-text-v1.5".to_string(),
            embedding_batch_size: 32,
            drift_thresholds: DriftThresholds::default(),
            drift_comparison_timeout_seconds: 600,
            execution_job_timeout_seconds: 300,
            enable_agent_traces: false,
            entropy_epsilon: 1e-3,
            psi_epsilon: 1e-4,
        }
    }
}

impl Settings {
    pub fn from_env() -> Self {
        let mut s = Settings::default();
        if let Some(v) = env_parse::<usize>("WORKER_PARALLELISM") {
            s.worker_parallelism = v.max(1);
        }
        if let Some(v) = env_parse::<u64>("HTTP_TIMEOUT_SECONDS") {
            s.http_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<u32>("HTTP_MAX_RETRIES") {
            s.http_max_retries = v;
        }
        if let Ok(v) = std::env::var("EMBEDDING_SERVICE_URL") {
            if !v.is_empty() {
                s.embedding_service_url = Some(v);
            }
        }
        if let Ok(v) = std::env::var("EMBEDDING_MODEL_NAME") {
            if !v.is_empty() {
                s.embedding_model_name = v;
            }
        }
        if let Ok(v) = std::env::var("DRIFT_THRESHOLDS") {
            match serde_json::from_str::<DriftThresholds>(&v) {
                Ok(t) => s.drift_thresholds = t,
                Err(e) => tracing::warn!("ignoring malformed DRIFT_THRESHOLDS: {e}"),
            }
        }
        if let Some(v) = env_parse::<u64>("DRIFT_COMPARISON_TIMEOUT_SECONDS") {
            s.drift_comparison_timeout_seconds = v;
        }
        if let Some(v) = env_parse::<u64>("EXECUTION_JOB_TIMEOUT_SECONDS") {
            s.execution_job_timeout_seconds = v;
        }
        if let Ok(v) = std::env::var("ENABLE_AGENT_TRACES") {
            s.enable_agent_traces = matches!(v.as_str(), "1" | "true" | "yes");
        }
        s
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Per-channel drift thresholds (the emission floor for each channel).
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DriftThresholds {
    pub output: f64,
    pub safety: f64,
    pub distribution: f64,
    pub embedding: f64,
    pub agent_tool: f64,
}

impl Default for DriftThresholds {
    fn default() -> Self {
        Self {
            output: 0.20,
            safety: 0.15,
            distribution: 0.20,
            embedding: 0.30,
            agent_tool: 0.25,
        }
    }
}

impl DriftThresholds {
    pub fn for_channel(&self, channel: DriftChannel) -> f64 {
        match channel {
            DriftChannel::Output => self.output,
            DriftChannel::Safety => self.safety,
            DriftChannel::Distribution => self.distribution,
            DriftChannel::Embedding => self.embedding,
            DriftChannel::AgentTool => self.agent_tool,
        }
    }
}
