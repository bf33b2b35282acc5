use crate::model::{LlmConfig, RawFinding};
use crate::transport::{truncate, LlmTransport};
use async_trait::async_trait;
use serde_json::json;
use std::collections::HashMap;
use std::sync::Arc;

pub mod garak;
pub mod langtest;
pub mod promptfoo;
pub mod pyrit;

/// A pluggable probe suite. Adapters are stateless apart from the shared
/// transport they delegate to; adding one is a pure registry operation.
#[async_trait]
pub trait ProbeAdapter: Send + Sync {
    fn name(&self) -> &'static str;

    fn supports(&self, category: &str) -> bool;

    /// Run every bundled prompt for the requested categories against the
    /// endpoint. A failing probe becomes an `adapter_error` finding instead
    /// of aborting the suite.
    async fn execute(
        &self,
        cfg: &LlmConfig,
        categories: &[String],
    ) -> anyhow::Result<Vec<RawFinding>>;
}

/// Process-wide adapter lookup. Populated at startup, read-only afterward.
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProbeAdapter>>,
}

impl AdapterRegistry {
    pub fn new() -> Self {
        Self {
            adapters: HashMap::new(),
        }
    }

    /// Registry with the four bundled suites wired to one shared transport.
    pub fn builtin(transport: Arc<LlmTransport>) -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(garak::GarakAdapter::new(transport.clone())));
        registry.register(Arc::new(pyrit::PyritAdapter::new(transport.clone())));
        registry.register(Arc::new(langtest::LangTestAdapter::new(transport.clone())));
        registry.register(Arc::new(promptfoo::PromptfooAdapter::new(transport)));
        registry
    }

    pub fn register(&mut self, adapter: Arc<dyn ProbeAdapter>) {
        self.adapters.insert(adapter.name().to_string(), adapter);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn ProbeAdapter>> {
        self.adapters.get(&name.to_ascii_lowercase()).cloned()
    }

    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}

impl Default for AdapterRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Classifier verdict for one probe response.
pub(crate) struct Verdict {
    pub severity: &'static str,
    pub confidence: f64,
}

/// Shared probe loop: send each prompt, classify the reply, and keep going on
/// per-probe failures (recorded as `adapter_error` findings with the fault in
/// the metadata).
pub(crate) async fn run_probes(
    transport: &LlmTransport,
    cfg: &LlmConfig,
    library: &'static str,
    category: &str,
    prompts: &[&str],
    classify: impl Fn(&str, &str) -> Verdict,
) -> Vec<RawFinding> {
    let mut findings = Vec::with_capacity(prompts.len());
    for prompt in prompts {
        match transport.complete(cfg, prompt, None).await {
            Ok(response) => {
                let verdict = classify(prompt, &response);
                findings.push(RawFinding {
                    library: library.to_string(),
                    test_category: category.to_string(),
                    severity: verdict.severity.to_string(),
                    risk_type: category.to_string(),
                    prompt: Some(prompt.to_string()),
                    response: Some(truncate(&response, 500)),
                    confidence: Some(verdict.confidence),
                    metadata: json!({}),
                });
            }
            Err(e) => {
                tracing::warn!(library, category, "probe failed: {e}");
                findings.push(RawFinding {
                    library: library.to_string(),
                    test_category: category.to_string(),
                    severity: "info".to_string(),
                    risk_type: "adapter_error".to_string(),
                    prompt: Some(prompt.to_string()),
                    response: None,
                    confidence: None,
                    metadata: json!({ "error": e.to_string() }),
                });
            }
        }
    }
    findings
}

pub(crate) fn contains_any(haystack: &str, needles: &[&str]) -> bool {
    needles.iter().any(|n| haystack.contains(n))
}
