use crate::adapters::AdapterRegistry;
use crate::baseline::BaselineRef;
use crate::config::Settings;
use crate::drift::{DriftEngine, DriftReport};
use crate::engine::ExecutionEngine;
use crate::errors::EngineError;
use crate::model::{Finding, FindingFilter};
use crate::scoring::{summarize, summarize_drift, DriftSummary, ExecutionSummary};
use crate::storage::Store;
use crate::transport::LlmTransport;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

/// Procedural control surface over the engine: schedule and cancel
/// executions, run drift comparisons, read findings and summaries. One
/// harness per process; the registry is written once here and read-only
/// afterward.
pub struct Harness {
    store: Store,
    registry: Arc<AdapterRegistry>,
    settings: Settings,
    cancel_flags: Mutex<HashMap<i64, Arc<AtomicBool>>>,
}

impl Harness {
    pub fn new(store: Store, settings: Settings) -> Self {
        let transport = Arc::new(LlmTransport::new());
        Self::with_registry(store, settings, AdapterRegistry::builtin(transport))
    }

    /// Custom registry wiring, used when embedding the engine with extra or
    /// substitute probe suites.
    pub fn with_registry(store: Store, settings: Settings, registry: AdapterRegistry) -> Self {
        Self {
            store,
            registry: Arc::new(registry),
            settings,
            cancel_flags: Mutex::new(HashMap::new()),
        }
    }

    /// Create a pending execution row and schedule it onto the runtime.
    /// Returns the execution id immediately.
    pub fn start_execution(
        self: &Arc<Self>,
        pipeline_id: i64,
        llm_config_id: i64,
    ) -> anyhow::Result<i64> {
        let execution_id = self.store.create_execution(pipeline_id, llm_config_id)?;
        let harness = self.clone();
        tokio::spawn(async move {
            if let Err(e) = harness.run_execution(execution_id).await {
                tracing::error!(execution_id, "scheduled execution errored: {e:?}");
            }
        });
        Ok(execution_id)
    }

    /// Drive one pending execution to a terminal state, inline.
    pub async fn run_execution(&self, execution_id: i64) -> anyhow::Result<()> {
        let cancel = self.cancel_flag(execution_id);
        let engine = ExecutionEngine {
            store: self.store.clone(),
            registry: self.registry.clone(),
            settings: self.settings.clone(),
        };
        let result = engine.run_execution(execution_id, cancel).await;
        self.cancel_flags.lock().unwrap().remove(&execution_id);
        result
    }

    /// Request cancellation. Idempotent; workers drain between jobs, so
    /// in-flight probes complete and persist before the state flips.
    pub fn cancel_execution(&self, execution_id: i64) {
        self.cancel_flag(execution_id).store(true, Ordering::SeqCst);
        tracing::info!(execution_id, "cancel requested");
    }

    /// Compare an execution against a baseline across all drift channels.
    /// Synchronous from the caller's view; idempotent per resolved pair.
    pub async fn compare_drift(
        &self,
        current_execution_id: i64,
        baseline: &BaselineRef,
    ) -> Result<DriftReport, EngineError> {
        DriftEngine::new(self.store.clone(), self.settings.clone())
            .compare(current_execution_id, baseline)
            .await
    }

    /// Derived view over the persisted drift findings of one pair.
    pub fn summarize_drift(
        &self,
        current_execution_id: i64,
        baseline_execution_id: i64,
    ) -> anyhow::Result<DriftSummary> {
        let rows = self
            .store
            .drift_findings_for_pair(current_execution_id, baseline_execution_id)?;
        Ok(summarize_drift(
            current_execution_id,
            baseline_execution_id,
            &rows,
        ))
    }

    pub fn list_findings(
        &self,
        execution_id: i64,
        filter: &FindingFilter,
    ) -> anyhow::Result<Vec<Finding>> {
        self.store.list_findings(execution_id, filter)
    }

    /// Derived summary view: severity/library/category breakdowns, safety
    /// score and sub-scores, plus drift figures from the latest comparison
    /// when one exists.
    pub fn summarize(&self, execution_id: i64) -> anyhow::Result<ExecutionSummary> {
        let findings = self.store.findings_for_execution(execution_id)?;
        let drift_rows = match self.store.latest_drift_baseline(execution_id)? {
            Some(baseline_id) => Some(
                self.store
                    .drift_findings_for_pair(execution_id, baseline_id)?,
            ),
            None => None,
        };
        Ok(summarize(execution_id, &findings, drift_rows.as_deref()))
    }

    fn cancel_flag(&self, execution_id: i64) -> Arc<AtomicBool> {
        self.cancel_flags
            .lock()
            .unwrap()
            .entry(execution_id)
            .or_default()
            .clone()
    }
}
