use crate::adapters::AdapterRegistry;
use crate::config::Settings;
use crate::embeddings::EmbeddingClient;
use crate::model::{ExecutionStatus, Finding, LlmConfig, Severity};
use crate::normalize::normalize;
use crate::storage::Store;
use crate::trace;
use serde_json::json;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tokio::time::{timeout, Duration};

/// Fans the pipeline's `(adapter, category)` work set out over a bounded
/// worker pool, persists normalized findings as they arrive, and drives the
/// execution state machine. The engine is the sole mutator of execution rows.
pub struct ExecutionEngine {
    pub store: Store,
    pub registry: Arc<AdapterRegistry>,
    pub settings: Settings,
}

enum JobOutcome {
    Done,
    Skipped,
}

impl ExecutionEngine {
    /// Drive one pending execution to a terminal state. Adapter faults never
    /// fail the run; only engine-level persistence errors do.
    pub async fn run_execution(
        &self,
        execution_id: i64,
        cancel: Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let execution = self
            .store
            .get_execution(execution_id)?
            .ok_or_else(|| anyhow::anyhow!("execution {execution_id} not found"))?;
        if !self.store.transition_execution(
            execution_id,
            ExecutionStatus::Pending,
            ExecutionStatus::Running,
        )? {
            anyhow::bail!(
                "execution {execution_id} is {} (expected pending)",
                execution.status.as_str()
            );
        }
        tracing::info!(execution_id, "execution running");

        let pipeline = match self.store.get_pipeline(execution.pipeline_id)? {
            Some(p) => p,
            None => {
                self.store.fail_execution(execution_id, "pipeline not found")?;
                return Ok(());
            }
        };
        let llm_config = match self.store.get_llm_config(execution.llm_config_id)? {
            Some(c) => c,
            None => {
                self.store.fail_execution(execution_id, "llm config not found")?;
                return Ok(());
            }
        };

        let work_set = self.work_set(&pipeline.libraries, &pipeline.test_categories);
        tracing::info!(execution_id, jobs = work_set.len(), "work set scheduled");

        let budget = Duration::from_secs(
            self.settings.execution_job_timeout_seconds * work_set.len().max(1) as u64,
        );
        let run = self.run_work_set(execution_id, &llm_config, work_set, cancel.clone());
        let outcome = match timeout(budget, run).await {
            Ok(result) => result,
            Err(_) => {
                tracing::error!(execution_id, "execution timed out");
                self.store.fail_execution(
                    execution_id,
                    &format!("timed out after {}s", budget.as_secs()),
                )?;
                return Ok(());
            }
        };
        if let Err(e) = outcome {
            // Engine-level fault (DB write failure): the one path to Failed.
            tracing::error!(execution_id, "execution failed: {e:?}");
            self.store.fail_execution(execution_id, &e.to_string())?;
            return Ok(());
        }

        if cancel.load(Ordering::SeqCst) {
            self.store.transition_execution(
                execution_id,
                ExecutionStatus::Running,
                ExecutionStatus::Cancelled,
            )?;
            tracing::info!(execution_id, "execution cancelled after drain");
            return Ok(());
        }

        self.run_hooks(execution_id).await;

        if !self.store.transition_execution(
            execution_id,
            ExecutionStatus::Running,
            ExecutionStatus::Completed,
        )? {
            tracing::warn!(execution_id, "completion transition lost; state changed underneath");
            return Ok(());
        }
        tracing::info!(execution_id, "execution completed");
        Ok(())
    }

    /// The work set: every selected `(adapter, category)` pair the adapter
    /// actually supports. Unknown adapter names are logged and skipped.
    fn work_set(
        &self,
        libraries: &[String],
        categories: &[String],
    ) -> Vec<(String, String)> {
        let mut jobs = Vec::new();
        for library in libraries {
            let Some(adapter) = self.registry.get(library) else {
                tracing::warn!(%library, "no adapter registered; skipping");
                continue;
            };
            for category in categories {
                if adapter.supports(category) {
                    jobs.push((library.clone(), category.clone()));
                }
            }
        }
        jobs
    }

    async fn run_work_set(
        &self,
        execution_id: i64,
        llm_config: &LlmConfig,
        work_set: Vec<(String, String)>,
        cancel: Arc<AtomicBool>,
    ) -> anyhow::Result<()> {
        let sem = Arc::new(Semaphore::new(self.settings.worker_parallelism.max(1)));
        let mut handles = Vec::with_capacity(work_set.len());

        for (library, category) in work_set {
            let permit = sem.clone().acquire_owned().await?;
            let registry = self.registry.clone();
            let store = self.store.clone();
            let cfg = llm_config.clone();
            let cancel = cancel.clone();
            let job_library = library.clone();
            let job_category = category.clone();
            let handle = tokio::spawn(async move {
                let _permit = permit;
                run_job(
                    &registry,
                    &store,
                    execution_id,
                    &cfg,
                    &job_library,
                    &job_category,
                    &cancel,
                )
                .await
            });
            handles.push((library, category, handle));
        }

        for (library, category, handle) in handles {
            match handle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => return Err(e),
                Err(e) => {
                    // A panicking worker must not poison the rest of the run;
                    // its job is still accounted for as an adapter_error.
                    tracing::error!(execution_id, %library, %category, "worker panicked: {e}");
                    let finding = Finding {
                        id: 0,
                        execution_id,
                        library,
                        test_category: category,
                        severity: Severity::Info,
                        risk_type: "adapter_error".to_string(),
                        evidence_prompt: None,
                        evidence_response: None,
                        confidence: None,
                        metadata: json!({ "error": format!("worker panicked: {e}") }),
                    };
                    persist(&self.store, &finding)?;
                }
            }
        }
        Ok(())
    }

    /// Best-effort post-execution hooks: embedding generation and agent-trace
    /// extraction. Failures log and never block completion.
    async fn run_hooks(&self, execution_id: i64) {
        if let Some(url) = &self.settings.embedding_service_url {
            let client = EmbeddingClient::new(
                url.clone(),
                self.settings.embedding_model_name.clone(),
            );
            match client
                .generate_for_execution(
                    &self.store,
                    execution_id,
                    self.settings.embedding_batch_size,
                )
                .await
            {
                Ok(written) => {
                    tracing::info!(execution_id, written, "embeddings generated");
                }
                Err(e) => {
                    tracing::warn!(execution_id, "embedding hook failed: {e}");
                }
            }
        }

        if self.settings.enable_agent_traces {
            match trace::extract_for_execution(&self.store, execution_id) {
                Ok(stored) => {
                    if stored > 0 {
                        tracing::info!(execution_id, stored, "agent traces extracted");
                    }
                }
                Err(e) => {
                    tracing::warn!(execution_id, "trace extraction failed: {e}");
                }
            }
        }
    }
}

/// One `(adapter, category)` job. Adapter faults become a single
/// `adapter_error` finding; only store failures propagate.
async fn run_job(
    registry: &AdapterRegistry,
    store: &Store,
    execution_id: i64,
    llm_config: &LlmConfig,
    library: &str,
    category: &str,
    cancel: &AtomicBool,
) -> anyhow::Result<JobOutcome> {
    // Cancellation is observed between jobs, never mid-flight.
    if cancel.load(Ordering::SeqCst) {
        return Ok(JobOutcome::Skipped);
    }
    let adapter = registry
        .get(library)
        .ok_or_else(|| anyhow::anyhow!("adapter '{library}' vanished from registry"))?;

    let categories = [category.to_string()];
    match adapter.execute(llm_config, &categories).await {
        Ok(raw_findings) => {
            for raw in raw_findings {
                let finding = normalize(raw, execution_id);
                persist(store, &finding)?;
            }
        }
        Err(e) => {
            tracing::error!(library, category, "adapter crashed: {e:?}");
            let finding = Finding {
                id: 0,
                execution_id,
                library: library.to_string(),
                test_category: category.to_string(),
                severity: Severity::Info,
                risk_type: "adapter_error".to_string(),
                evidence_prompt: None,
                evidence_response: None,
                confidence: None,
                metadata: json!({ "error": format!("{e:?}") }),
            };
            persist(store, &finding)?;
        }
    }
    Ok(JobOutcome::Done)
}

fn persist(store: &Store, finding: &Finding) -> anyhow::Result<()> {
    match store.insert_finding(finding)? {
        Some(_) => Ok(()),
        None => {
            // The state-machine guard rejected the write; the execution is
            // already terminal.
            tracing::warn!(
                execution_id = finding.execution_id,
                "finding dropped by state guard"
            );
            Ok(())
        }
    }
}
