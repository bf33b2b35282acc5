use crate::errors::EngineError;
use crate::model::{Execution, ExecutionStatus};
use crate::storage::Store;

/// How the caller designates the comparison reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BaselineRef {
    /// A specific execution id.
    ExplicitId(i64),
    /// The execution behind a named baseline tag ("golden run").
    Tag(String),
    /// Most recent completed execution for the same pipeline + LLM config.
    Previous,
}

/// Resolve a baseline reference to a usable execution id. The referenced
/// execution must exist and be Completed.
pub fn resolve(
    store: &Store,
    current: &Execution,
    baseline: &BaselineRef,
) -> Result<i64, EngineError> {
    let execution_id = match baseline {
        BaselineRef::ExplicitId(id) => *id,
        BaselineRef::Tag(tag) => store
            .baseline_by_tag(tag)
            .map_err(|e| EngineError::Persistence(e.to_string()))?
            .ok_or_else(|| EngineError::BaselineNotFound(format!("no baseline tagged '{tag}'")))?
            .execution_id,
        BaselineRef::Previous => store
            .previous_completed_execution(current.pipeline_id, current.llm_config_id, current.id)
            .map_err(|e| EngineError::Persistence(e.to_string()))?
            .ok_or_else(|| {
                EngineError::BaselineNotFound(format!(
                    "no previous completed execution for pipeline {} / llm config {}",
                    current.pipeline_id, current.llm_config_id
                ))
            })?,
    };

    let execution = store
        .get_execution(execution_id)
        .map_err(|e| EngineError::Persistence(e.to_string()))?
        .ok_or_else(|| {
            EngineError::BaselineNotFound(format!("execution {execution_id} not found"))
        })?;
    if execution.status != ExecutionStatus::Completed {
        return Err(EngineError::BaselineNotUsable(format!(
            "execution {execution_id} is {} (must be completed)",
            execution.status.as_str()
        )));
    }
    Ok(execution_id)
}
