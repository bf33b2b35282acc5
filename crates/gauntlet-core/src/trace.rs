use crate::model::{AgentTrace, Finding, ToolCall};
use crate::storage::Store;

/// Reconstruct tool-call sequences from finding metadata. The recognized
/// shape is `{"agent_trace": [{"tool": "...", "args"?, "result"?}, ...]}`;
/// anything else yields no trace.
pub fn extract_trace(finding: &Finding) -> Option<AgentTrace> {
    let raw = finding.metadata.get("agent_trace")?.as_array()?;
    let mut calls = Vec::with_capacity(raw.len());
    for entry in raw {
        let tool = entry.get("tool")?.as_str()?;
        if tool.is_empty() {
            return None;
        }
        calls.push(ToolCall {
            tool: tool.to_string(),
            args: entry.get("args").filter(|v| !v.is_null()).cloned(),
            result: entry.get("result").filter(|v| !v.is_null()).cloned(),
        });
    }
    if calls.is_empty() {
        return None;
    }
    Some(AgentTrace {
        finding_id: finding.id,
        calls,
    })
}

/// Post-execution hook: persist a trace for every finding that carries one.
/// Returns the number of traces stored.
pub fn extract_for_execution(store: &Store, execution_id: i64) -> anyhow::Result<usize> {
    let findings = store.findings_for_execution(execution_id)?;
    let mut stored = 0;
    for finding in &findings {
        if let Some(trace) = extract_trace(finding) {
            store.insert_agent_trace(execution_id, &trace)?;
            stored += 1;
        }
    }
    Ok(stored)
}

/// Flat tool-name sequence of one trace, used by the drift statistics.
pub fn tool_sequence(trace: &AgentTrace) -> Vec<&str> {
    trace.calls.iter().map(|c| c.tool.as_str()).collect()
}
