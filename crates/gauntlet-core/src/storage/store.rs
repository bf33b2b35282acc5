use crate::embeddings::util::{decode_vec_f32, encode_vec_f32};
use crate::model::{
    AgentTrace, Baseline, DriftChannel, DriftFinding, EmbeddingRow, Execution, ExecutionStatus,
    Finding, FindingFilter, LlmConfig, Pipeline, Severity,
};
use anyhow::Context;
use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, Row};
use std::path::Path;
use std::sync::{Arc, Mutex};

/// The database is the only shared persistent state: every write is a single
/// row insert or a status update guarded by a compare-and-set on
/// `(execution id, current status)`.
#[derive(Clone)]
pub struct Store {
    conn: Arc<Mutex<Connection>>,
}

impl Store {
    pub fn open(path: &Path) -> anyhow::Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open database {}", path.display()))?;
        Ok(Self {
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    pub fn open_in_memory() -> anyhow::Result<Self> {
        Ok(Self {
            conn: Arc::new(Mutex::new(Connection::open_in_memory()?)),
        })
    }

    pub fn init_schema(&self) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute_batch(super::schema::DDL)?;
        Ok(())
    }

    // llm configs / pipelines

    pub fn insert_llm_config(&self, cfg: &LlmConfig) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO llm_configs(name, endpoint_url, method, headers_json, payload_template,
                                     timeout_seconds, max_retries, environment, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                cfg.name,
                cfg.endpoint_url,
                cfg.method,
                serde_json::to_string(&cfg.headers)?,
                cfg.payload_template,
                cfg.timeout_seconds as i64,
                cfg.max_retries as i64,
                cfg.environment,
                now_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_llm_config(&self, id: i64) -> anyhow::Result<Option<LlmConfig>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, endpoint_url, method, headers_json, payload_template,
                    timeout_seconds, max_retries, environment
             FROM llm_configs WHERE id=?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(LlmConfig {
                id: row.get(0)?,
                name: row.get(1)?,
                endpoint_url: row.get(2)?,
                method: row.get(3)?,
                headers: serde_json::from_str(&row.get::<_, String>(4)?)?,
                payload_template: row.get(5)?,
                timeout_seconds: row.get::<_, i64>(6)? as u64,
                max_retries: row.get::<_, i64>(7)? as u32,
                environment: row.get(8)?,
            })),
            None => Ok(None),
        }
    }

    pub fn insert_pipeline(&self, p: &Pipeline) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO pipelines(name, libraries_json, test_categories_json,
                                   severity_thresholds_json, llm_config_id, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            params![
                p.name,
                serde_json::to_string(&p.libraries)?,
                serde_json::to_string(&p.test_categories)?,
                serde_json::to_string(&p.severity_thresholds)?,
                p.llm_config_id,
                now_rfc3339(),
            ],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_pipeline(&self, id: i64) -> anyhow::Result<Option<Pipeline>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, name, libraries_json, test_categories_json, severity_thresholds_json,
                    llm_config_id
             FROM pipelines WHERE id=?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(Pipeline {
                id: row.get(0)?,
                name: row.get(1)?,
                libraries: serde_json::from_str(&row.get::<_, String>(2)?)?,
                test_categories: serde_json::from_str(&row.get::<_, String>(3)?)?,
                severity_thresholds: serde_json::from_str(&row.get::<_, String>(4)?)?,
                llm_config_id: row.get(5)?,
            })),
            None => Ok(None),
        }
    }

    // executions

    pub fn create_execution(&self, pipeline_id: i64, llm_config_id: i64) -> anyhow::Result<i64> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO executions(pipeline_id, llm_config_id, status) VALUES (?1, ?2, 'pending')",
            params![pipeline_id, llm_config_id],
        )?;
        Ok(conn.last_insert_rowid())
    }

    pub fn get_execution(&self, id: i64) -> anyhow::Result<Option<Execution>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, pipeline_id, llm_config_id, status, started_at, completed_at, error_message
             FROM executions WHERE id=?1",
        )?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(execution_from_row(row)?)),
            None => Ok(None),
        }
    }

    /// Compare-and-set status transition. Stamps `started_at` when entering
    /// Running and `completed_at` when entering a terminal state. Returns
    /// false when the row was not in the expected state.
    pub fn transition_execution(
        &self,
        id: i64,
        from: ExecutionStatus,
        to: ExecutionStatus,
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let now = now_rfc3339();
        let changed = if to == ExecutionStatus::Running {
            conn.execute(
                "UPDATE executions SET status=?1, started_at=?2 WHERE id=?3 AND status=?4",
                params![to.as_str(), now, id, from.as_str()],
            )?
        } else if to.is_terminal() {
            conn.execute(
                "UPDATE executions SET status=?1, completed_at=?2 WHERE id=?3 AND status=?4",
                params![to.as_str(), now, id, from.as_str()],
            )?
        } else {
            conn.execute(
                "UPDATE executions SET status=?1 WHERE id=?2 AND status=?3",
                params![to.as_str(), id, from.as_str()],
            )?
        };
        Ok(changed == 1)
    }

    /// Mark an execution failed with a short operator-facing message. Only
    /// pending or running rows are touched; terminal states stay terminal.
    pub fn fail_execution(&self, id: i64, error_message: &str) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let truncated: String = error_message.chars().take(1000).collect();
        let changed = conn.execute(
            "UPDATE executions SET status='failed', completed_at=?1, error_message=?2
             WHERE id=?3 AND status IN ('pending','running')",
            params![now_rfc3339(), truncated, id],
        )?;
        Ok(changed == 1)
    }

    pub fn previous_completed_execution(
        &self,
        pipeline_id: i64,
        llm_config_id: i64,
        before_id: i64,
    ) -> anyhow::Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id FROM executions
             WHERE pipeline_id=?1 AND llm_config_id=?2 AND status='completed' AND id<?3
             ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![pipeline_id, llm_config_id, before_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    /// Rejected while a baseline references the execution.
    pub fn delete_execution(&self, id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let referenced: i64 = conn.query_row(
            "SELECT COUNT(*) FROM baselines WHERE execution_id=?1",
            params![id],
            |r| r.get(0),
        )?;
        if referenced > 0 {
            anyhow::bail!("execution {id} is referenced by a baseline");
        }
        conn.execute("DELETE FROM agent_traces WHERE execution_id=?1", params![id])?;
        conn.execute("DELETE FROM embeddings WHERE execution_id=?1", params![id])?;
        conn.execute("DELETE FROM findings WHERE execution_id=?1", params![id])?;
        let changed = conn.execute("DELETE FROM executions WHERE id=?1", params![id])?;
        Ok(changed == 1)
    }

    // findings

    /// Insert one finding, guarded by the state machine: rows are only
    /// accepted while the owning execution is Running. Returns the new id, or
    /// None when the guard rejected the write.
    pub fn insert_finding(&self, f: &Finding) -> anyhow::Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT INTO findings(execution_id, library, test_category, severity, risk_type,
                                  evidence_prompt, evidence_response, confidence, metadata_json, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10
             WHERE (SELECT status FROM executions WHERE id=?1) = 'running'",
            params![
                f.execution_id,
                f.library,
                f.test_category,
                f.severity.as_str(),
                f.risk_type,
                f.evidence_prompt,
                f.evidence_response,
                f.confidence,
                serde_json::to_string(&f.metadata)?,
                now_rfc3339(),
            ],
        )?;
        if changed == 1 {
            Ok(Some(conn.last_insert_rowid()))
        } else {
            Ok(None)
        }
    }

    pub fn findings_for_execution(&self, execution_id: i64) -> anyhow::Result<Vec<Finding>> {
        self.list_findings(execution_id, &FindingFilter::default())
    }

    pub fn list_findings(
        &self,
        execution_id: i64,
        filter: &FindingFilter,
    ) -> anyhow::Result<Vec<Finding>> {
        let mut sql = String::from(
            "SELECT id, execution_id, library, test_category, severity, risk_type,
                    evidence_prompt, evidence_response, confidence, metadata_json
             FROM findings WHERE execution_id=?1",
        );
        let mut args: Vec<String> = vec![execution_id.to_string()];
        if let Some(s) = filter.severity {
            args.push(s.as_str().to_string());
            sql.push_str(&format!(" AND severity=?{}", args.len()));
        }
        if let Some(l) = &filter.library {
            args.push(l.clone());
            sql.push_str(&format!(" AND library=?{}", args.len()));
        }
        if let Some(c) = &filter.test_category {
            args.push(c.clone());
            sql.push_str(&format!(" AND test_category=?{}", args.len()));
        }
        sql.push_str(" ORDER BY id");

        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(&sql)?;
        let mut rows = stmt.query(params_from_iter(args.iter()))?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(finding_from_row(row)?);
        }
        Ok(out)
    }

    // embeddings

    /// Same Running guard as findings: embeddings are written by the
    /// post-execution hook before the final transition.
    pub fn insert_embedding(
        &self,
        finding_id: i64,
        execution_id: i64,
        model: &str,
        vector: &[f32],
    ) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let changed = conn.execute(
            "INSERT OR REPLACE INTO embeddings(finding_id, execution_id, model, dims, vec, created_at)
             SELECT ?1, ?2, ?3, ?4, ?5, ?6
             WHERE (SELECT status FROM executions WHERE id=?2) = 'running'",
            params![
                finding_id,
                execution_id,
                model,
                vector.len() as i64,
                encode_vec_f32(vector),
                now_rfc3339(),
            ],
        )?;
        Ok(changed == 1)
    }

    pub fn embeddings_for_execution(&self, execution_id: i64) -> anyhow::Result<Vec<EmbeddingRow>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, finding_id, execution_id, model, vec FROM embeddings
             WHERE execution_id=?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![execution_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let blob: Vec<u8> = row.get(4)?;
            out.push(EmbeddingRow {
                id: row.get(0)?,
                finding_id: row.get(1)?,
                execution_id: row.get(2)?,
                model: row.get(3)?,
                vector: decode_vec_f32(&blob)?,
            });
        }
        Ok(out)
    }

    // baselines

    pub fn create_baseline(
        &self,
        execution_id: i64,
        name: &str,
        tag: Option<&str>,
    ) -> anyhow::Result<Baseline> {
        let execution = self
            .get_execution(execution_id)?
            .with_context(|| format!("execution {execution_id} not found"))?;
        if execution.status != ExecutionStatus::Completed {
            anyhow::bail!(
                "execution {execution_id} is not completed (status: {})",
                execution.status.as_str()
            );
        }

        let conn = self.conn.lock().unwrap();
        let created_at = now_rfc3339();
        conn.execute(
            "INSERT INTO baselines(execution_id, name, tag, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![execution_id, name, tag, created_at],
        )
        .map_err(|e| match e {
            rusqlite::Error::SqliteFailure(f, _)
                if f.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                anyhow::anyhow!("baseline tag '{}' already in use", tag.unwrap_or(""))
            }
            other => other.into(),
        })?;
        Ok(Baseline {
            id: conn.last_insert_rowid(),
            execution_id,
            name: name.to_string(),
            tag: tag.map(str::to_string),
            created_at: parse_rfc3339(&created_at),
        })
    }

    pub fn baseline_by_tag(&self, tag: &str) -> anyhow::Result<Option<Baseline>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, name, tag, created_at FROM baselines WHERE tag=?1",
        )?;
        let mut rows = stmt.query(params![tag])?;
        match rows.next()? {
            Some(row) => Ok(Some(baseline_from_row(row)?)),
            None => Ok(None),
        }
    }

    pub fn list_baselines(&self) -> anyhow::Result<Vec<Baseline>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, name, tag, created_at FROM baselines ORDER BY id",
        )?;
        let mut rows = stmt.query([])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(baseline_from_row(row)?);
        }
        Ok(out)
    }

    /// Deletable only while no drift record references the baselined execution.
    pub fn delete_baseline(&self, id: i64) -> anyhow::Result<bool> {
        let conn = self.conn.lock().unwrap();
        let execution_id: Option<i64> = conn
            .query_row(
                "SELECT execution_id FROM baselines WHERE id=?1",
                params![id],
                |r| r.get(0),
            )
            .ok();
        let Some(execution_id) = execution_id else {
            return Ok(false);
        };
        let referenced: i64 = conn.query_row(
            "SELECT COUNT(*) FROM drift_findings WHERE baseline_execution_id=?1",
            params![execution_id],
            |r| r.get(0),
        )?;
        if referenced > 0 {
            anyhow::bail!("baseline {id} is referenced by drift records");
        }
        Ok(conn.execute("DELETE FROM baselines WHERE id=?1", params![id])? == 1)
    }

    // drift findings

    /// Idempotent per pair: re-running a comparison replaces the previous
    /// drift findings in one transaction.
    pub fn replace_drift_findings(
        &self,
        execution_id: i64,
        baseline_execution_id: i64,
        rows: &[DriftFinding],
    ) -> anyhow::Result<()> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        tx.execute(
            "DELETE FROM drift_findings WHERE execution_id=?1 AND baseline_execution_id=?2",
            params![execution_id, baseline_execution_id],
        )?;
        for f in rows {
            tx.execute(
                "INSERT INTO drift_findings(execution_id, baseline_execution_id, channel, metric,
                                            value, threshold, severity, confidence, details_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
                params![
                    execution_id,
                    baseline_execution_id,
                    f.channel.as_str(),
                    f.metric,
                    f.value,
                    f.threshold,
                    f.severity.as_str(),
                    f.confidence,
                    serde_json::to_string(&f.details)?,
                    now_rfc3339(),
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn drift_findings_for_pair(
        &self,
        execution_id: i64,
        baseline_execution_id: i64,
    ) -> anyhow::Result<Vec<DriftFinding>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT id, execution_id, baseline_execution_id, channel, metric, value, threshold,
                    severity, confidence, details_json
             FROM drift_findings WHERE execution_id=?1 AND baseline_execution_id=?2 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![execution_id, baseline_execution_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(drift_finding_from_row(row)?);
        }
        Ok(out)
    }

    /// Baseline side of the most recent comparison against this execution.
    pub fn latest_drift_baseline(&self, execution_id: i64) -> anyhow::Result<Option<i64>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT baseline_execution_id FROM drift_findings
             WHERE execution_id=?1 ORDER BY id DESC LIMIT 1",
        )?;
        let mut rows = stmt.query(params![execution_id])?;
        match rows.next()? {
            Some(row) => Ok(Some(row.get(0)?)),
            None => Ok(None),
        }
    }

    // agent traces

    pub fn insert_agent_trace(&self, execution_id: i64, trace: &AgentTrace) -> anyhow::Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO agent_traces(execution_id, finding_id, calls_json, created_at)
             VALUES (?1, ?2, ?3, ?4)",
            params![
                execution_id,
                trace.finding_id,
                serde_json::to_string(&trace.calls)?,
                now_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn traces_for_execution(&self, execution_id: i64) -> anyhow::Result<Vec<AgentTrace>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT finding_id, calls_json FROM agent_traces WHERE execution_id=?1 ORDER BY id",
        )?;
        let mut rows = stmt.query(params![execution_id])?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            out.push(AgentTrace {
                finding_id: row.get(0)?,
                calls: serde_json::from_str(&row.get::<_, String>(1)?)?,
            });
        }
        Ok(out)
    }
}

fn execution_from_row(row: &Row<'_>) -> anyhow::Result<Execution> {
    let status: String = row.get(3)?;
    Ok(Execution {
        id: row.get(0)?,
        pipeline_id: row.get(1)?,
        llm_config_id: row.get(2)?,
        status: ExecutionStatus::parse(&status)
            .ok_or_else(|| anyhow::anyhow!("unknown execution status '{status}'"))?,
        started_at: row.get::<_, Option<String>>(4)?.map(|s| parse_rfc3339(&s)),
        completed_at: row.get::<_, Option<String>>(5)?.map(|s| parse_rfc3339(&s)),
        error_message: row.get(6)?,
    })
}

fn finding_from_row(row: &Row<'_>) -> anyhow::Result<Finding> {
    let severity: String = row.get(4)?;
    Ok(Finding {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        library: row.get(2)?,
        test_category: row.get(3)?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| anyhow::anyhow!("unknown severity '{severity}' in store"))?,
        risk_type: row.get(5)?,
        evidence_prompt: row.get(6)?,
        evidence_response: row.get(7)?,
        confidence: row.get(8)?,
        metadata: serde_json::from_str(&row.get::<_, String>(9)?)?,
    })
}

fn baseline_from_row(row: &Row<'_>) -> anyhow::Result<Baseline> {
    Ok(Baseline {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        name: row.get(2)?,
        tag: row.get(3)?,
        created_at: parse_rfc3339(&row.get::<_, String>(4)?),
    })
}

fn drift_finding_from_row(row: &Row<'_>) -> anyhow::Result<DriftFinding> {
    let channel: String = row.get(3)?;
    let severity: String = row.get(7)?;
    Ok(DriftFinding {
        id: row.get(0)?,
        execution_id: row.get(1)?,
        baseline_execution_id: row.get(2)?,
        channel: DriftChannel::parse(&channel)
            .ok_or_else(|| anyhow::anyhow!("unknown drift channel '{channel}' in store"))?,
        metric: row.get(4)?,
        value: row.get(5)?,
        threshold: row.get(6)?,
        severity: Severity::parse(&severity)
            .ok_or_else(|| anyhow::anyhow!("unknown severity '{severity}' in store"))?,
        confidence: row.get(8)?,
        details: serde_json::from_str(&row.get::<_, String>(9)?)?,
    })
}

fn now_rfc3339() -> String {
    Utc::now().to_rfc3339()
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
