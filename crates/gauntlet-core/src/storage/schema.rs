pub const DDL: &str = r#"
CREATE TABLE IF NOT EXISTS llm_configs (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  endpoint_url TEXT NOT NULL,
  method TEXT NOT NULL DEFAULT 'POST',
  headers_json TEXT NOT NULL DEFAULT '{}',
  payload_template TEXT,
  timeout_seconds INTEGER NOT NULL DEFAULT 30,
  max_retries INTEGER NOT NULL DEFAULT 3,
  environment TEXT NOT NULL DEFAULT 'default',
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS pipelines (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  name TEXT NOT NULL,
  libraries_json TEXT NOT NULL,
  test_categories_json TEXT NOT NULL,
  severity_thresholds_json TEXT NOT NULL DEFAULT '{}',
  llm_config_id INTEGER NOT NULL REFERENCES llm_configs(id),
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS executions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  pipeline_id INTEGER NOT NULL REFERENCES pipelines(id),
  llm_config_id INTEGER NOT NULL REFERENCES llm_configs(id),
  status TEXT NOT NULL DEFAULT 'pending',
  started_at TEXT,
  completed_at TEXT,
  error_message TEXT
);
CREATE INDEX IF NOT EXISTS idx_executions_pipeline ON executions(pipeline_id, llm_config_id, status);

CREATE TABLE IF NOT EXISTS findings (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  execution_id INTEGER NOT NULL REFERENCES executions(id),
  library TEXT NOT NULL,
  test_category TEXT NOT NULL,
  severity TEXT NOT NULL,
  risk_type TEXT NOT NULL,
  evidence_prompt TEXT,
  evidence_response TEXT,
  confidence REAL,
  metadata_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_findings_execution ON findings(execution_id);

CREATE TABLE IF NOT EXISTS embeddings (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  finding_id INTEGER NOT NULL UNIQUE REFERENCES findings(id),
  execution_id INTEGER NOT NULL REFERENCES executions(id),
  model TEXT NOT NULL,
  dims INTEGER NOT NULL,
  vec BLOB NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_embeddings_execution ON embeddings(execution_id);

CREATE TABLE IF NOT EXISTS baselines (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  execution_id INTEGER NOT NULL REFERENCES executions(id),
  name TEXT NOT NULL,
  tag TEXT UNIQUE,
  created_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS drift_findings (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  execution_id INTEGER NOT NULL REFERENCES executions(id),
  baseline_execution_id INTEGER NOT NULL REFERENCES executions(id),
  channel TEXT NOT NULL,
  metric TEXT NOT NULL,
  value REAL NOT NULL,
  threshold REAL NOT NULL,
  severity TEXT NOT NULL,
  confidence REAL,
  details_json TEXT NOT NULL DEFAULT '{}',
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_drift_pair ON drift_findings(execution_id, baseline_execution_id);

CREATE TABLE IF NOT EXISTS agent_traces (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  execution_id INTEGER NOT NULL REFERENCES executions(id),
  finding_id INTEGER NOT NULL REFERENCES findings(id),
  calls_json TEXT NOT NULL,
  created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_traces_execution ON agent_traces(execution_id);
"#;
