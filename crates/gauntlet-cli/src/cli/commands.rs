use super::args::{
    BaselineArgs, BaselineSub, Cli, Command, CompareArgs, FindingsArgs, InitArgs, RunArgs,
    SummaryArgs,
};
use anyhow::Context;
use gauntlet_core::model::{FindingFilter, LlmConfig, Pipeline, Severity};
use gauntlet_core::{BaselineRef, EngineError, Harness, Settings, Store};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::Path;

pub async fn dispatch(cli: Cli) -> anyhow::Result<i32> {
    match cli.cmd {
        Command::Init(args) => init(args),
        Command::Run(args) => run(args).await,
        Command::Compare(args) => compare(args).await,
        Command::Findings(args) => findings(args),
        Command::Summary(args) => summary(args),
        Command::Baseline(args) => baseline(args),
    }
}

/// Target spec consumed by `gauntlet run`.
#[derive(Deserialize)]
struct RunSpec {
    llm_config: LlmConfigSpec,
    pipeline: PipelineSpec,
}

#[derive(Deserialize)]
struct LlmConfigSpec {
    name: String,
    endpoint_url: String,
    #[serde(default = "default_method")]
    method: String,
    #[serde(default)]
    headers: BTreeMap<String, String>,
    #[serde(default)]
    payload_template: Option<String>,
    #[serde(default = "default_timeout")]
    timeout_seconds: u64,
    #[serde(default = "default_retries")]
    max_retries: u32,
    #[serde(default)]
    environment: String,
}

#[derive(Deserialize)]
struct PipelineSpec {
    name: String,
    libraries: Vec<String>,
    test_categories: Vec<String>,
    #[serde(default)]
    severity_thresholds: BTreeMap<String, i64>,
}

fn default_method() -> String {
    "POST".to_string()
}

fn default_timeout() -> u64 {
    30
}

fn default_retries() -> u32 {
    3
}

fn open_store(path: &Path) -> anyhow::Result<Store> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let store = Store::open(path)?;
    store.init_schema()?;
    Ok(store)
}

fn init(args: InitArgs) -> anyhow::Result<i32> {
    open_store(&args.db)?;
    println!("initialized {}", args.db.display());
    Ok(0)
}

async fn run(args: RunArgs) -> anyhow::Result<i32> {
    let raw = std::fs::read_to_string(&args.config)
        .with_context(|| format!("failed to read {}", args.config.display()))?;
    let spec: RunSpec = serde_json::from_str(&raw)
        .with_context(|| format!("failed to parse {}", args.config.display()))?;

    let store = open_store(&args.db)?;
    let cfg_id = store.insert_llm_config(&LlmConfig {
        id: 0,
        name: spec.llm_config.name,
        endpoint_url: spec.llm_config.endpoint_url,
        method: spec.llm_config.method,
        headers: spec.llm_config.headers,
        payload_template: spec.llm_config.payload_template,
        timeout_seconds: spec.llm_config.timeout_seconds,
        max_retries: spec.llm_config.max_retries,
        environment: spec.llm_config.environment,
    })?;
    let pipeline_id = store.insert_pipeline(&Pipeline {
        id: 0,
        name: spec.pipeline.name,
        libraries: spec.pipeline.libraries,
        test_categories: spec.pipeline.test_categories,
        severity_thresholds: spec.pipeline.severity_thresholds,
        llm_config_id: cfg_id,
    })?;

    let harness = Harness::new(store.clone(), Settings::from_env());
    let execution_id = store.create_execution(pipeline_id, cfg_id)?;
    harness.run_execution(execution_id).await?;

    let execution = store
        .get_execution(execution_id)?
        .context("execution row vanished")?;
    let summary = harness.summarize(execution_id)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    match execution.status {
        gauntlet_core::model::ExecutionStatus::Completed => Ok(0),
        status => {
            eprintln!(
                "execution {execution_id} ended {}: {}",
                status.as_str(),
                execution.error_message.unwrap_or_default()
            );
            Ok(1)
        }
    }
}

async fn compare(args: CompareArgs) -> anyhow::Result<i32> {
    let baseline_ref = if let Some(id) = args.baseline_id {
        BaselineRef::ExplicitId(id)
    } else if let Some(tag) = args.tag {
        BaselineRef::Tag(tag)
    } else if args.previous {
        BaselineRef::Previous
    } else {
        eprintln!("specify one of --baseline-id, --tag or --previous");
        return Ok(2);
    };

    let store = open_store(&args.db)?;
    let harness = Harness::new(store, Settings::from_env());
    match harness.compare_drift(args.execution, &baseline_ref).await {
        Ok(report) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "current_execution_id": report.current_execution_id,
                    "baseline_execution_id": report.baseline_execution_id,
                    "drift_score": report.drift_score,
                    "drift_grade": report.drift_grade,
                    "findings": report.findings,
                }))?
            );
            Ok(0)
        }
        Err(e @ (EngineError::BaselineNotFound(_) | EngineError::BaselineNotUsable(_))) => {
            eprintln!("{e}");
            Ok(1)
        }
        Err(e) => Err(e.into()),
    }
}

fn findings(args: FindingsArgs) -> anyhow::Result<i32> {
    let severity = match args.severity.as_deref() {
        Some(s) => Some(
            Severity::parse(s).with_context(|| format!("unknown severity '{s}'"))?,
        ),
        None => None,
    };
    let store = open_store(&args.db)?;
    let rows = store.list_findings(
        args.execution,
        &FindingFilter {
            severity,
            library: args.library,
            test_category: args.category,
        },
    )?;
    for row in rows {
        println!("{}", serde_json::to_string(&row)?);
    }
    Ok(0)
}

fn summary(args: SummaryArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    let harness = Harness::new(store, Settings::from_env());
    let summary = harness.summarize(args.execution)?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(0)
}

fn baseline(args: BaselineArgs) -> anyhow::Result<i32> {
    let store = open_store(&args.db)?;
    match args.cmd {
        BaselineSub::Create {
            execution,
            name,
            tag,
        } => {
            let baseline = store.create_baseline(execution, &name, tag.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&baseline)?);
        }
        BaselineSub::List => {
            for row in store.list_baselines()? {
                println!("{}", serde_json::to_string(&row)?);
            }
        }
        BaselineSub::Delete { id } => {
            if store.delete_baseline(id)? {
                println!("deleted baseline {id}");
            } else {
                eprintln!("baseline {id} not found");
                return Ok(1);
            }
        }
    }
    Ok(0)
}
