use clap::{Parser, Subcommand};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "gauntlet",
    version,
    about = "Validate LLM endpoints with adversarial probe suites and track behavioral drift"
)]
pub struct Cli {
    #[command(subcommand)]
    pub cmd: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Initialize the database schema
    Init(InitArgs),
    /// Run a validation pipeline against an endpoint
    Run(RunArgs),
    /// Compare an execution against a baseline across all drift channels
    Compare(CompareArgs),
    /// List findings for an execution
    Findings(FindingsArgs),
    /// Print the summary view for an execution
    Summary(SummaryArgs),
    /// Manage baselines
    Baseline(BaselineArgs),
}

#[derive(Parser)]
pub struct InitArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,
}

#[derive(Parser)]
pub struct RunArgs {
    /// Target spec: JSON with `llm_config` and `pipeline` objects
    #[arg(long, default_value = "gauntlet.json")]
    pub config: PathBuf,
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,
}

#[derive(Parser)]
pub struct CompareArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,
    /// Current execution id
    #[arg(long)]
    pub execution: i64,
    /// Explicit baseline execution id
    #[arg(long, conflicts_with_all = ["tag", "previous"])]
    pub baseline_id: Option<i64>,
    /// Baseline tag ("golden run")
    #[arg(long, conflicts_with = "previous")]
    pub tag: Option<String>,
    /// Use the previous completed execution for the same pipeline + config
    #[arg(long)]
    pub previous: bool,
}

#[derive(Parser)]
pub struct FindingsArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,
    #[arg(long)]
    pub execution: i64,
    /// Filter: critical|high|medium|low|info
    #[arg(long)]
    pub severity: Option<String>,
    #[arg(long)]
    pub library: Option<String>,
    #[arg(long)]
    pub category: Option<String>,
}

#[derive(Parser)]
pub struct SummaryArgs {
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,
    #[arg(long)]
    pub execution: i64,
}

#[derive(Parser)]
pub struct BaselineArgs {
    #[command(subcommand)]
    pub cmd: BaselineSub,
    #[arg(long, default_value = ".gauntlet/gauntlet.db")]
    pub db: PathBuf,
}

#[derive(Subcommand)]
pub enum BaselineSub {
    /// Designate a completed execution as a baseline
    Create {
        #[arg(long)]
        execution: i64,
        #[arg(long)]
        name: String,
        #[arg(long)]
        tag: Option<String>,
    },
    List,
    Delete {
        #[arg(long)]
        id: i64,
    },
}
