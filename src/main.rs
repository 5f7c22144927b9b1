use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use brandflow::config::Config;

mod cmd;

#[derive(Parser)]
#[command(name = "brandflow")]
#[command(version, about = "Phase gating, quality gates and failure recovery for brand pipelines")]
pub struct Cli {
    /// Log decisions at debug level
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Emit logs as JSON lines on stderr
    #[arg(long, global = true)]
    pub log_json: bool,

    #[arg(long, global = true)]
    pub project_dir: Option<PathBuf>,

    /// Session state file, relative to the project directory
    #[arg(long, global = true)]
    pub state: Option<PathBuf>,

    /// Config file, relative to the project directory (default: brandflow.toml if present)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new session state
    Init {
        #[arg(long, default_value = "default")]
        client_id: String,
        #[arg(long)]
        project_name: Option<String>,
        /// Overwrite an existing session
        #[arg(long)]
        force: bool,
    },
    /// List phases, their agents, requirements and gates
    Phases,
    /// Report workflow health for the session
    Status,
    /// Check whether the current phase may be left
    Check,
    /// Move to the next phase
    Advance,
    /// Move to an explicit adjacent phase
    Transition {
        /// Target phase name
        phase: String,
    },
    /// Send work back to the previous phase
    Rework {
        #[arg(long)]
        reason: String,
    },
    /// Show the agent to trigger next
    NextAgent,
    /// Write a state key; VALUE is JSON, or a plain string
    Set { key: String, value: String },
    /// Append to a list-valued state key; VALUE is JSON, or a plain string
    Append { key: String, value: String },
    /// Remove a state key
    Unset { key: String },
    /// Classify a failure and decide on recovery
    ReportError(ReportErrorArgs),
    /// Grade a deliverable against the phase's quality standards
    QualityCheck(QualityCheckArgs),
}

#[derive(Args, Clone)]
pub struct ReportErrorArgs {
    /// Failure type name, e.g. TimeoutError
    #[arg(long)]
    pub error_type: String,
    #[arg(long)]
    pub message: String,
    /// Agent that hit the failure
    #[arg(long)]
    pub agent: Option<String>,
    /// Extra context; VALUE is JSON, or a plain string
    #[arg(long = "context", value_name = "KEY=VALUE")]
    pub context: Vec<String>,
    /// Upper bound on time spent waiting out retry backoff
    #[arg(long, default_value = "30")]
    pub deadline_secs: u64,
    /// Schedule retries without waiting
    #[arg(long)]
    pub no_wait: bool,
}

#[derive(Args, Clone)]
pub struct QualityCheckArgs {
    pub phase: String,
    /// State key holding the deliverable
    #[arg(long)]
    pub deliverable: String,
    /// Metric score supplied by the evaluator
    #[arg(long = "metric", value_name = "NAME=SCORE")]
    pub metrics: Vec<String>,
    /// Score for metrics not given with --metric
    #[arg(long, default_value = "0.0")]
    pub default_score: f64,
}

fn init_tracing(verbose: bool, json: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_env("BRANDFLOW_LOG").unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    let _ = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.verbose, cli.log_json);

    let project_dir = match cli.project_dir.clone() {
        Some(dir) => dir,
        None => std::env::current_dir().context("Failed to get current directory")?,
    };
    let config = Config::new(project_dir, cli.state.clone(), cli.config.clone())?;

    match &cli.command {
        Commands::Init {
            client_id,
            project_name,
            force,
        } => cmd::cmd_init(&config, client_id, project_name.as_deref(), *force)?,
        Commands::Phases => cmd::cmd_phases(&config)?,
        Commands::Status => cmd::cmd_status(&config)?,
        Commands::Check => cmd::cmd_check(&config)?,
        Commands::Advance => cmd::cmd_advance(&config)?,
        Commands::Transition { phase } => cmd::cmd_transition(&config, phase)?,
        Commands::Rework { reason } => cmd::cmd_rework(&config, reason)?,
        Commands::NextAgent => cmd::cmd_next_agent(&config)?,
        Commands::Set { key, value } => cmd::cmd_set(&config, key, value)?,
        Commands::Append { key, value } => cmd::cmd_append(&config, key, value)?,
        Commands::Unset { key } => cmd::cmd_unset(&config, key)?,
        Commands::ReportError(args) => cmd::cmd_report_error(&config, args.clone()).await?,
        Commands::QualityCheck(args) => cmd::cmd_quality_check(&config, args)?,
    }

    Ok(())
}
