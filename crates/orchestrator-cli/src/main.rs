//! Driver binary (§2, §6): `orchestrator run` loads configuration, runs the
//! State Cleaner, and drives the root agent to completion, emitting a JSONL
//! event stream on stdout and exiting 0/1/130.

mod driver;
mod events_jsonl;
mod provider;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use events_jsonl::JsonlEventSink;

/// Log level for tracing output, mirroring the teacher's `--log-level`
/// derive shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl LogLevel {
    fn as_filter(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Parser)]
#[command(name = "orchestrator")]
#[command(author, version, about = "Hierarchical multi-agent orchestrator driver", long_about = None)]
struct Cli {
    /// Log level (trace, debug, info, warn, error)
    #[arg(long, value_enum, default_value = "warn")]
    log_level: LogLevel,

    /// Write tracing output as JSON to this file instead of stderr
    #[arg(long)]
    log_file: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive one task: push the root agent, run its perceive-act loop to
    /// completion, print the JSONL event stream on stdout.
    Run {
        /// Path identifying the task (fingerprinted for persisted state; §4.1)
        #[arg(long)]
        task_path: PathBuf,

        /// The user instruction to hand to the root agent
        #[arg(long)]
        input: String,

        /// Root agent name, resolved from the agent library
        #[arg(long, default_value = "root_agent")]
        agent: String,

        /// Named `agent_library/<system>/` directory to load
        #[arg(long, default_value = "default")]
        system: String,
    },
    /// Show the persisted Task Context for a task path without running anything.
    Status {
        #[arg(long)]
        task_path: PathBuf,
    },
    /// Show resolved configuration (llm_config.yaml + tool_config.yaml, after
    /// environment overrides).
    Config,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(&cli)?;

    let exit_code = match cli.command {
        Commands::Run { task_path, input, agent, system } => {
            let args = driver::RunArgs { task_path, input, agent_name: agent, system };
            let events: Arc<dyn orchestrator_core::EventSink> = Arc::new(JsonlEventSink::new());
            tokio::select! {
                code = driver::run(args, events) => code,
                _ = tokio::signal::ctrl_c() => 130,
            }
        }
        Commands::Status { task_path } => show_status(&task_path).await?,
        Commands::Config => show_config()?,
    };

    std::process::exit(exit_code);
}

fn init_logging(cli: &Cli) -> Result<()> {
    let filter = EnvFilter::new(cli.log_level.as_filter());

    if let Some(log_path) = &cli.log_file {
        let file = std::fs::File::create(log_path)
            .with_context(|| format!("failed to create log file: {:?}", log_path))?;
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_writer(std::sync::Mutex::new(file)))
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(filter).init();
    }

    Ok(())
}

async fn show_status(task_path: &PathBuf) -> Result<i32> {
    let store = orchestrator_core::PersistenceStore::new(orchestrator_core::PersistenceStore::default_root());
    let fingerprint = orchestrator_core::task_fingerprint(task_path);
    let hierarchy = orchestrator_core::HierarchyManager::load(std::sync::Arc::new(store), fingerprint);
    let snapshot = hierarchy.get_context().await;
    println!("{}", serde_json::to_string_pretty(&snapshot)?);
    Ok(0)
}

fn show_config() -> Result<i32> {
    let llm_config = orchestrator_config::load_llm_config()?;
    let tool_config = orchestrator_config::load_tool_config()?;
    println!("# run_env_config/llm_config.yaml (resolved)");
    println!("{}", serde_yaml::to_string(&llm_config)?);
    println!("# run_env_config/tool_config.yaml (resolved)");
    println!("{}", serde_yaml::to_string(&tool_config)?);
    Ok(0)
}
