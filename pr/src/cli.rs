//! CLI command definitions and subcommands

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use colored::{ColoredString, Colorize};
use runstore::RunStatus;

/// PlanRun - plan run orchestrator
#[derive(Debug, Parser)]
#[command(
    name = "pr",
    about = "Queue, execute and cancel runs of plans",
    version = env!("CARGO_PKG_VERSION"),
    after_help = after_help(),
)]
pub struct Cli {
    /// Path to config file
    #[arg(short, long, global = true, help = "Path to config file")]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(
        short = 'l',
        long = "log-level",
        global = true,
        help = "Log level (TRACE, DEBUG, INFO, WARN, ERROR)"
    )]
    pub log_level: Option<String>,

    /// Subcommand to execute
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Serve the HTTP API and execute queued runs
    Serve {
        /// Address to listen on (overrides server.bind)
        #[arg(short, long)]
        bind: Option<String>,
    },

    /// Manage plans
    Plan {
        #[command(subcommand)]
        command: PlanCommand,
    },

    /// Enqueue a run of a plan and execute it in this process
    Run {
        /// Plan ID
        plan_id: String,

        /// Seconds to wait for the run to finish
        #[arg(short, long, default_value = "60")]
        wait_secs: u64,
    },

    /// List runs of a plan, newest first
    Runs {
        /// Plan ID
        plan_id: String,

        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },

    /// Request cancellation of a run
    Cancel {
        /// Plan ID
        plan_id: String,

        /// Run ID
        run_id: String,
    },
}

/// Plan management subcommands
#[derive(Debug, Subcommand)]
pub enum PlanCommand {
    /// Register a plan
    Create {
        /// Plan title
        title: String,

        /// Plan ID (generated when omitted)
        #[arg(long)]
        id: Option<String>,

        /// Root-relative path of a generated plan document (repeatable)
        #[arg(short, long = "artifact")]
        artifacts: Vec<String>,
    },

    /// List plans
    List {
        /// Output format (text, json)
        #[arg(short, long, default_value = "text")]
        format: OutputFormat,
    },
}

/// Output format for listing commands
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "text" | "plain" => Ok(Self::Text),
            "json" => Ok(Self::Json),
            _ => Err(format!("Unknown format: {}. Use text or json", s)),
        }
    }
}

/// Path of the process log file
pub fn get_log_path() -> PathBuf {
    dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("planrun")
        .join("logs")
        .join("planrun.log")
}

fn after_help() -> String {
    format!("Logs are written to: {}", get_log_path().display())
}

/// Run status colored for terminal output
pub fn colored_status(status: RunStatus) -> ColoredString {
    let text = status.as_str();
    match status {
        RunStatus::Queued => text.normal(),
        RunStatus::Running => text.cyan(),
        RunStatus::Done => text.green(),
        RunStatus::Cancelled => text.yellow(),
        RunStatus::Failed => text.red(),
    }
}
