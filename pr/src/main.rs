//! PlanRun - plan run orchestrator
//!
//! CLI entry point for serving the API and driving runs from the terminal.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use eyre::{Context, Result};
use tracing::{debug, info};

use planrun::api;
use planrun::cli::{Cli, Command, OutputFormat, PlanCommand, colored_status};
use planrun::config::Config;
use planrun::orchestrator::Orchestrator;

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("planrun")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // CLI --log-level > config file > INFO
    let level = match cli_log_level.or(config_log_level) {
        Some(s) => match s.to_uppercase().as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            _ => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", s);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(log_dir.join("planrun.log"))
        .context("Failed to open log file")?;

    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_log_level = Config::load_log_level(cli.config.as_ref());
    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    info!(root = %config.storage.root.display(), "PlanRun loaded config");

    debug!(command = ?cli.command, "main: dispatching command");
    match cli.command {
        Command::Serve { bind } => cmd_serve(&config, bind).await,
        Command::Plan { command } => match command {
            PlanCommand::Create { title, id, artifacts } => cmd_plan_create(&config, id, &title, artifacts).await,
            PlanCommand::List { format } => cmd_plan_list(&config, format).await,
        },
        Command::Run { plan_id, wait_secs } => cmd_run(&config, &plan_id, wait_secs).await,
        Command::Runs { plan_id, format } => cmd_runs(&config, &plan_id, format).await,
        Command::Cancel { plan_id, run_id } => cmd_cancel(&config, &plan_id, &run_id).await,
    }
}

/// Serve the API with workers executing queued runs
async fn cmd_serve(config: &Config, bind: Option<String>) -> Result<()> {
    let bind = bind.unwrap_or_else(|| config.server.bind.clone());
    debug!(%bind, "cmd_serve: called");
    let orch = Arc::new(Orchestrator::start(config).await?);
    println!("PlanRun listening on http://{}", bind);

    let served = api::serve(Arc::clone(&orch), &bind).await;
    orch.shutdown().await;
    served
}

async fn cmd_plan_create(config: &Config, id: Option<String>, title: &str, artifacts: Vec<String>) -> Result<()> {
    debug!(?id, %title, "cmd_plan_create: called");
    let orch = Orchestrator::connect(config)?;
    let plan = orch.create_plan(id, title, artifacts).await?;
    println!("Created plan {} ({})", plan.id, plan.title);
    orch.shutdown().await;
    Ok(())
}

async fn cmd_plan_list(config: &Config, format: OutputFormat) -> Result<()> {
    let orch = Orchestrator::connect(config)?;
    let plans = orch.list_plans().await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&plans)?),
        OutputFormat::Text => {
            if plans.is_empty() {
                println!("No plans");
            }
            for plan in &plans {
                println!("{}  {}  ({} artifacts)", plan.id, plan.title, plan.artifacts.len());
            }
        }
    }
    orch.shutdown().await;
    Ok(())
}

/// Enqueue a run and execute it in this process
async fn cmd_run(config: &Config, plan_id: &str, wait_secs: u64) -> Result<()> {
    debug!(%plan_id, wait_secs, "cmd_run: called");
    let orch = Orchestrator::start(config).await?;
    let run = orch.enqueue(plan_id).await?;
    println!("Queued run {}", run.id);

    let run = orch
        .wait_terminal(plan_id, &run.id, Duration::from_secs(wait_secs))
        .await?;
    println!("{}", serde_json::to_string_pretty(&run)?);
    orch.shutdown().await;
    Ok(())
}

async fn cmd_runs(config: &Config, plan_id: &str, format: OutputFormat) -> Result<()> {
    let orch = Orchestrator::connect(config)?;
    let runs = orch.list_runs(plan_id).await?;
    match format {
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&runs)?),
        OutputFormat::Text => {
            if runs.is_empty() {
                println!("No runs for plan {}", plan_id);
            }
            for run in &runs {
                println!(
                    "{}  {:<9}  {}",
                    run.id,
                    colored_status(run.status),
                    run.created_at.to_rfc3339()
                );
            }
        }
    }
    orch.shutdown().await;
    Ok(())
}

async fn cmd_cancel(config: &Config, plan_id: &str, run_id: &str) -> Result<()> {
    debug!(%plan_id, %run_id, "cmd_cancel: called");
    let orch = Orchestrator::connect(config)?;
    let run = orch.cancel(plan_id, run_id).await?;
    println!("Run {} is {}", run.id, colored_status(run.status));
    orch.shutdown().await;
    Ok(())
}
