//! tg - dependency graph task runner
//!
//! CLI entry point for running, checking and placing job graphs.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use clap::{CommandFactory, FromArgMatches};
use colored::*;
use eyre::{Context, Result};
use tracing::{debug, info, warn};

use taskgraph::cli::{Cli, Command, OutputFormat, generate_after_help};
use taskgraph::config::Config;
use taskgraph::events::spawn_event_logger;
use taskgraph::job::{ClusterFile, JobFile};
use taskgraph::placement::NodeRegistry;
use taskgraph::scheduler::{Scheduler, topological_sort};

/// How long to wait for the event log to drain after a run
const EVENT_LOG_DRAIN: Duration = Duration::from_secs(2);

fn setup_logging(cli_log_level: Option<&str>, config_log_level: Option<&str>) -> Result<()> {
    // Note: Can't log params here since logging isn't initialized yet
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("taskgraph")
        .join("logs");

    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    // Determine log level with priority: CLI --log-level > config file > default (INFO)
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

    let log_file = fs::File::create(log_dir.join("tg.log")).context("Failed to create log file")?;

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
    let cmd = Cli::command().after_help(generate_after_help());
    let cli = Cli::from_arg_matches(&cmd.get_matches())?;

    // Load log level from config file early (before full config load)
    let config_log_level = Config::load_log_level(cli.config.as_ref());

    setup_logging(cli.log_level.as_deref(), config_log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;

    debug!(command = ?cli.command, "main: dispatching command");
    let success = match cli.command {
        Command::Run {
            jobfile,
            max_concurrent,
            events,
            format,
        } => cmd_run(&config, &jobfile, max_concurrent, events.as_deref(), format).await?,
        Command::Check { jobfile } => cmd_check(&config, &jobfile)?,
        Command::Place { clusterfile, format } => cmd_place(&clusterfile, format)?,
    };

    if !success {
        std::process::exit(1);
    }
    Ok(())
}

/// Run a job file; returns whether every item completed
async fn cmd_run(
    config: &Config,
    jobfile: &Path,
    max_concurrent: Option<usize>,
    events: Option<&Path>,
    format: OutputFormat,
) -> Result<bool> {
    debug!(?jobfile, ?max_concurrent, ?events, %format, "cmd_run: called");
    let job = JobFile::load(jobfile)?;
    let items = job.work_items(&config.defaults);

    let mut scheduler_config = config.scheduler.clone();
    if let Some(max) = max_concurrent {
        scheduler_config.max_concurrent = max;
    }

    let scheduler = Scheduler::new(scheduler_config);
    let event_log = match events {
        Some(path) => Some(spawn_event_logger(scheduler.subscribe(), path)?),
        None => None,
    };

    let report = scheduler
        .execute_all(items)
        .await
        .context(format!("Invalid job file {}", jobfile.display()))?;

    if let Some(handle) = event_log {
        match tokio::time::timeout(EVENT_LOG_DRAIN, handle).await {
            Ok(Ok(written)) => debug!(written, "cmd_run: event log drained"),
            Ok(Err(e)) => warn!(error = %e, "Event logger task failed"),
            Err(_) => warn!("Event logger did not finish in time"),
        }
    }

    match format {
        OutputFormat::Json => {
            let completed: serde_json::Map<_, _> = report
                .completed
                .iter()
                .map(|(id, output)| {
                    let value = serde_json::json!({
                        "stdout": output.stdout,
                        "attempts": report.attempts.get(id).copied().unwrap_or(0),
                    });
                    (id.clone(), value)
                })
                .collect();
            let output = serde_json::json!({
                "completed": completed,
                "failed": report.failed,
                "stats": report.stats,
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for item in &job.items {
                let attempts = report.attempts.get(&item.id).copied().unwrap_or(0);
                if let Some(output) = report.completed.get(&item.id) {
                    println!("{} {} {}", "✓".green(), item.id.cyan(), plural(attempts, "attempt").dimmed());
                    for line in output.stdout.lines() {
                        println!("    {}", line);
                    }
                } else if let Some(err) = report.failed.get(&item.id) {
                    println!(
                        "{} {} {} {}",
                        "✗".red(),
                        item.id.cyan(),
                        err.to_string().red(),
                        plural(attempts, "attempt").dimmed()
                    );
                }
            }
            println!();
            println!(
                "Completed: {}  Failed: {}  Attempts: {}",
                report.completed.len().to_string().green(),
                report.failed.len().to_string().red(),
                report.stats.total_attempts
            );
        }
    }

    info!(success = report.is_success(), "cmd_run: finished");
    Ok(report.is_success())
}

/// Validate a job file and print its execution order
fn cmd_check(config: &Config, jobfile: &Path) -> Result<bool> {
    debug!(?jobfile, "cmd_check: called");
    let job = JobFile::load(jobfile)?;
    let items = job.work_items(&config.defaults);

    let order = topological_sort(&items).context(format!("Invalid job file {}", jobfile.display()))?;

    println!("{} {} items, no cycles", "✓".green(), items.len());
    for (position, idx) in order.into_iter().enumerate() {
        let item = &items[idx];
        if item.dependencies.is_empty() {
            println!("{:>3}. {}", position + 1, item.id.cyan());
        } else {
            println!(
                "{:>3}. {} {}",
                position + 1,
                item.id.cyan(),
                format!("(after {})", item.dependencies.join(", ")).dimmed()
            );
        }
    }
    Ok(true)
}

/// Place the tasks of a cluster file in order
fn cmd_place(clusterfile: &Path, format: OutputFormat) -> Result<bool> {
    debug!(?clusterfile, %format, "cmd_place: called");
    let cluster = ClusterFile::load(clusterfile)?;

    let mut registry = NodeRegistry::new();
    for node in &cluster.nodes {
        registry.register(node.id.clone(), node.capabilities.clone());
    }

    let mut placements = Vec::with_capacity(cluster.tasks.len());
    for task in &cluster.tasks {
        let node = registry.assign(task.id.clone(), &task.requirements);
        if task.complete && node.is_some() {
            registry.report_task_completion(&task.id)?;
        }
        placements.push((task.id.clone(), node));
    }

    match format {
        OutputFormat::Json => {
            let output = serde_json::json!({
                "placements": placements
                    .iter()
                    .map(|(task, node)| serde_json::json!({"task": task, "node": node}))
                    .collect::<Vec<_>>(),
                "nodes": registry.nodes().collect::<Vec<_>>(),
            });
            println!("{}", serde_json::to_string_pretty(&output)?);
        }
        OutputFormat::Text => {
            for (task, node) in &placements {
                match node {
                    Some(node) => println!("{} {} -> {}", "✓".green(), task.cyan(), node.yellow()),
                    None => println!("{} {} -> {}", "✗".red(), task.cyan(), "no eligible node".red()),
                }
            }
            println!();
            for node in registry.nodes() {
                println!(
                    "{} load {} ({} assigned, {} completed)",
                    node.id.yellow(),
                    node.load(),
                    node.tasks_assigned,
                    node.tasks_completed
                );
            }
        }
    }
    Ok(true)
}

fn plural(n: u32, word: &str) -> String {
    if n == 1 {
        format!("({} {})", n, word)
    } else {
        format!("({} {}s)", n, word)
    }
}
