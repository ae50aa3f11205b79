//! printwatch - forward PaperCut print logs to the central collector
//!
//! Tails the daily Print Logger CSV, delivers each print job to the collector
//! and keeps anything undeliverable in a pending queue until it goes through.
//!
//! Uses XDG Base Directory specification for file locations:
//! - Config: $XDG_CONFIG_HOME/printwatch/config.toml (~/.config/printwatch/config.toml)
//! - Logs: $XDG_STATE_HOME/printwatch/ (~/.local/state/printwatch/)
//! - Pending queue: $XDG_STATE_HOME/printwatch/pending/
//! - Tail offsets: $XDG_STATE_HOME/printwatch/offsets.json

mod process_lock;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use printwatch_core::ingest::{log_file_path, TailPositions};
use printwatch_core::logging::LoggingGuard;
use printwatch_core::{Agent, Config, DeliveryClient, PendingQueue, TickReport};
use process_lock::acquire_agent_guard;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "printwatch")]
#[command(about = "Forward PaperCut print logs to the central collector")]
#[command(version)]
struct Args {
    /// Config file (default: $XDG_CONFIG_HOME/printwatch/config.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run the agent until interrupted
    Run {
        /// Run a single drain + tail cycle and exit
        #[arg(long)]
        once: bool,

        /// Mirror log output to stderr
        #[arg(short, long)]
        foreground: bool,
    },

    /// Show configuration, today's log and the pending queue
    Status,

    /// Retry pending events once and exit
    Drain,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Ensure XDG environment variables are set before using core library
    Config::ensure_xdg_env();

    let config_path = args.config.clone().unwrap_or_else(Config::config_path);
    let mut config = Config::load_from(&config_path).with_context(|| {
        format!(
            "failed to load configuration from {}",
            config_path.display()
        )
    })?;
    let replaced = config.apply_defaults();

    match args.command {
        Command::Status => cmd_status(&config, &config_path),
        Command::Drain => {
            let _log_guard = init_logging(&config, false, &replaced)?;
            cmd_drain(&config).await
        }
        Command::Run { once, foreground } => {
            let _log_guard = init_logging(&config, foreground, &replaced)?;
            cmd_run(&config, once).await
        }
    }
}

fn init_logging(config: &Config, foreground: bool, replaced: &[&str]) -> Result<LoggingGuard> {
    let guard = printwatch_core::logging::init(&config.logging, foreground)
        .context("failed to initialize logging")?;

    for key in replaced {
        tracing::warn!(key, "Config value missing or empty, using default");
    }

    Ok(guard)
}

async fn cmd_run(config: &Config, once: bool) -> Result<()> {
    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        sector = %config.sector,
        company_id = config.company_id,
        api = %config.api_base_url,
        "printwatch starting"
    );

    let pending_dir = config.state.pending_dir();
    let _agent_guard =
        acquire_agent_guard(&pending_dir).context("failed to acquire process lock")?;

    let mut agent = Agent::from_config(config).context("failed to start agent")?;

    let handle = agent.handle();
    let ctrlc_handle = handle.clone();
    ctrlc::set_handler(move || {
        tracing::info!(state = %ctrlc_handle.state(), "Stop requested");
        ctrlc_handle.stop();
    })
    .context("failed to install signal handler")?;

    if once {
        let report = agent.tick().await;
        print_tick(&report);
        return Ok(());
    }

    println!(
        "Watching {} every {}s (Ctrl+C to stop)",
        config.log_dir.display(),
        config.polling_interval_secs
    );

    agent.run().await.context("agent failed")?;

    let stats = handle.stats();
    println!(
        "Stopped after {} tick(s): {} delivered, {} already on collector, {} queued, {} retried from queue",
        stats.ticks, stats.delivered, stats.already_existing, stats.enqueued, stats.retired
    );
    if stats.enqueue_failures > 0 {
        eprintln!(
            "WARNING: {} event(s) could not be saved to the pending queue",
            stats.enqueue_failures
        );
    }

    Ok(())
}

async fn cmd_drain(config: &Config) -> Result<()> {
    let pending_dir = config.state.pending_dir();
    let _agent_guard = acquire_agent_guard(&pending_dir)
        .context("cannot drain while an agent is running")?;

    let mut queue = PendingQueue::open(&pending_dir).context("failed to open pending queue")?;
    let client = DeliveryClient::from_config(config).context("failed to create HTTP client")?;

    let report = queue
        .drain(&client)
        .await
        .context("failed to process pending queue")?;

    println!(
        "Pending: {} found, {} delivered, {} purged, {} still pending",
        report.found, report.retired, report.purged, report.kept
    );
    Ok(())
}

fn cmd_status(config: &Config, config_path: &Path) -> Result<()> {
    println!("PrintWatch Configuration");
    println!("========================");
    println!();
    println!("Config file:     {}", config_path.display());
    println!("Collector:       {}", config.api_base_url);
    println!(
        "Sector:          {}",
        if config.sector.is_empty() {
            "<not set>"
        } else {
            config.sector.as_str()
        }
    );
    println!("Company ID:      {}", config.company_id);
    println!("Poll interval:   {}s", config.polling_interval_secs);
    println!("Log directory:   {}", config.log_dir.display());
    println!(
        "Agent log:       {}",
        printwatch_core::logging::log_file_path().display()
    );

    let today = chrono::Local::now().date_naive();
    let log_file = log_file_path(&config.log_dir, today);
    println!();
    println!("Today's log:     {}", log_file.display());
    match std::fs::metadata(&log_file) {
        Ok(meta) => println!("Size:            {} bytes", meta.len()),
        Err(_) => println!("Size:            <not found>"),
    }
    if let Some(offsets_file) = config.state.offsets_file() {
        let positions = TailPositions::load(&offsets_file).context("failed to read offsets")?;
        match positions.get(&log_file) {
            Some(offset) => println!("Processed up to: byte {}", offset),
            None => println!("Processed up to: <not started>"),
        }
    }

    let pending_dir = config.state.pending_dir();
    let pending = PendingQueue::list_at(&pending_dir).context("failed to read pending queue")?;
    println!();
    println!("Pending queue:   {}", pending_dir.display());
    println!("Pending events:  {}", pending.len());
    if let (Some(oldest), Some(newest)) = (pending.first(), pending.last()) {
        println!("Oldest/newest:   {} / {}", oldest, newest);
    }

    Ok(())
}

fn print_tick(report: &TickReport) {
    let drain = &report.drain;
    if drain.found > 0 {
        println!(
            "Pending: {} found, {} delivered, {} purged, {} still pending",
            drain.found, drain.retired, drain.purged, drain.kept
        );
    }

    let tail = &report.tail;
    if !tail.file_present {
        println!("No log file for today yet");
        return;
    }
    println!(
        "Log: {} row(s) read, {} delivered, {} already on collector, {} queued, {} skipped",
        tail.rows_read, tail.delivered, tail.already_existing, tail.enqueued, tail.skipped
    );
    if tail.enqueue_failures > 0 {
        eprintln!(
            "WARNING: {} event(s) could not be saved to the pending queue",
            tail.enqueue_failures
        );
    }
}
