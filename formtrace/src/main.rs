//! formtrace - relay form interaction events to a collection endpoint
//!
//! This tool provides commands for:
//! - Checking agent configuration and the persisted queue
//! - Relaying newline-delimited events from stdin
//! - Sending a single manual event
//! - Replaying or clearing events left over from earlier runs
//!
//! Uses XDG Base Directory specification for file locations:
//! - Queue: $XDG_DATA_HOME/formtrace/queue.db (~/.local/share/formtrace/queue.db)
//! - Config: $XDG_CONFIG_HOME/formtrace/config.toml (~/.config/formtrace/config.toml)
//! - Logs: $XDG_STATE_HOME/formtrace/ (~/.local/state/formtrace/)
//!
//! A process has no delivery after it exits, so every command that sends
//! ends by persisting whatever is still queued for the next `replay`.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use formtrace_core::{
    open_store, BatchScheduler, Config, CycleOutcome, EventKind, FormEvent, FormTelemetry,
};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "formtrace")]
#[command(about = "Relay form interaction telemetry")]
#[command(version)]
struct Args {
    /// Write debug logs to the state directory
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Project key (overrides config)
    #[arg(long, global = true)]
    project_key: Option<String>,

    /// Collection endpoint URL (overrides config)
    #[arg(long, global = true)]
    endpoint: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Show agent configuration and persisted queue size
    Status,

    /// Read newline-delimited event JSON from stdin and deliver it
    Relay,

    /// Send one manual event
    Track {
        /// Form identifier
        form: String,

        /// Field identifier
        field: String,

        /// Event kind (focus, blur, submit, abandon, error, change, interaction)
        kind: String,
    },

    /// Deliver events persisted by earlier runs
    Replay,

    /// Delete the persisted queue
    Clear,
}

/// How a drain loop ended
struct DrainReport {
    delivered: usize,
    failed: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::load().context("failed to load configuration")?;
    if let Some(key) = args.project_key {
        config.agent.project_key = Some(key);
    }
    if let Some(endpoint) = args.endpoint {
        config.agent.endpoint = endpoint;
    }
    if args.verbose {
        config.agent.debug = true;
    }

    let _log_guard = if config.agent.debug {
        Some(formtrace_core::logging::init(&config).context("failed to initialize logging")?)
    } else {
        None
    };

    match args.command {
        Command::Status => cmd_status(&config),
        Command::Relay => cmd_relay(&config).await,
        Command::Track { form, field, kind } => cmd_track(&config, &form, &field, &kind).await,
        Command::Replay => cmd_replay(&config).await,
        Command::Clear => cmd_clear(&config),
    }
}

fn cmd_status(config: &Config) -> Result<()> {
    println!("Form Telemetry Configuration");
    println!("============================");
    println!();

    let agent = &config.agent;
    println!(
        "Project Key:     {}",
        agent.project_key.as_deref().unwrap_or("<not set>")
    );
    println!("Endpoint:        {}", agent.endpoint);
    println!("Batch Size:      {}", agent.batch_size);
    println!("Flush Interval:  {}ms", agent.flush_interval_ms);
    println!("Track Changes:   {}", agent.track_changes);
    println!("Debug:           {}", agent.debug);

    println!();
    let db_path = config.storage.database_path();
    println!("Storage:         {}", if config.storage.enabled { "enabled" } else { "disabled" });
    println!("Queue Path:      {}", db_path.display());
    println!("Queue Capacity:  {}", config.storage.max_events);

    let persisted = if config.storage.enabled && db_path.exists() {
        open_store(&config.storage).len()
    } else {
        0
    };
    println!("Persisted:       {}", persisted);

    println!();
    match agent.validate() {
        Ok(()) => println!("Status: Ready to send"),
        Err(e) => println!("Status: Not ready ({})", e),
    }

    Ok(())
}

async fn cmd_relay(config: &Config) -> Result<()> {
    let agent = FormTelemetry::connect(config).context("failed to start agent")?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    let mut accepted = 0usize;
    let mut skipped = 0usize;
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line.context("failed to read stdin")? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match serde_json::from_str::<FormEvent>(line) {
                    Ok(event) => {
                        agent.enqueue(event);
                        accepted += 1;
                    }
                    Err(e) => {
                        tracing::warn!(error = %e, "Skipping malformed event line");
                        eprintln!("Skipping malformed line: {}", e);
                        skipped += 1;
                    }
                }
            }
            _ = &mut ctrl_c => {
                tracing::info!("Interrupted, draining queue");
                break;
            }
        }
    }

    let report = drain(agent.scheduler()).await;
    let persisted = agent.scheduler().suspend();

    println!("Relay complete:");
    println!("  Events accepted:  {}", accepted);
    println!("  Lines skipped:    {}", skipped);
    println!("  Events delivered: {}", report.delivered);
    println!("  Events persisted: {}", persisted);

    Ok(())
}

async fn cmd_track(config: &Config, form: &str, field: &str, kind: &str) -> Result<()> {
    let kind: EventKind = kind.parse()?;
    let agent = FormTelemetry::connect(config).context("failed to start agent")?;

    agent.enqueue(FormEvent::new(agent.session_id(), form, field, kind));

    let report = drain(agent.scheduler()).await;
    let persisted = agent.scheduler().suspend();
    if report.failed {
        bail!(
            "delivery to {} failed; {} events persisted for replay",
            config.agent.endpoint,
            persisted
        );
    }

    println!("Sent {} events", report.delivered);
    Ok(())
}

async fn cmd_replay(config: &Config) -> Result<()> {
    let agent = FormTelemetry::connect(config).context("failed to start agent")?;

    if agent.pending_count() == 0 {
        println!("Nothing to replay");
        agent.scheduler().suspend();
        return Ok(());
    }

    let report = drain(agent.scheduler()).await;
    let persisted = agent.scheduler().suspend();

    println!("Replay complete:");
    println!("  Events delivered: {}", report.delivered);
    println!("  Events persisted: {}", persisted);

    if report.failed {
        bail!("delivery to {} failed", config.agent.endpoint);
    }
    Ok(())
}

fn cmd_clear(config: &Config) -> Result<()> {
    if !config.storage.enabled {
        println!("Storage is disabled, nothing to clear");
        return Ok(());
    }

    let store = open_store(&config.storage);
    let count = store.len();
    store.clear();
    println!("Cleared {} persisted events", count);
    Ok(())
}

/// Send batches until the queue is empty or one fails
async fn drain(scheduler: &BatchScheduler) -> DrainReport {
    let mut report = DrainReport {
        delivered: 0,
        failed: false,
    };

    loop {
        match scheduler.flush_and_wait().await {
            CycleOutcome::Idle => break,
            CycleOutcome::Busy => tokio::time::sleep(Duration::from_millis(50)).await,
            CycleOutcome::Delivered(count) => report.delivered += count,
            CycleOutcome::Requeued(count) => {
                tracing::warn!(count, "Batch delivery failed, stopping");
                report.failed = true;
                break;
            }
        }
    }

    report
}
