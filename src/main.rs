#![warn(clippy::all, clippy::pedantic)]
#![allow(
    clippy::doc_markdown,
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::module_name_repetitions,
    clippy::needless_pass_by_value,
    clippy::similar_names,
    clippy::too_many_lines,
    clippy::uninlined_format_args
)]

use anyhow::Result;
use clap::{Parser, Subcommand};
use slotkeeper::config::Config;
use slotkeeper::coordinator::{InMemoryCoordinator, Submission};
use slotkeeper::slots::{RecoveryOutcome, SlotMessageCounter};
use slotkeeper::store::{InMemoryQueueRegistry, StoreHealthMonitor};
use slotkeeper::tracer::{MessageTracer, TraceEvent, TraceStatus};
use slotkeeper::ConfigCommands;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, EnvFilter};

/// `slotkeeper` - slot accumulation and safe-zone tracking for broker nodes.
#[derive(Parser, Debug)]
#[command(name = "slotkeeper")]
#[command(version)]
#[command(about = "Per-queue slot accumulation and safe deletion watermarks.", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    config_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Drive a slot counter against an in-memory coordinator
    #[command(long_about = "\
Drive a slot counter against an in-memory coordinator.

Publishes sequential message ids round-robin across the given number \
of queues, drains the remaining open slots, and prints every \
submission the coordinator received.

Examples:
  slotkeeper simulate --queues 3 --messages 10000
  slotkeeper simulate --queues 2 --messages 50 --window-size 10 --recover-seed 100000")]
    Simulate {
        /// Number of queues to publish to
        #[arg(long, default_value = "3")]
        queues: usize,
        /// Number of messages to publish
        #[arg(long, default_value = "1000")]
        messages: u64,
        /// Override slots.window_size
        #[arg(long)]
        window_size: Option<u64>,
        /// Run a recovery pass seeded with this id after draining
        #[arg(long)]
        recover_seed: Option<u64>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        config_command: ConfigCommands,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging - respects RUST_LOG env var, defaults to INFO
    let subscriber = fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = Config::load_or_init(cli.config_dir.as_deref()).await?;

    match cli.command {
        Commands::Simulate {
            queues,
            messages,
            window_size,
            recover_seed,
        } => simulate(config, queues, messages, window_size, recover_seed).await,
        Commands::Config { config_command } => match config_command {
            ConfigCommands::Show => {
                print!("{}", toml::to_string_pretty(&config)?);
                Ok(())
            }
            ConfigCommands::Schema => {
                let schema = schemars::schema_for!(Config);
                println!("{}", serde_json::to_string_pretty(&schema)?);
                Ok(())
            }
        },
    }
}

async fn simulate(
    mut config: Config,
    queue_count: usize,
    messages: u64,
    window_size: Option<u64>,
    recover_seed: Option<u64>,
) -> Result<()> {
    if let Some(window_size) = window_size {
        config.slots.window_size = window_size;
    }
    config.validate()?;
    if queue_count == 0 {
        anyhow::bail!("--queues must be greater than 0");
    }

    let queues: Vec<String> = (0..queue_count).map(|i| format!("queue-{i}")).collect();
    let coordinator = Arc::new(InMemoryCoordinator::new());
    let registry = Arc::new(InMemoryQueueRegistry::new(queues.iter().cloned()));
    let health = StoreHealthMonitor::new();
    let counter = SlotMessageCounter::new(
        config.slots.clone(),
        coordinator.clone(),
        registry,
        &health,
    );
    let tracer = MessageTracer::from_config(&config.tracer, &config.base_dir());
    if let Some(tracer) = &tracer {
        info!(path = %tracer.path().display(), "Message tracing enabled");
    }
    counter.start();

    info!(
        queues = queue_count,
        messages,
        window_size = config.slots.window_size,
        "Starting simulated publish"
    );
    for (index, message_id) in (1..=messages).enumerate() {
        let queue = &queues[index % queue_count];
        counter.record(queue, message_id).await;
        if let Some(tracer) = &tracer {
            tracer.trace(
                TraceEvent::new(message_id.to_string(), TraceStatus::SlotRecorded)
                    .with_destination(queue.clone()),
            );
        }
    }

    for (queue, _) in counter.open_slots() {
        if let Err(e) = counter.force_close(&queue).await {
            tracing::error!(queue = %queue, "Drain failed: {e}");
        }
    }
    counter.advance_idle_safe_zone().await?;

    if let Some(seed) = recover_seed {
        match counter.recover(seed).await {
            RecoveryOutcome::Completed(summary) => info!(
                submitted = summary.submitted,
                failed = summary.failed.len(),
                next_seed = summary.next_seed,
                "Recovery finished"
            ),
            other => tracing::warn!("Recovery did not complete: {other:?}"),
        }
    }

    counter.shutdown().await;
    if let Some(tracer) = &tracer {
        tracer.shutdown().await;
    }

    for submission in coordinator.submissions() {
        match submission {
            Submission::SlotRange {
                queue,
                start_id,
                end_id,
                safe_zone,
            } => println!("slot      {queue:<12} [{start_id}, {end_id}] safe_zone={safe_zone}"),
            Submission::SafeZone(value) => println!("safe_zone {value}"),
        }
    }
    println!("current safe zone: {}", counter.current_safe_zone());
    Ok(())
}
