//! Salesync Worker - Main entry point

use anyhow::Result;
use clap::{Parser, Subcommand};
use salesync_common::logging::{init_logging, LogConfig, LogLevel};
use std::process;
use std::time::Duration;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use salesync_worker::{
    config::Config,
    db,
    ingest::RawSnapshotStore,
    normalize::NormalizationWorker,
    queue::{InboxTable, WorkQueue},
    runner::{run_stage, RunnerConfig},
};

#[derive(Parser, Debug)]
#[command(name = "salesync-worker")]
#[command(author, version, about, long_about = None)]
#[command(arg_required_else_help = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Log at debug level
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply migrations, then normalize raw snapshots until interrupted
    Run,

    /// Claim and normalize a single batch, then exit
    NormalizeOnce,

    /// Release claims held longer than the given lease
    Sweep {
        #[arg(long)]
        lease_timeout_secs: u64,
    },

    /// Show inbox and raw snapshot counts
    Status,

    /// Apply database migrations
    Migrate,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Load .env before logging reads its variables
    dotenvy::dotenv().ok();

    let log_config = LogConfig::builder()
        .level(if cli.verbose {
            LogLevel::Debug
        } else {
            LogLevel::Info
        })
        .log_file_prefix("salesync-worker".to_string())
        .filter_directives("salesync_worker=debug,sqlx=warn".to_string())
        .build();

    // Environment variables take precedence
    let log_config = log_config.clone().merge_env().unwrap_or(log_config);

    // Keep the guard alive so file output is flushed on exit
    let _guard = match init_logging(&log_config) {
        Ok(guard) => Some(guard),
        Err(e) => {
            eprintln!("Warning: logging disabled: {}", e);
            None
        }
    };

    if let Err(e) = execute_command(&cli).await {
        error!(error = %e, "Command failed");
        eprintln!("Error: {:#}", e);
        process::exit(1);
    }
}

async fn execute_command(cli: &Cli) -> Result<()> {
    let config = Config::load()?;
    let pool = db::create_pool(&config.database).await?;
    db::health_check(&pool).await?;

    match &cli.command {
        Commands::Run => {
            db::run_migrations(&pool).await?;

            let store = RawSnapshotStore::new(pool.clone(), config.normalize_retry_policy());
            let worker = NormalizationWorker::new(store, config.normalize.batch_size);
            let runner = RunnerConfig::from(&config);

            let shutdown = CancellationToken::new();
            let trigger = shutdown.clone();
            tokio::spawn(async move {
                shutdown_signal().await;
                trigger.cancel();
            });

            info!(
                batch_size = config.normalize.batch_size,
                poll_interval_ms = config.queue.poll_interval_ms,
                lease_timeout_secs = config.queue.lease_timeout_secs,
                "Starting normalization worker"
            );

            run_stage(&worker, &runner, shutdown).await;

            pool.close().await;
            info!("Worker shut down gracefully");
        }
        Commands::NormalizeOnce => {
            let store = RawSnapshotStore::new(pool.clone(), config.normalize_retry_policy());
            let worker = NormalizationWorker::new(store, config.normalize.batch_size);
            let report = worker.process_batch().await?;

            println!(
                "claimed={} normalized={} retrying={} superseded={}",
                report.claimed, report.completed, report.retrying, report.superseded
            );
        }
        Commands::Sweep { lease_timeout_secs } => {
            let lease = Duration::from_secs(*lease_timeout_secs);
            let inbox: WorkQueue<InboxTable> =
                WorkQueue::new(pool.clone(), config.ingest_retry_policy());
            let store = RawSnapshotStore::new(pool.clone(), config.normalize_retry_policy());

            let inbox_released = inbox.reclaim_stale(lease).await?;
            let raw_released = store.reclaim_stale(lease).await?;

            println!("inbox_released={} raw_released={}", inbox_released, raw_released);
        }
        Commands::Status => {
            let overview = db::queue_overview(&pool).await?;

            println!("events_inbox");
            if overview.inbox.is_empty() {
                println!("  (empty)");
            }
            for (status, count) in &overview.inbox {
                println!("  {:<12} {}", status, count);
            }
            println!("orders_raw");
            println!("  {:<12} {}", "normalized", overview.raw_normalized);
            println!("  {:<12} {}", "pending", overview.raw_pending);
            println!("  {:<12} {}", "failing", overview.raw_failing);
        }
        Commands::Migrate => {
            db::run_migrations(&pool).await?;
        }
    }

    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!("Failed to install Ctrl+C handler: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C, finishing current batch");
        },
        _ = terminate => {
            info!("Received terminate signal, finishing current batch");
        },
    }
}
