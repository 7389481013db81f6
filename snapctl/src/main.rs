//! snapctl - Main entry point
//!
//! Backs up a Cassandra keyspace to object storage and restores it.

use anyhow::Result;
use clap::{Parser, Subcommand};
use snapctl::{daemon::shutdown::ShutdownCoordinator, utils, App, Config};
use snapshot_core::{BackupOutcome, BackupReport, RestoreReport};
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, value_name = "FILE", default_value = "/etc/snapctl/config.toml")]
    config: PathBuf,

    /// Log level (trace, debug, info, warn, error)
    #[arg(short, long)]
    log_level: Option<String>,

    /// Keyspace (overrides config)
    #[arg(short, long)]
    keyspace: Option<String>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Snapshot every host and upload the files
    Backup {
        /// Chain onto the latest backup
        #[arg(long, conflicts_with = "full")]
        incremental: bool,

        /// Take a full backup even if config says incremental
        #[arg(long)]
        full: bool,

        /// Hosts backed up at once
        #[arg(long)]
        concurrency: Option<usize>,

        /// Print the plan without touching the cluster
        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        json: bool,
    },
    /// Drop the keyspace and load a snapshot back into it
    Restore {
        /// Snapshot timestamp (latest if omitted)
        #[arg(long)]
        snapshot: Option<String>,

        /// Host that receives the data
        #[arg(long)]
        host: Option<String>,

        #[arg(long)]
        dry_run: bool,

        #[arg(long)]
        json: bool,
    },
    /// List stored snapshots
    History {
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config = Config::from_file(&args.config)?;
    if let Some(keyspace) = args.keyspace {
        config.cluster.keyspace = keyspace;
        config.validate()?;
    }

    let log_level = args.log_level.as_deref().unwrap_or(&config.log.level);
    utils::logger::init(log_level)?;

    tracing::info!(
        "Starting snapctl v{} (keyspace: {}, hosts: {})",
        env!("CARGO_PKG_VERSION"),
        config.cluster.keyspace,
        config.cluster.hosts.len()
    );

    let shutdown = Arc::new(ShutdownCoordinator::new());
    let cancel = shutdown.token();
    let signal_handle = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move { shutdown.wait_for_signal().await })
    };

    let app = App::new(config);
    let result = match args.command {
        Command::Backup {
            incremental,
            full,
            concurrency,
            dry_run,
            json,
        } => {
            let mode = match (incremental, full) {
                (true, _) => Some(true),
                (_, true) => Some(false),
                _ => None,
            };
            let request = app.backup_request(mode, concurrency, dry_run);
            match app.backup(cancel).run(&request).await {
                Ok(outcome) => {
                    print_backup(outcome.report(), json)?;
                    if let BackupOutcome::PartialFailure { failed_host, .. } = &outcome {
                        tracing::error!(host = %failed_host, "Backup incomplete");
                    }
                    outcome.into_result().map(|_| ()).map_err(anyhow::Error::from)
                }
                Err(e) => Err(e.into()),
            }
        }
        Command::Restore {
            snapshot,
            host,
            dry_run,
            json,
        } => {
            let request = app.restore_request(snapshot, host, dry_run);
            match app.restore(cancel).run(&request).await {
                Ok(report) => print_restore(&report, json),
                Err(e) => Err(e.into()),
            }
        }
        Command::History { json } => match app.history().await {
            Ok(history) if json => {
                let records: Vec<_> = history.records().collect();
                println!("{}", serde_json::to_string_pretty(&records)?);
                Ok(())
            }
            Ok(history) => {
                print!("{history}");
                Ok(())
            }
            Err(e) => Err(e.into()),
        },
    };

    shutdown.trigger();
    let _ = signal_handle.await;

    if let Err(e) = &result {
        tracing::error!("{:#}", e);
    }
    result
}

fn print_backup(report: &BackupReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let verb = if report.dry_run { "Would back up" } else { "Backed up" };
    println!("{} {} ({:?}, parent {})", verb, report.timestamp, report.kind, report.parent);
    println!("  schema: {}", report.schema_key);
    let total = report.completed_hosts.len() + report.cancelled_hosts.len() + report.skipped_hosts.len();
    println!("  hosts:  {}/{} completed", report.completed_hosts.len(), total);
    println!("  files:  {}", report.uploaded_keys.len());
    Ok(())
}

fn print_restore(report: &RestoreReport, json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(report)?);
        return Ok(());
    }
    let verb = if report.dry_run { "Would restore" } else { "Restored" };
    println!("{} {} on {} ({} files)", verb, report.snapshot, report.host, report.files);
    let chain: Vec<&str> = report.chain.iter().map(|t| t.as_str()).collect();
    println!("  chain: {}", chain.join(" <- "));
    for dir in &report.remote_dirs {
        println!("  {dir}");
    }
    Ok(())
}
