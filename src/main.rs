// ABOUTME: CLI entry point for pg-rowsync
// ABOUTME: Loads the two connection parameter files and runs one full sync pass

use anyhow::Context;
use clap::Parser;
use std::path::PathBuf;
use std::time::Duration;

use pg_rowsync::config::ConnectionParams;
use pg_rowsync::postgres::SyncSession;
use pg_rowsync::sync;

#[derive(Parser)]
#[command(name = "pg-rowsync")]
#[command(about = "One-way PostgreSQL row reconciliation", long_about = None)]
#[command(version)]
struct Cli {
    /// Environment file with connection parameters for the source database
    #[arg(long = "source-env")]
    source_env: PathBuf,
    /// Environment file with connection parameters for the target database
    #[arg(long = "target-env")]
    target_env: PathBuf,
    /// Schema whose tables are synced
    #[arg(long, default_value = "public")]
    schema: String,
    /// Connection establishment timeout in seconds
    #[arg(long, default_value_t = 60)]
    connect_timeout: u64,
    /// Write a per-table JSON report of the run to this path
    #[arg(long)]
    report: Option<PathBuf>,
    /// Set the log level (error, warn, info, debug, trace)
    #[arg(long, default_value = "info")]
    log: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    // 1. RUST_LOG environment variable has highest precedence
    // 2. --log flag is used if RUST_LOG is not set
    // 3. Default to "info" if neither are provided
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(cli.log.clone()));

    tracing_subscriber::fmt().with_env_filter(env_filter).init();

    tracing::info!("Syncing databases");

    let source_params = ConnectionParams::from_env_file(&cli.source_env)
        .context("Failed to load source connection parameters")?;
    let target_params = ConnectionParams::from_env_file(&cli.target_env)
        .context("Failed to load target connection parameters")?;

    let timeout = Duration::from_secs(cli.connect_timeout);
    let mut session = SyncSession::open(&source_params, &target_params, timeout).await?;

    // Run the pass, then release both connections on either path before
    // surfacing the result.
    let result = sync::sync_all(&mut session, &cli.schema).await;
    session.close().await;
    let report = result?;

    if let Some(path) = &cli.report {
        report.write_json(path)?;
        tracing::info!("Wrote run report to {}", path.display());
    }

    if !report.is_fully_synced() {
        tracing::warn!(
            "Run finished with {} of {} tables not fully synced",
            report
                .tables
                .iter()
                .filter(|t| !matches!(
                    t.outcome,
                    sync::TableOutcome::Synced { .. } | sync::TableOutcome::InSync
                ))
                .count(),
            report.tables.len()
        );
    }

    Ok(())
}
