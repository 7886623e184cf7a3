//! TipJar Indexer - TipSent/TipMessage event ingestion
//!
//! This binary provides:
//! - Confirmation-lagged event sync from an Ethereum RPC endpoint
//! - Idempotent tip storage and creator stats in SQLite
//! - Maintenance commands (status, reindex, stats repair)
//!
//! Note: The HTTP API is provided by the separate `tipjar-api` service

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tipjar_indexer::config::{Config, LoggingConfig};
use tipjar_indexer::storage::Storage;
use tracing::{info, warn};

const DEFAULT_DATABASE_URL: &str = "sqlite://tipjar.db";

#[derive(Parser)]
#[command(name = "tipjar-indexer")]
#[command(version, about = "TipJar indexer for TipSent and TipMessage events", long_about = None)]
struct Cli {
    /// Path to configuration file
    #[arg(short, long, default_value = "indexer.toml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    debug: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the sync loop
    Run,

    /// Show indexer status and sync progress
    Status,

    /// Initialize the database
    InitDb {
        /// Database URL
        #[arg(long, default_value = DEFAULT_DATABASE_URL)]
        database_url: String,
    },

    /// Drop indexed data from a block onwards so the next run re-ingests it
    Reindex {
        /// First block to re-ingest
        #[arg(long)]
        from_block: u64,
    },

    /// Recompute creator stats from the stored tips
    RepairStats,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Logging settings come from the config file when it loads
    let config = Config::from_file(&cli.config);
    let logging = config
        .as_ref()
        .map(|config| config.logging.clone())
        .unwrap_or_default();
    init_logging(cli.debug, &logging)?;

    info!("TipJar Indexer starting...");
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    match cli.command.unwrap_or(Commands::Run) {
        Commands::Run => run_indexer(config.context("Failed to load configuration")?).await?,
        Commands::Status => show_status(config).await?,
        Commands::InitDb { database_url } => init_database(&database_url).await?,
        Commands::Reindex { from_block } => {
            reindex(config.context("Failed to load configuration")?, from_block).await?
        }
        Commands::RepairStats => {
            repair_stats(config.context("Failed to load configuration")?).await?
        }
    }

    Ok(())
}

/// Initialize tracing subscriber for logging
fn init_logging(debug: bool, logging: &LoggingConfig) -> Result<()> {
    use tracing_subscriber::{fmt, prelude::*, EnvFilter};

    let env_filter = if debug {
        EnvFilter::new("tipjar_indexer=debug,tipjar_ledger=debug,sqlx=debug")
    } else {
        match EnvFilter::try_from_default_env() {
            Ok(filter) => filter,
            Err(_) => EnvFilter::try_new(format!("tipjar_indexer={}", logging.level))
                .context("Invalid log level")?,
        }
    };

    let registry = tracing_subscriber::registry().with(env_filter);

    if logging.format == "json" {
        registry
            .with(fmt::layer().json().with_target(true).with_line_number(true))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_line_number(true))
            .init();
    }

    Ok(())
}

async fn open_storage(config: &Config) -> Result<Storage> {
    let storage = Storage::new(
        &config.database.url,
        Some(config.database.max_connections),
        Some(config.database.min_connections),
    )
    .await
    .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    Ok(storage)
}

/// Main indexer service
async fn run_indexer(config: Config) -> Result<()> {
    use tipjar_indexer::listener::{RpcProvider, SyncEngine};

    info!("Configuration loaded successfully");
    info!("  Chain ID: {}", config.network.chain_id);
    info!("  RPC URL: {}", config.network.rpc_url);
    info!("  TipJar: {}", config.contracts.tip_jar);
    info!("  Database: {}", config.database.url);
    info!("  Start block: {}", config.sync.start_block);
    info!("  Confirmations: {}", config.sync.confirmations);

    let storage = open_storage(&config).await?;
    info!("Database initialized");

    let provider = RpcProvider::new(&config.network.rpc_url, config.contracts.tip_jar)
        .await
        .context("Failed to create RPC provider")?;

    info!("RPC provider initialized");

    let sync_engine = SyncEngine::new(
        provider,
        storage.clone(),
        config.sync.clone(),
        config.network.chain_id,
    );

    let sync_handle = tokio::spawn(async move { sync_engine.run().await });

    info!("Indexer is running. Press Ctrl+C to stop.");
    info!("For API queries, run the tipjar-api service separately.");

    tokio::select! {
        result = sync_handle => {
            storage.close().await;
            match result {
                Ok(Ok(())) => {
                    warn!("Sync engine exited unexpectedly");
                    Ok(())
                }
                Ok(Err(e)) => Err(e).context("Sync engine failed"),
                Err(e) => Err(anyhow::anyhow!("Sync task panicked: {}", e)),
            }
        }
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for Ctrl+C")?;
            info!("Received shutdown signal, gracefully shutting down...");
            storage.close().await;
            Ok(())
        }
    }
}

/// Show sync progress and table counts
async fn show_status(config: Result<Config>) -> Result<()> {
    info!("Checking indexer status");

    // Fall back to the default database only if the file doesn't exist
    let (database_url, max_conn, min_conn) = match config {
        Ok(config) => {
            info!("Using database from config: {}", config.database.url);
            (
                config.database.url,
                Some(config.database.max_connections),
                Some(config.database.min_connections),
            )
        }
        Err(e) => {
            let is_not_found = e.chain().any(|cause| {
                cause
                    .downcast_ref::<std::io::Error>()
                    .is_some_and(|io_err| io_err.kind() == std::io::ErrorKind::NotFound)
            });

            if is_not_found {
                info!(
                    "Config file not found, using default database: {}",
                    DEFAULT_DATABASE_URL
                );
                (DEFAULT_DATABASE_URL.to_string(), None, None)
            } else {
                return Err(e).context("Failed to load config file");
            }
        }
    };

    let storage = Storage::new(&database_url, max_conn, min_conn)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    let sync_state = storage.get_sync_state().await?;
    let stats = storage.stats().await?;
    let rejected = storage.list_rejected_logs(5).await?;

    println!("\n=== TipJar Indexer Status ===\n");
    println!("Sync Progress:");
    println!("  Chain ID: {}", sync_state.chain_id);
    println!("  Last Block: {}", sync_state.last_block_number);
    println!(
        "  Last Block Hash: 0x{}",
        hex::encode(sync_state.last_block_hash)
    );
    println!(
        "  Last Updated: {}",
        chrono::DateTime::from_timestamp(sync_state.updated_at, 0)
            .map(|dt| dt.to_rfc3339())
            .unwrap_or_else(|| "unknown".to_string())
    );

    println!("\nDatabase Statistics:");
    println!("  Tips: {}", stats.tip_count);
    println!("  Creators: {}", stats.creator_count);
    println!("  Rejected Logs: {}", stats.rejected_log_count);
    println!("  Checkpoints: {}", stats.block_count);

    if !rejected.is_empty() {
        println!("\nRecent Rejected Logs:");
        for log in rejected {
            println!(
                "  block {} tx 0x{} log {}: {}",
                log.block_number,
                hex::encode(log.tx_hash),
                log.log_index,
                log.reason
            );
        }
    }

    println!();

    storage.close().await;

    Ok(())
}

/// Initialize the database
async fn init_database(database_url: &str) -> Result<()> {
    info!("Initializing database: {}", database_url);

    let storage = Storage::new(database_url, None, None)
        .await
        .context("Failed to connect to database")?;

    storage
        .run_migrations()
        .await
        .context("Failed to run migrations")?;

    storage
        .health_check()
        .await
        .context("Database health check failed")?;

    let stats = storage.stats().await?;
    info!("Database initialized successfully!");
    info!("  Tips: {}", stats.tip_count);
    info!("  Creators: {}", stats.creator_count);
    info!("  Checkpoints: {}", stats.block_count);
    info!("  Last block: {}", stats.last_block_number);

    storage.close().await;

    Ok(())
}

/// Roll the store back to `from_block - 1`
async fn reindex(config: Config, from_block: u64) -> Result<()> {
    if from_block < config.sync.start_block {
        warn!(
            from_block,
            start_block = config.sync.start_block,
            "Reindexing from before the configured start block"
        );
    }

    let storage = open_storage(&config).await?;

    match storage.reindex_from(from_block).await? {
        Some(summary) => info!(
            "Reindex prepared: {} tips, {} rejected logs removed, {} creators remain. Next run resumes at block {}",
            summary.tips_removed, summary.rejected_removed, summary.creators, from_block
        ),
        None => info!("Nothing indexed at or above block {}, nothing to do", from_block),
    }

    storage.close().await;

    Ok(())
}

/// Rebuild the creator_stats table from tips
async fn repair_stats(config: Config) -> Result<()> {
    let storage = open_storage(&config).await?;

    let creators = storage.recompute_creator_stats().await?;
    info!("Recomputed stats for {} creators", creators);

    storage.close().await;

    Ok(())
}
