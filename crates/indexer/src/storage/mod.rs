//! Storage layer for the TipJar indexer.
//!
//! This module provides database operations for:
//! - Tips (one row per `TipSent`, idempotent on `(tx_hash, log_index)`)
//! - Creator stats (mirror of the ledger aggregates)
//! - Rejected logs
//! - Sync state and checkpoint history (progress tracking, reorg detection)

use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;
use tracing::info;

pub mod sync;
pub mod tips;
pub mod types;

pub use types::*;

/// Database storage for the indexer.
///
/// Provides async access to SQLite database with connection pooling.
/// The database runs in WAL mode so API readers never block on a batch write.
#[derive(Debug, Clone)]
pub struct Storage {
    pool: SqlitePool,
}

impl Storage {
    /// Create a new storage instance with the given database URL.
    ///
    /// Creates the database file if it doesn't exist. Call
    /// [`run_migrations`](Self::run_migrations) before use.
    ///
    /// # Arguments
    /// * `database_url` - SQLite database URL (e.g., "sqlite://tipjar.db")
    /// * `max_connections` - Pool ceiling (default 5)
    /// * `min_connections` - Idle connections kept open (default 1)
    ///
    /// # Example
    /// ```no_run
    /// # use tipjar_indexer::storage::Storage;
    /// # async fn example() -> anyhow::Result<()> {
    /// let storage = Storage::new("sqlite://tipjar.db", None, None).await?;
    /// # Ok(())
    /// # }
    /// ```
    pub async fn new(
        database_url: &str,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        info!("Connecting to database: {}", database_url);

        let options = SqliteConnectOptions::from_str(database_url)
            .with_context(|| format!("Invalid database URL: {}", database_url))?
            .create_if_missing(true)
            .foreign_keys(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.unwrap_or(5))
            .min_connections(min_connections.unwrap_or(1))
            .connect_with(options)
            .await
            .context("Failed to connect to database")?;

        info!("Database connection established");

        Ok(Self { pool })
    }

    /// Create a new storage instance with a specific file path.
    pub async fn new_with_path<P: AsRef<Path>>(
        path: P,
        max_connections: Option<u32>,
        min_connections: Option<u32>,
    ) -> Result<Self> {
        let database_url = format!("sqlite://{}", path.as_ref().display());
        Self::new(&database_url, max_connections, min_connections).await
    }

    /// Run database migrations.
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running database migrations");

        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run migrations")?;

        info!("Migrations completed successfully");

        Ok(())
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Close the database connection pool.
    pub async fn close(&self) {
        info!("Closing database connection");
        self.pool.close().await;
    }

    /// Get database statistics.
    pub async fn stats(&self) -> Result<DatabaseStats> {
        let tip_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM tips")
            .fetch_one(&self.pool)
            .await?;

        let creator_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM creator_stats")
            .fetch_one(&self.pool)
            .await?;

        let rejected_log_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM rejected_logs")
            .fetch_one(&self.pool)
            .await?;

        let block_count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM blocks")
            .fetch_one(&self.pool)
            .await?;

        let sync_state = self.get_sync_state().await?;

        Ok(DatabaseStats {
            tip_count: tip_count as u64,
            creator_count: creator_count as u64,
            rejected_log_count: rejected_log_count as u64,
            block_count: block_count as u64,
            last_block_number: sync_state.last_block_number,
        })
    }

    /// Check database health.
    pub async fn health_check(&self) -> Result<()> {
        sqlx::query("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("Database health check failed")?;

        Ok(())
    }
}

/// Database statistics.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatabaseStats {
    /// Total number of indexed tips
    pub tip_count: u64,

    /// Number of recipients with at least one tip
    pub creator_count: u64,

    /// Number of rejected logs
    pub rejected_log_count: u64,

    /// Number of checkpoints kept for reorg detection
    pub block_count: u64,

    /// Last processed block number
    pub last_block_number: u64,
}

pub(crate) fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::Storage;
    use tempfile::NamedTempFile;

    pub(crate) async fn setup_storage() -> (Storage, NamedTempFile) {
        let temp_db = NamedTempFile::new().unwrap();
        let storage = Storage::new_with_path(temp_db.path(), None, None)
            .await
            .unwrap();
        storage.run_migrations().await.unwrap();
        (storage, temp_db)
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::setup_storage;

    #[tokio::test]
    async fn test_storage_creation() {
        let (storage, _temp_db) = setup_storage().await;

        storage.health_check().await.unwrap();

        let mode: String = sqlx::query_scalar("PRAGMA journal_mode")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(mode.to_lowercase(), "wal");

        storage.close().await;
    }

    #[tokio::test]
    async fn test_database_stats() {
        let (storage, _temp_db) = setup_storage().await;

        let stats = storage.stats().await.unwrap();
        assert_eq!(stats.tip_count, 0);
        assert_eq!(stats.creator_count, 0);
        assert_eq!(stats.rejected_log_count, 0);
        assert_eq!(stats.block_count, 0);
        assert_eq!(stats.last_block_number, 0);

        storage.close().await;
    }

    #[tokio::test]
    async fn test_migrations_are_rerunnable() {
        let (storage, _temp_db) = setup_storage().await;
        storage.run_migrations().await.unwrap();

        let rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sync_state")
            .fetch_one(storage.pool())
            .await
            .unwrap();
        assert_eq!(rows, 1);

        storage.close().await;
    }
}
