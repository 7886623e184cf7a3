//! Sync state, checkpoint history and rollback.

use super::{now_unix, BlockRecord, Storage, SyncState};
use alloy::primitives::B256;
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use tipjar_core::b256_from_bytes;
use tracing::info;

/// What a rollback removed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RollbackSummary {
    /// Tips above the rollback point
    pub tips_removed: u64,
    /// Rejected logs above the rollback point
    pub rejected_removed: u64,
    /// Checkpoints above the rollback point
    pub blocks_removed: u64,
    /// Recipients with stats after recomputation
    pub creators: u64,
}

impl Storage {
    /// Get the current sync state.
    pub async fn get_sync_state(&self) -> Result<SyncState> {
        let row = sqlx::query(
            r#"
            SELECT last_block_number, last_block_hash, updated_at, chain_id
            FROM sync_state
            WHERE id = 1
            "#,
        )
        .fetch_one(&self.pool)
        .await
        .context("Failed to fetch sync state")?;

        let hash_bytes: Vec<u8> = row.get("last_block_hash");

        Ok(SyncState {
            last_block_number: row.get::<i64, _>("last_block_number") as u64,
            last_block_hash: b256_from_bytes(&hash_bytes)?,
            updated_at: row.get("updated_at"),
            chain_id: row.get::<i64, _>("chain_id") as u64,
        })
    }

    /// Initialize sync state for a new chain.
    ///
    /// `start_block` is the last block considered processed; the first batch starts after it.
    pub async fn initialize_sync_state(
        &self,
        chain_id: u64,
        start_block: u64,
        block_hash: B256,
    ) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sync_state
            SET last_block_number = ?,
                last_block_hash = ?,
                updated_at = ?,
                chain_id = ?
            WHERE id = 1
            "#,
        )
        .bind(start_block as i64)
        .bind(block_hash.as_slice())
        .bind(now_unix())
        .bind(chain_id as i64)
        .execute(&self.pool)
        .await
        .context("Failed to initialize sync state")?;

        Ok(())
    }

    /// Insert or replace a checkpoint record.
    pub async fn insert_block(&self, block: &BlockRecord) -> Result<()> {
        let mut conn = self.pool.acquire().await?;
        insert_block(&mut *conn, block).await
    }

    /// Get a checkpoint by number.
    pub async fn get_block(&self, block_number: u64) -> Result<Option<BlockRecord>> {
        let row = sqlx::query(
            r#"
            SELECT block_number, block_hash, parent_hash,
                   timestamp, event_count, indexed_at
            FROM blocks
            WHERE block_number = ?
            "#,
        )
        .bind(block_number as i64)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(row_to_block_record).transpose()
    }

    /// Stored checkpoints, newest first.
    pub async fn recent_blocks(&self, limit: u64) -> Result<Vec<BlockRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT block_number, block_hash, parent_hash,
                   timestamp, event_count, indexed_at
            FROM blocks
            ORDER BY block_number DESC
            LIMIT ?
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch checkpoint history")?;

        rows.iter().map(row_to_block_record).collect()
    }

    /// Roll the store back so that `block_number` is the last processed block.
    ///
    /// Deletes tips, rejected logs and checkpoints above it, recomputes creator
    /// stats from the remaining tips and resets the checkpoint, all in one transaction.
    pub async fn rollback_to(&self, block_number: u64, block_hash: B256) -> Result<RollbackSummary> {
        let mut tx = self.pool.begin().await?;

        let tips_removed = sqlx::query("DELETE FROM tips WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .context("Failed to delete tips during rollback")?
            .rows_affected();

        let rejected_removed = sqlx::query("DELETE FROM rejected_logs WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .context("Failed to delete rejected logs during rollback")?
            .rows_affected();

        let blocks_removed = sqlx::query("DELETE FROM blocks WHERE block_number > ?")
            .bind(block_number as i64)
            .execute(&mut *tx)
            .await
            .context("Failed to delete checkpoints during rollback")?
            .rows_affected();

        let creators = super::tips::recompute_creator_stats(&mut *tx).await?;

        set_checkpoint(&mut *tx, block_number, block_hash).await?;

        tx.commit().await.context("Failed to commit rollback")?;

        info!(
            block_number,
            block_hash = %block_hash,
            tips_removed,
            rejected_removed,
            blocks_removed,
            "Rolled back indexed data"
        );

        Ok(RollbackSummary {
            tips_removed,
            rejected_removed,
            blocks_removed,
            creators,
        })
    }

    /// Make `from_block` the next block to ingest, dropping everything at or above it.
    ///
    /// Returns `None` when nothing at or above `from_block` has been indexed.
    /// The checkpoint keeps its stored hash when `from_block - 1` is in the
    /// checkpoint history, so reorg detection still covers it.
    pub async fn reindex_from(&self, from_block: u64) -> Result<Option<RollbackSummary>> {
        let state = self.get_sync_state().await?;
        let target = from_block.saturating_sub(1);

        if target >= state.last_block_number {
            return Ok(None);
        }

        let hash = self
            .get_block(target)
            .await?
            .map(|block| block.block_hash)
            .unwrap_or(B256::ZERO);

        self.rollback_to(target, hash).await.map(Some)
    }
}

pub(crate) async fn set_checkpoint(
    conn: &mut SqliteConnection,
    block_number: u64,
    block_hash: B256,
) -> Result<()> {
    sqlx::query(
        r#"
        UPDATE sync_state
        SET last_block_number = ?,
            last_block_hash = ?,
            updated_at = ?
        WHERE id = 1
        "#,
    )
    .bind(block_number as i64)
    .bind(block_hash.as_slice())
    .bind(now_unix())
    .execute(&mut *conn)
    .await
    .context("Failed to update sync state")?;

    Ok(())
}

pub(crate) async fn insert_block(conn: &mut SqliteConnection, block: &BlockRecord) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO blocks (
            block_number, block_hash, parent_hash,
            timestamp, event_count, indexed_at
        )
        VALUES (?, ?, ?, ?, ?, ?)
        ON CONFLICT(block_number) DO UPDATE SET
            block_hash = excluded.block_hash,
            parent_hash = excluded.parent_hash,
            timestamp = excluded.timestamp,
            event_count = excluded.event_count,
            indexed_at = excluded.indexed_at
        "#,
    )
    .bind(block.block_number as i64)
    .bind(block.block_hash.as_slice())
    .bind(block.parent_hash.as_slice())
    .bind(block.timestamp as i64)
    .bind(block.event_count as i64)
    .bind(block.indexed_at)
    .execute(&mut *conn)
    .await
    .context("Failed to insert block")?;

    Ok(())
}

/// Keep only the newest `keep` checkpoints.
pub(crate) async fn prune_blocks(conn: &mut SqliteConnection, keep: u64) -> Result<u64> {
    let result = sqlx::query(
        r#"
        DELETE FROM blocks
        WHERE block_number NOT IN (
            SELECT block_number FROM blocks ORDER BY block_number DESC LIMIT ?
        )
        "#,
    )
    .bind(keep as i64)
    .execute(&mut *conn)
    .await
    .context("Failed to prune checkpoint history")?;

    Ok(result.rows_affected())
}

fn row_to_block_record(row: &SqliteRow) -> Result<BlockRecord> {
    let hash_bytes: Vec<u8> = row.get("block_hash");
    let parent_bytes: Vec<u8> = row.get("parent_hash");

    Ok(BlockRecord {
        block_number: row.get::<i64, _>("block_number") as u64,
        block_hash: b256_from_bytes(&hash_bytes)?,
        parent_hash: b256_from_bytes(&parent_bytes)?,
        timestamp: row.get::<i64, _>("timestamp") as u64,
        event_count: row.get::<i64, _>("event_count") as u64,
        indexed_at: row.get("indexed_at"),
    })
}
