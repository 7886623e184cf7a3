//! Tip, creator stats and rejected log storage operations.

use super::sync::{insert_block, prune_blocks, set_checkpoint};
use super::{
    now_unix, CreatorStatsRecord, IngestBatch, IngestSummary, PendingMessage, RejectedLogRecord,
    Storage, TipRecord,
};
use alloy::primitives::{Address, B256, U256};
use anyhow::{Context, Result};
use sqlx::sqlite::{SqliteConnection, SqliteRow};
use sqlx::Row;
use std::collections::HashMap;
use tipjar_core::{
    address_from_bytes, b256_from_bytes, format_amount, parse_amount, CreatorStats,
};
use tracing::{debug, warn};

const TIP_COLUMNS: &str = r#"
    tx_hash, log_index, block_number, block_hash, tx_index,
    sender, recipient, amount, fee, net_amount, message, timestamp
"#;

impl Storage {
    /// Write one batch atomically: tips, stats, message attachments, rejected logs,
    /// then the checkpoint.
    ///
    /// Replays are harmless: a tip already present is skipped and does not touch stats.
    /// `checkpoint_history` bounds the number of checkpoint records kept.
    pub async fn ingest_batch(
        &self,
        batch: &IngestBatch,
        checkpoint_history: u64,
    ) -> Result<IngestSummary> {
        let mut tx = self.pool.begin().await?;
        let now = now_unix();
        let mut summary = IngestSummary::default();

        for tip in &batch.tips {
            if insert_tip(&mut *tx, tip, now).await? {
                bump_creator_stats(&mut *tx, &tip.recipient, tip.amount, now).await?;
                summary.inserted += 1;
            } else {
                debug!(
                    tx_hash = %tip.tx_hash,
                    log_index = tip.log_index,
                    "Tip already indexed, skipping"
                );
                summary.duplicates += 1;
            }
        }

        for message in &batch.pending_messages {
            if attach_message(&mut *tx, message).await? {
                summary.messages_attached += 1;
            } else {
                let rejected = RejectedLogRecord {
                    tx_hash: message.tx_hash,
                    log_index: message.log_index,
                    block_number: message.block_number,
                    reason: "TipMessage without a matching TipSent".to_string(),
                };
                if insert_rejected(&mut *tx, &rejected, now).await? {
                    warn!(
                        tx_hash = %message.tx_hash,
                        log_index = message.log_index,
                        "Orphan TipMessage recorded as rejected"
                    );
                    summary.rejected += 1;
                }
            }
        }

        for rejected in &batch.rejected {
            if insert_rejected(&mut *tx, rejected, now).await? {
                summary.rejected += 1;
            }
        }

        let checkpoint = &batch.checkpoint;
        insert_block(&mut *tx, checkpoint).await?;
        prune_blocks(&mut *tx, checkpoint_history.max(1)).await?;
        set_checkpoint(&mut *tx, checkpoint.block_number, checkpoint.block_hash).await?;

        tx.commit().await.context("Failed to commit batch")?;

        Ok(summary)
    }

    /// Get one tip by its `TipSent` identity.
    pub async fn get_tip(&self, tx_hash: &B256, log_index: u64) -> Result<Option<TipRecord>> {
        let query = format!(
            "SELECT {} FROM tips WHERE tx_hash = ? AND log_index = ?",
            TIP_COLUMNS
        );
        let row = sqlx::query(&query)
            .bind(tx_hash.as_slice())
            .bind(log_index as i64)
            .fetch_optional(&self.pool)
            .await
            .context("Failed to fetch tip")?;

        row.as_ref().map(row_to_tip).transpose()
    }

    /// Tips received by `recipient`, newest first by `(block_number, log_index)`.
    pub async fn get_tips_by_recipient(
        &self,
        recipient: &Address,
        limit: u32,
    ) -> Result<Vec<TipRecord>> {
        let query = format!(
            r#"
            SELECT {}
            FROM tips
            WHERE recipient = ?
            ORDER BY block_number DESC, log_index DESC
            LIMIT ?
            "#,
            TIP_COLUMNS
        );
        let rows = sqlx::query(&query)
            .bind(recipient.as_slice())
            .bind(i64::from(limit))
            .fetch_all(&self.pool)
            .await
            .context("Failed to fetch tips by recipient")?;

        rows.iter().map(row_to_tip).collect()
    }

    /// Stats for `recipient`, `None` if it has no indexed tips.
    pub async fn get_creator_stats(&self, recipient: &Address) -> Result<Option<CreatorStatsRecord>> {
        let row = sqlx::query(
            r#"
            SELECT recipient, total_tips, tip_count, updated_at
            FROM creator_stats
            WHERE recipient = ?
            "#,
        )
        .bind(recipient.as_slice())
        .fetch_optional(&self.pool)
        .await
        .context("Failed to fetch creator stats")?;

        row.as_ref().map(row_to_creator_stats).transpose()
    }

    /// Rebuild every creator stats row from the tips table.
    ///
    /// Returns the number of recipients with stats.
    pub async fn recompute_creator_stats(&self) -> Result<u64> {
        let mut tx = self.pool.begin().await?;
        let creators = recompute_creator_stats(&mut *tx).await?;
        tx.commit()
            .await
            .context("Failed to commit stats recomputation")?;
        Ok(creators)
    }

    /// Rejected logs, newest first.
    pub async fn list_rejected_logs(&self, limit: u32) -> Result<Vec<RejectedLogRecord>> {
        let rows = sqlx::query(
            r#"
            SELECT tx_hash, log_index, block_number, reason
            FROM rejected_logs
            ORDER BY block_number DESC, log_index DESC
            LIMIT ?
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .context("Failed to fetch rejected logs")?;

        rows.iter()
            .map(|row| {
                let tx_hash: Vec<u8> = row.get("tx_hash");
                Ok(RejectedLogRecord {
                    tx_hash: b256_from_bytes(&tx_hash)?,
                    log_index: row.get::<i64, _>("log_index") as u64,
                    block_number: row.get::<i64, _>("block_number") as u64,
                    reason: row.get("reason"),
                })
            })
            .collect()
    }
}

/// Returns `true` if the tip was new.
async fn insert_tip(conn: &mut SqliteConnection, tip: &TipRecord, now: i64) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO tips (
            tx_hash, log_index, block_number, block_hash, tx_index,
            sender, recipient, amount, fee, net_amount, message, timestamp,
            ingested_at
        )
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(tip.tx_hash.as_slice())
    .bind(tip.log_index as i64)
    .bind(tip.block_number as i64)
    .bind(tip.block_hash.as_slice())
    .bind(tip.tx_index as i64)
    .bind(tip.sender.as_slice())
    .bind(tip.recipient.as_slice())
    .bind(format_amount(&tip.amount))
    .bind(format_amount(&tip.fee))
    .bind(format_amount(&tip.net_amount))
    .bind(tip.message.as_deref())
    .bind(tip.timestamp as i64)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to insert tip")?;

    Ok(result.rows_affected() > 0)
}

async fn bump_creator_stats(
    conn: &mut SqliteConnection,
    recipient: &Address,
    amount: U256,
    now: i64,
) -> Result<()> {
    let row = sqlx::query("SELECT total_tips, tip_count FROM creator_stats WHERE recipient = ?")
        .bind(recipient.as_slice())
        .fetch_optional(&mut *conn)
        .await
        .context("Failed to read creator stats")?;

    let current = match row {
        Some(row) => CreatorStats {
            total_tips: parse_amount(row.get::<&str, _>("total_tips"))?,
            tip_count: row.get::<i64, _>("tip_count") as u64,
        },
        None => CreatorStats::default(),
    };
    let updated = current
        .checked_record(amount)
        .with_context(|| format!("Creator stats overflow for {}", recipient))?;

    upsert_creator_stats(conn, recipient, &updated, now).await
}

async fn upsert_creator_stats(
    conn: &mut SqliteConnection,
    recipient: &Address,
    stats: &CreatorStats,
    now: i64,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO creator_stats (recipient, total_tips, tip_count, updated_at)
        VALUES (?, ?, ?, ?)
        ON CONFLICT(recipient) DO UPDATE SET
            total_tips = excluded.total_tips,
            tip_count = excluded.tip_count,
            updated_at = excluded.updated_at
        "#,
    )
    .bind(recipient.as_slice())
    .bind(format_amount(&stats.total_tips))
    .bind(stats.tip_count as i64)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to upsert creator stats")?;

    Ok(())
}

/// Attach a message to the latest preceding unmatched tip of the same transaction
/// with the same sender and recipient. Returns `false` if there is none.
async fn attach_message(conn: &mut SqliteConnection, message: &PendingMessage) -> Result<bool> {
    let log_index: Option<i64> = sqlx::query_scalar(
        r#"
        SELECT log_index
        FROM tips
        WHERE tx_hash = ?
          AND sender = ?
          AND recipient = ?
          AND log_index < ?
          AND message IS NULL
        ORDER BY log_index DESC
        LIMIT 1
        "#,
    )
    .bind(message.tx_hash.as_slice())
    .bind(message.sender.as_slice())
    .bind(message.recipient.as_slice())
    .bind(message.log_index as i64)
    .fetch_optional(&mut *conn)
    .await
    .context("Failed to look up tip for message")?;

    let Some(log_index) = log_index else {
        return Ok(false);
    };

    sqlx::query("UPDATE tips SET message = ? WHERE tx_hash = ? AND log_index = ?")
        .bind(&message.message)
        .bind(message.tx_hash.as_slice())
        .bind(log_index)
        .execute(&mut *conn)
        .await
        .context("Failed to attach message")?;

    Ok(true)
}

/// Returns `true` if the log was not already recorded.
async fn insert_rejected(
    conn: &mut SqliteConnection,
    rejected: &RejectedLogRecord,
    now: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        INSERT INTO rejected_logs (tx_hash, log_index, block_number, reason, rejected_at)
        VALUES (?, ?, ?, ?, ?)
        ON CONFLICT(tx_hash, log_index) DO NOTHING
        "#,
    )
    .bind(rejected.tx_hash.as_slice())
    .bind(rejected.log_index as i64)
    .bind(rejected.block_number as i64)
    .bind(&rejected.reason)
    .bind(now)
    .execute(&mut *conn)
    .await
    .context("Failed to record rejected log")?;

    Ok(result.rows_affected() > 0)
}

pub(crate) async fn recompute_creator_stats(conn: &mut SqliteConnection) -> Result<u64> {
    let rows = sqlx::query("SELECT recipient, amount FROM tips")
        .fetch_all(&mut *conn)
        .await
        .context("Failed to read tips for stats recomputation")?;

    let mut totals: HashMap<Address, CreatorStats> = HashMap::new();
    for row in &rows {
        let recipient = address_from_bytes(&row.get::<Vec<u8>, _>("recipient"))?;
        let amount = parse_amount(row.get::<&str, _>("amount"))?;
        let entry = totals.entry(recipient).or_default();
        *entry = entry
            .checked_record(amount)
            .with_context(|| format!("Creator stats overflow for {}", recipient))?;
    }

    sqlx::query("DELETE FROM creator_stats")
        .execute(&mut *conn)
        .await
        .context("Failed to clear creator stats")?;

    let now = now_unix();
    for (recipient, stats) in &totals {
        upsert_creator_stats(conn, recipient, stats, now).await?;
    }

    Ok(totals.len() as u64)
}

fn row_to_tip(row: &SqliteRow) -> Result<TipRecord> {
    let tx_hash: Vec<u8> = row.get("tx_hash");
    let block_hash: Vec<u8> = row.get("block_hash");
    let sender: Vec<u8> = row.get("sender");
    let recipient: Vec<u8> = row.get("recipient");

    Ok(TipRecord {
        tx_hash: b256_from_bytes(&tx_hash)?,
        log_index: row.get::<i64, _>("log_index") as u64,
        block_number: row.get::<i64, _>("block_number") as u64,
        block_hash: b256_from_bytes(&block_hash)?,
        tx_index: row.get::<i64, _>("tx_index") as u64,
        sender: address_from_bytes(&sender)?,
        recipient: address_from_bytes(&recipient)?,
        amount: parse_amount(row.get::<&str, _>("amount"))?,
        fee: parse_amount(row.get::<&str, _>("fee"))?,
        net_amount: parse_amount(row.get::<&str, _>("net_amount"))?,
        message: row.get("message"),
        timestamp: row.get::<i64, _>("timestamp") as u64,
    })
}

fn row_to_creator_stats(row: &SqliteRow) -> Result<CreatorStatsRecord> {
    let recipient: Vec<u8> = row.get("recipient");

    Ok(CreatorStatsRecord {
        recipient: address_from_bytes(&recipient)?,
        stats: CreatorStats {
            total_tips: parse_amount(row.get::<&str, _>("total_tips"))?,
            tip_count: row.get::<i64, _>("tip_count") as u64,
        },
        updated_at: row.get("updated_at"),
    })
}
