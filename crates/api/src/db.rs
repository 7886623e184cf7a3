//! Database query helpers for the TipJar API.
//!
//! Reads the tables written by `tipjar-indexer`; never writes.

use sqlx::SqlitePool;
use tipjar_core::Address;

/// Row from `tips`.
#[derive(Debug, sqlx::FromRow)]
pub struct DbTip {
    /// Transaction hash bytes (32 bytes).
    pub tx_hash: Vec<u8>,
    /// Log index of the `TipSent` event.
    pub log_index: i64,
    /// Block the tip was mined in.
    pub block_number: i64,
    /// Sender address bytes (20 bytes).
    pub sender: Vec<u8>,
    /// Recipient address bytes (20 bytes).
    pub recipient: Vec<u8>,
    /// Gross amount in wei, base-10.
    pub amount: String,
    /// Protocol fee in wei, base-10.
    pub fee: String,
    /// Amount received by the recipient in wei, base-10.
    pub net_amount: String,
    /// Attached `TipMessage`, if any.
    pub message: Option<String>,
    /// Block timestamp (unix seconds).
    pub timestamp: i64,
}

/// Row from `creator_stats`.
#[derive(Debug, sqlx::FromRow)]
pub struct DbCreatorStats {
    /// Sum of gross tips in wei, base-10.
    pub total_tips: String,
    /// Number of tips received.
    pub tip_count: i64,
}

/// Tips received by `recipient`, newest first.
pub async fn get_tips_by_recipient(
    pool: &SqlitePool,
    recipient: &Address,
    limit: u32,
) -> anyhow::Result<Vec<DbTip>> {
    let rows = sqlx::query_as::<_, DbTip>(
        r#"
        SELECT
            tx_hash,
            log_index,
            block_number,
            sender,
            recipient,
            amount,
            fee,
            net_amount,
            message,
            timestamp
        FROM tips
        WHERE recipient = ?
        ORDER BY block_number DESC, log_index DESC
        LIMIT ?
        "#,
    )
    .bind(recipient.as_slice())
    .bind(i64::from(limit))
    .fetch_all(pool)
    .await?;

    Ok(rows)
}

/// Aggregates for `recipient`, `None` if it never received a tip.
pub async fn get_creator_stats(
    pool: &SqlitePool,
    recipient: &Address,
) -> anyhow::Result<Option<DbCreatorStats>> {
    let row = sqlx::query_as::<_, DbCreatorStats>(
        r#"
        SELECT total_tips, tip_count
        FROM creator_stats
        WHERE recipient = ?
        "#,
    )
    .bind(recipient.as_slice())
    .fetch_optional(pool)
    .await?;

    Ok(row)
}

/// Last block the indexer has fully processed.
pub async fn get_indexed_through_block(pool: &SqlitePool) -> anyhow::Result<u64> {
    let block: Option<i64> =
        sqlx::query_scalar("SELECT last_block_number FROM sync_state WHERE id = 1")
            .fetch_optional(pool)
            .await?;

    Ok(block.unwrap_or(0) as u64)
}
