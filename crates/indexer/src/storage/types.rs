//! Database types for the indexer storage layer.

use alloy::primitives::{Address, B256, U256};
use tipjar_core::CreatorStats;

/// A tip as stored in the database: one `TipSent` log, plus its message if any.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TipRecord {
    /// Transaction that emitted the `TipSent` log
    pub tx_hash: B256,

    /// Log index of `TipSent` within its block
    pub log_index: u64,

    /// Block number where the tip was included
    pub block_number: u64,

    /// Hash of the including block
    pub block_hash: B256,

    /// Transaction index within the block
    pub tx_index: u64,

    /// Tipper
    pub sender: Address,

    /// Tipped creator
    pub recipient: Address,

    /// Gross amount in wei
    pub amount: U256,

    /// Protocol fee in wei
    pub fee: U256,

    /// Amount forwarded to the recipient in wei
    pub net_amount: U256,

    /// Message from a paired `TipMessage` log
    pub message: Option<String>,

    /// Block timestamp reported by the event (unix seconds)
    pub timestamp: u64,
}

/// A `TipMessage` whose `TipSent` is not part of the same batch.
///
/// Storage attaches it to an already-indexed tip when one matches,
/// and records it as rejected otherwise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingMessage {
    /// Emitting transaction
    pub tx_hash: B256,

    /// Log index of the `TipMessage` log
    pub log_index: u64,

    /// Block number
    pub block_number: u64,

    /// Tipper
    pub sender: Address,

    /// Tipped creator
    pub recipient: Address,

    /// Message text
    pub message: String,
}

/// A log that could not be turned into tip data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedLogRecord {
    /// Emitting transaction
    pub tx_hash: B256,

    /// Log index within the block
    pub log_index: u64,

    /// Block number
    pub block_number: u64,

    /// Why the log was rejected
    pub reason: String,
}

/// Stats row for one recipient.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatorStatsRecord {
    /// Tipped creator
    pub recipient: Address,

    /// Aggregates
    pub stats: CreatorStats,

    /// Unix timestamp of the last change
    pub updated_at: i64,
}

/// Everything produced by one batch of blocks, written atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestBatch {
    /// Decoded tips in `(block_number, log_index)` order
    pub tips: Vec<TipRecord>,

    /// Messages that still need a tip
    pub pending_messages: Vec<PendingMessage>,

    /// Undecodable or orphaned logs
    pub rejected: Vec<RejectedLogRecord>,

    /// Last block of the batch; becomes the new checkpoint
    pub checkpoint: BlockRecord,
}

/// Outcome of [`Storage::ingest_batch`](super::Storage::ingest_batch).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestSummary {
    /// Tips inserted for the first time
    pub inserted: u64,

    /// Tips already present (replays)
    pub duplicates: u64,

    /// Pending messages attached to previously indexed tips
    pub messages_attached: u64,

    /// Logs recorded as rejected
    pub rejected: u64,
}

/// Sync state record (singleton).
///
/// Tracks the indexer's progress through the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncState {
    /// Last fully processed block number
    pub last_block_number: u64,

    /// Hash of the last processed block (zero before the first batch)
    pub last_block_hash: B256,

    /// Unix timestamp of last update
    pub updated_at: i64,

    /// Chain ID (for safety)
    pub chain_id: u64,
}

impl SyncState {
    /// Whether the checkpoint refers to a block this indexer actually ingested.
    pub fn has_checkpoint_hash(&self) -> bool {
        self.last_block_hash != B256::ZERO
    }
}

/// A checkpoint record kept for reorg detection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockRecord {
    /// Block number
    pub block_number: u64,

    /// Block hash
    pub block_hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Block timestamp
    pub timestamp: u64,

    /// Number of TipJar logs in the batch ending at this block
    pub event_count: u64,

    /// When this block was indexed
    pub indexed_at: i64,
}

/// Chain order of a log: block, then transaction, then log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BlockCoordinates {
    /// Block number
    pub block_number: u64,

    /// Transaction index within block
    pub tx_index: u64,

    /// Log index within block
    pub log_index: u64,
}

impl BlockCoordinates {
    /// Create new block coordinates.
    pub fn new(block_number: u64, tx_index: u64, log_index: u64) -> Self {
        Self {
            block_number,
            tx_index,
            log_index,
        }
    }
}
