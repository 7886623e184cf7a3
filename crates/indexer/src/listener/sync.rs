//! Sync engine for historical and live block processing.

use alloy::primitives::B256;
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::events::decode_logs;
use super::provider::ChainSource;
use crate::config::SyncConfig;
use crate::storage::sync::RollbackSummary;
use crate::storage::{now_unix, BlockRecord, IngestBatch, IngestSummary, Storage, SyncState};

/// Outcome of one [`SyncEngine::sync_once`] step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncStep {
    /// Nothing confirmed beyond the checkpoint.
    CaughtUp {
        /// Source head
        head: u64,
        /// Highest block old enough to ingest
        safe: u64,
    },

    /// A batch was written.
    Ingested {
        /// First block of the batch
        from: u64,
        /// Last block of the batch, now the checkpoint
        to: u64,
        /// Rows written
        summary: IngestSummary,
    },

    /// The checkpoint was no longer on the source chain; the store was rolled back.
    RolledBack {
        /// Abandoned checkpoint height
        from: u64,
        /// Common ancestor the store now ends at
        to: u64,
        /// Rows removed
        summary: RollbackSummary,
    },
}

/// The source or the database belongs to a different chain than configured.
///
/// Not retried: the indexer must be reconfigured.
#[derive(Debug, thiserror::Error)]
pub enum ChainIdMismatch {
    /// The source reports another chain id.
    #[error("Chain ID mismatch: configured {configured}, source reports {reported}")]
    Source {
        /// Configured chain id
        configured: u64,
        /// Chain id reported by the source
        reported: u64,
    },

    /// The database was bound to another chain.
    #[error("Database was indexed for chain {stored}, configured chain is {configured}")]
    Database {
        /// Chain id stored in `sync_state`
        stored: u64,
        /// Configured chain id
        configured: u64,
    },
}

/// Sync engine manages historical catch-up, live polling and reorg recovery.
pub struct SyncEngine<S> {
    source: S,
    storage: Storage,
    config: SyncConfig,
    chain_id: u64,
}

impl<S: ChainSource> SyncEngine<S> {
    /// Create a new sync engine for `chain_id`.
    pub fn new(source: S, storage: Storage, config: SyncConfig, chain_id: u64) -> Self {
        Self {
            source,
            storage,
            config,
            chain_id,
        }
    }

    /// The underlying chain source.
    pub fn source(&self) -> &S {
        &self.source
    }

    /// Check the source chain id and bind a fresh database to it.
    ///
    /// A fresh database starts with `start_block - 1` as its last processed block.
    pub async fn prepare(&self) -> Result<SyncState> {
        let source_chain_id = self.source.chain_id().await?;
        if source_chain_id != self.chain_id {
            return Err(ChainIdMismatch::Source {
                configured: self.chain_id,
                reported: source_chain_id,
            }
            .into());
        }

        let state = self.storage.get_sync_state().await?;
        if state.chain_id == 0 {
            let start = self.config.start_block.saturating_sub(1);
            self.storage
                .initialize_sync_state(self.chain_id, start, B256::ZERO)
                .await?;
            info!(
                chain_id = self.chain_id,
                start_block = self.config.start_block,
                "Initialized sync state"
            );
            return self.storage.get_sync_state().await;
        }

        if state.chain_id != self.chain_id {
            return Err(ChainIdMismatch::Database {
                stored: state.chain_id,
                configured: self.chain_id,
            }
            .into());
        }

        Ok(state)
    }

    /// Run the sync loop (historical + live).
    ///
    /// Runs until the future is dropped. Failed steps leave the checkpoint
    /// untouched and are retried with exponential backoff. Only a chain id
    /// mismatch ends the loop.
    pub async fn run(&self) -> Result<()> {
        info!("Sync engine starting...");

        let initial_backoff = Duration::from_secs(self.config.retry_backoff_secs);
        let max_backoff = Duration::from_secs(self.config.max_backoff_secs);
        let mut backoff = initial_backoff;

        loop {
            match self.prepare().await {
                Ok(_) => break,
                Err(e) if e.downcast_ref::<ChainIdMismatch>().is_some() => return Err(e),
                Err(e) => {
                    warn!(
                        error = %format!("{:#}", e),
                        retry_in_secs = backoff.as_secs(),
                        "Startup check failed"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
        backoff = initial_backoff;

        loop {
            match self.sync_once().await {
                Ok(SyncStep::CaughtUp { head, safe }) => {
                    backoff = initial_backoff;
                    debug!(
                        head,
                        safe,
                        "Caught up, waiting {} seconds for new blocks...",
                        self.config.poll_interval_secs
                    );
                    tokio::time::sleep(Duration::from_secs(self.config.poll_interval_secs)).await;
                }
                Ok(_) => backoff = initial_backoff,
                Err(e) => {
                    warn!(
                        error = %format!("{:#}", e),
                        retry_in_secs = backoff.as_secs(),
                        "Sync step failed"
                    );
                    tokio::time::sleep(backoff).await;
                    backoff = (backoff * 2).min(max_backoff);
                }
            }
        }
    }

    /// Perform one step: reorg check, then at most one batch.
    pub async fn sync_once(&self) -> Result<SyncStep> {
        let state = self.storage.get_sync_state().await?;

        if let Some(step) = self.check_reorg(&state).await? {
            return Ok(step);
        }

        let head = self.source.latest_block_number().await?;
        let safe = head.saturating_sub(self.config.confirmations);
        let last = state.last_block_number;

        if safe <= last {
            return Ok(SyncStep::CaughtUp { head, safe });
        }

        let from = last + 1;
        let to = last.saturating_add(self.config.batch_size).min(safe);

        info!(
            "Sync status: last={}, head={}, safe={}, batch={}..={}",
            last, head, safe, from, to
        );

        let summary = self.ingest_range(from, to).await?;
        Ok(SyncStep::Ingested { from, to, summary })
    }

    /// Compare the checkpoint with the source and roll back if it was reorged away.
    ///
    /// A source that does not have the checkpoint block yet is lagging, not
    /// reorged: the step fails and is retried with the store untouched.
    async fn check_reorg(&self, state: &SyncState) -> Result<Option<SyncStep>> {
        if !state.has_checkpoint_hash() {
            return Ok(None);
        }

        let checkpoint = state.last_block_number;
        let header = self
            .source
            .block_header(checkpoint)
            .await?
            .with_context(|| {
                format!("Source is behind the checkpoint: block {} not available", checkpoint)
            })?;
        if header.hash == state.last_block_hash {
            return Ok(None);
        }
        warn!(
            block_number = checkpoint,
            stored = %state.last_block_hash,
            source = %header.hash,
            "Checkpoint hash mismatch, reorg detected"
        );

        let (ancestor, ancestor_hash) = self.find_common_ancestor().await?;
        let summary = self.storage.rollback_to(ancestor, ancestor_hash).await?;

        Ok(Some(SyncStep::RolledBack {
            from: checkpoint,
            to: ancestor,
            summary,
        }))
    }

    /// Newest stored checkpoint whose hash still matches the source.
    async fn find_common_ancestor(&self) -> Result<(u64, B256)> {
        let history = self
            .storage
            .recent_blocks(self.config.checkpoint_history)
            .await?;

        for record in history {
            let header = self
                .source
                .block_header(record.block_number)
                .await?
                .with_context(|| {
                    format!(
                        "Source lost block {} while searching for a common ancestor",
                        record.block_number
                    )
                })?;
            if header.hash == record.block_hash {
                return Ok((record.block_number, record.block_hash));
            }
        }

        let fallback = self.config.start_block.saturating_sub(1);
        warn!(
            fallback,
            "No stored checkpoint matches the source, re-indexing from start"
        );
        Ok((fallback, B256::ZERO))
    }

    /// Fetch, decode and store `from..=to` in one transaction.
    async fn ingest_range(&self, from: u64, to: u64) -> Result<IngestSummary> {
        let header = self
            .source
            .block_header(to)
            .await?
            .with_context(|| format!("Block {} not available from source", to))?;

        let logs = self.source.tip_logs(from, to).await?;

        // Logs and checkpoint must come from the same fork.
        let after = self.source.block_header(to).await?;
        if after.map(|h| h.hash) != Some(header.hash) {
            anyhow::bail!("Block {} changed while fetching logs", to);
        }

        let decoded = decode_logs(&logs);
        if decoded.unkeyed > 0 {
            warn!(
                count = decoded.unkeyed,
                "Dropped logs without block coordinates"
            );
        }

        let batch = IngestBatch {
            tips: decoded.tips,
            pending_messages: decoded.pending_messages,
            rejected: decoded.rejected,
            checkpoint: BlockRecord {
                block_number: header.number,
                block_hash: header.hash,
                parent_hash: header.parent_hash,
                timestamp: header.timestamp,
                event_count: logs.len() as u64,
                indexed_at: now_unix(),
            },
        };

        let summary = self
            .storage
            .ingest_batch(&batch, self.config.checkpoint_history)
            .await
            .with_context(|| format!("Failed to store blocks {} to {}", from, to))?;

        info!(
            from,
            to,
            logs = logs.len(),
            inserted = summary.inserted,
            duplicates = summary.duplicates,
            messages_attached = summary.messages_attached,
            rejected = summary.rejected,
            "Batch complete"
        );

        Ok(summary)
    }
}
