//! Chain access for the sync engine.

use alloy::primitives::{Address, B256};
use alloy::providers::{Provider, ProviderBuilder, RootProvider};
use alloy::rpc::types::{BlockNumberOrTag, BlockTransactionsKind, Filter, Log};
use alloy::sol_types::SolEvent;
use alloy::transports::http::{Client, Http};
use anyhow::{Context, Result};
use async_trait::async_trait;
use tipjar_core::abi::ITipJar::{TipMessage, TipSent};

/// Header fields the indexer needs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Height
    pub number: u64,

    /// Block hash
    pub hash: B256,

    /// Parent block hash
    pub parent_hash: B256,

    /// Unix seconds
    pub timestamp: u64,
}

/// A source of blocks and TipJar logs.
#[async_trait]
pub trait ChainSource: Send + Sync {
    /// Chain id of the source.
    async fn chain_id(&self) -> Result<u64>;

    /// Current head height.
    async fn latest_block_number(&self) -> Result<u64>;

    /// Header at `number`, `None` if the source has no such block.
    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>>;

    /// `TipSent` and `TipMessage` logs of the TipJar in `from_block..=to_block`.
    async fn tip_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>>;
}

/// HTTP RPC provider for querying the chain.
#[derive(Clone)]
pub struct RpcProvider {
    provider: RootProvider<Http<Client>>,
    tip_jar: Address,
}

impl RpcProvider {
    /// Create a new RPC provider.
    pub async fn new(rpc_url: &str, tip_jar: Address) -> Result<Self> {
        let url = rpc_url
            .parse()
            .with_context(|| format!("Invalid RPC URL: {}", rpc_url))?;

        let provider = ProviderBuilder::new().on_http(url);

        Ok(Self { provider, tip_jar })
    }
}

#[async_trait]
impl ChainSource for RpcProvider {
    async fn chain_id(&self) -> Result<u64> {
        self.provider
            .get_chain_id()
            .await
            .context("Failed to get chain id")
    }

    async fn latest_block_number(&self) -> Result<u64> {
        self.provider
            .get_block_number()
            .await
            .context("Failed to get block number")
    }

    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>> {
        let block = self
            .provider
            .get_block_by_number(
                BlockNumberOrTag::Number(number),
                BlockTransactionsKind::Hashes,
            )
            .await
            .with_context(|| format!("Failed to fetch block {}", number))?;

        Ok(block.map(|block| BlockHeader {
            number: block.header.number,
            hash: block.header.hash,
            parent_hash: block.header.parent_hash,
            timestamp: block.header.timestamp,
        }))
    }

    async fn tip_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let filter = Filter::new()
            .address(self.tip_jar)
            .event_signature(vec![TipSent::SIGNATURE_HASH, TipMessage::SIGNATURE_HASH])
            .from_block(from_block)
            .to_block(to_block);

        self.provider
            .get_logs(&filter)
            .await
            .with_context(|| {
                format!(
                    "Failed to fetch logs for blocks {} to {}",
                    from_block, to_block
                )
            })
    }
}
