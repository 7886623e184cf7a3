//! [`ChainSource`] over an in-process ledger [`Chain`].
//!
//! Used for development runs and end-to-end tests without a node.

use alloy::rpc::types::Log;
use anyhow::Result;
use async_trait::async_trait;
use std::sync::Arc;
use tipjar_ledger::{Chain, EmittedLog};
use tokio::sync::RwLock;

use super::provider::{BlockHeader, ChainSource};

/// Shared handle to a local chain.
#[derive(Debug, Clone)]
pub struct LocalChainSource {
    chain: Arc<RwLock<Chain>>,
}

impl LocalChainSource {
    /// Wrap `chain`.
    pub fn new(chain: Chain) -> Self {
        Self {
            chain: Arc::new(RwLock::new(chain)),
        }
    }

    /// The wrapped chain, for submitting transactions while the indexer reads it.
    pub fn chain(&self) -> &Arc<RwLock<Chain>> {
        &self.chain
    }
}

fn to_rpc_log(log: EmittedLog) -> Log {
    Log {
        inner: log.inner,
        block_hash: Some(log.block_hash),
        block_number: Some(log.block_number),
        block_timestamp: Some(log.block_timestamp),
        transaction_hash: Some(log.tx_hash),
        transaction_index: Some(log.tx_index),
        log_index: Some(log.log_index),
        removed: false,
    }
}

#[async_trait]
impl ChainSource for LocalChainSource {
    async fn chain_id(&self) -> Result<u64> {
        Ok(self.chain.read().await.chain_id())
    }

    async fn latest_block_number(&self) -> Result<u64> {
        Ok(self.chain.read().await.block_number())
    }

    async fn block_header(&self, number: u64) -> Result<Option<BlockHeader>> {
        Ok(self
            .chain
            .read()
            .await
            .header(number)
            .map(|header| BlockHeader {
                number: header.number,
                hash: header.hash,
                parent_hash: header.parent_hash,
                timestamp: header.timestamp,
            }))
    }

    async fn tip_logs(&self, from_block: u64, to_block: u64) -> Result<Vec<Log>> {
        let chain = self.chain.read().await;
        let tip_jar = chain.tip_jar_address();
        Ok(chain
            .logs_in_range(from_block, to_block)
            .into_iter()
            .filter(|log| log.inner.address == tip_jar)
            .map(to_rpc_log)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::listener::events::{decode_logs, TipJarEvent};
    use alloy::primitives::{Address, U256};
    use tipjar_ledger::{ChainConfig, LedgerConfig};

    #[tokio::test]
    async fn test_local_logs_decode() {
        let alice = Address::new([0xa1; 20]);
        let bob = Address::new([0xb0; 20]);
        let mut chain = Chain::new(
            ChainConfig::default(),
            Address::new([0xfe; 20]),
            LedgerConfig::default(),
        )
        .unwrap();
        chain.fund(alice, U256::from(10u64).pow(U256::from(18u64))).unwrap();
        let receipt = chain
            .tip_with_message(alice, bob, "hello", U256::from(10u64).pow(U256::from(16u64)))
            .unwrap();

        let source = LocalChainSource::new(chain);
        assert_eq!(source.latest_block_number().await.unwrap(), 1);
        assert_eq!(source.chain_id().await.unwrap(), 84_532);

        let header = source.block_header(1).await.unwrap().unwrap();
        assert_eq!(header.hash, receipt.block_hash);
        assert!(source.block_header(2).await.unwrap().is_none());

        let logs = source.tip_logs(0, 1).await.unwrap();
        assert_eq!(logs.len(), 2);
        assert!(matches!(
            TipJarEvent::from_log(&logs[0]).unwrap(),
            TipJarEvent::Sent(_)
        ));

        let decoded = decode_logs(&logs);
        assert_eq!(decoded.tips.len(), 1);
        assert_eq!(decoded.tips[0].message.as_deref(), Some("hello"));
        assert_eq!(decoded.tips[0].tx_hash, receipt.tx_hash);
    }
}
