//! In-process chain hosting a single TipJar.
//!
//! One transaction per block. World state is snapshotted per block, so a call
//! that fails leaves nothing behind and [`Chain::reorg`] can drop recent blocks
//! together with their effects. Only the last `reorg_window` snapshots are kept.

use alloy_primitives::{keccak256, Address, Log, B256, U256};
use std::collections::VecDeque;
use alloy_sol_types::SolCall;
use tipjar_core::abi::ITipJar;
use tracing::{debug, info};

use crate::error::Result;
use crate::state::{Accounts, LedgerConfig};
use crate::tip_jar::{CallEnv, TipJar, TipOutcome};

/// Chain parameters.
#[derive(Debug, Clone)]
pub struct ChainConfig {
    /// EIP-155 chain id reported to consumers.
    pub chain_id: u64,
    /// Timestamp of block 0.
    pub genesis_timestamp: u64,
    /// Seconds between consecutive blocks.
    pub block_time_secs: u64,
    /// Account that deploys the TipJar; the contract lands at `deployer.create(0)`.
    pub deployer: Address,
    /// Deepest reorg supported. State snapshots older than this are discarded.
    pub reorg_window: u64,
}

impl Default for ChainConfig {
    fn default() -> Self {
        Self {
            // Base Sepolia
            chain_id: 84_532,
            genesis_timestamp: 1_700_000_000,
            block_time_secs: 2,
            deployer: Address::new([0xde; 20]),
            reorg_window: 128,
        }
    }
}

/// Block header as seen by consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockHeader {
    /// Height.
    pub number: u64,
    /// Block hash.
    pub hash: B256,
    /// Hash of the previous block (zero for genesis).
    pub parent_hash: B256,
    /// Unix seconds.
    pub timestamp: u64,
}

/// A log together with its position in the chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EmittedLog {
    /// Emitting address and ABI-encoded topics and data.
    pub inner: Log,
    /// Including block height.
    pub block_number: u64,
    /// Including block hash.
    pub block_hash: B256,
    /// Including block time.
    pub block_timestamp: u64,
    /// Emitting transaction.
    pub tx_hash: B256,
    /// Position of the transaction in its block.
    pub tx_index: u64,
    /// Position of the log in its block.
    pub log_index: u64,
}

/// Receipt of a successful transaction.
#[derive(Debug, Clone)]
pub struct Receipt {
    /// Transaction hash.
    pub tx_hash: B256,
    /// Including block height.
    pub block_number: u64,
    /// Including block hash.
    pub block_hash: B256,
    /// Logs in emission order.
    pub logs: Vec<EmittedLog>,
    /// What the TipJar did.
    pub outcome: TipOutcome,
}

#[derive(Debug, Clone)]
struct WorldState {
    accounts: Accounts,
    tip_jar: TipJar,
}

#[derive(Debug, Clone)]
struct Block {
    header: BlockHeader,
    logs: Vec<EmittedLog>,
}

/// Single-writer chain. Every mutation takes `&mut self`, which totally orders calls.
#[derive(Debug)]
pub struct Chain {
    config: ChainConfig,
    blocks: Vec<Block>,
    /// State after each of the most recent blocks, head last. Never empty.
    states: VecDeque<WorldState>,
    /// Never rewound, so a transaction replayed after a reorg gets a fresh hash.
    tx_nonce: u64,
    /// Bumped on every reorg so replacement blocks hash differently.
    fork: u64,
}

impl Chain {
    /// Create a chain whose genesis block deploys a TipJar.
    pub fn new(
        config: ChainConfig,
        protocol_fee_recipient: Address,
        ledger: LedgerConfig,
    ) -> Result<Self> {
        let tip_jar = TipJar::deploy(config.deployer.create(0), protocol_fee_recipient, ledger)?;
        info!(
            chain_id = config.chain_id,
            tip_jar = %tip_jar.address(),
            fee_recipient = %protocol_fee_recipient,
            "Deployed TipJar"
        );

        let mut chain = Self {
            config,
            blocks: Vec::new(),
            states: VecDeque::new(),
            tx_nonce: 0,
            fork: 0,
        };
        let state = WorldState {
            accounts: Accounts::default(),
            tip_jar,
        };
        chain.push_block(state, B256::ZERO, Vec::new());
        Ok(chain)
    }

    /// Chain id.
    pub fn chain_id(&self) -> u64 {
        self.config.chain_id
    }

    /// Address of the hosted TipJar.
    pub fn tip_jar_address(&self) -> Address {
        self.head_state().tip_jar.address()
    }

    /// The TipJar at head.
    pub fn tip_jar(&self) -> &TipJar {
        &self.head_state().tip_jar
    }

    /// Balance of `account` at head.
    pub fn balance(&self, account: &Address) -> U256 {
        self.head_state().accounts.balance(account)
    }

    /// Height of the head block.
    pub fn block_number(&self) -> u64 {
        self.head().header.number
    }

    /// Header at `number`, if mined.
    pub fn header(&self, number: u64) -> Option<BlockHeader> {
        let index = usize::try_from(number).ok()?;
        self.blocks.get(index).map(|block| block.header)
    }

    /// All logs in blocks `from..=to`, ordered by `(block_number, log_index)`.
    pub fn logs_in_range(&self, from: u64, to: u64) -> Vec<EmittedLog> {
        self.blocks
            .iter()
            .filter(|block| block.header.number >= from && block.header.number <= to)
            .flat_map(|block| block.logs.iter().cloned())
            .collect()
    }

    /// Credit `account` at head. A reorg below the current head discards the credit.
    pub fn fund(&mut self, account: Address, amount: U256) -> Result<()> {
        self.head_state_mut().accounts.mint(account, amount)
    }

    /// Make `account` refuse (or accept again) incoming value.
    pub fn set_rejects_value(&mut self, account: Address, rejects: bool) {
        self.head_state_mut()
            .accounts
            .set_rejects_value(account, rejects);
    }

    /// Send `tip(recipient)` with `value` from `sender`.
    pub fn tip(&mut self, sender: Address, recipient: Address, value: U256) -> Result<Receipt> {
        let data = ITipJar::tipCall { recipient }.abi_encode();
        self.transact_calldata(sender, value, &data)
    }

    /// Send `tipWithMessage(recipient, message)` with `value` from `sender`.
    pub fn tip_with_message(
        &mut self,
        sender: Address,
        recipient: Address,
        message: &str,
        value: U256,
    ) -> Result<Receipt> {
        let data = ITipJar::tipWithMessageCall {
            recipient,
            message: message.to_string(),
        }
        .abi_encode();
        self.transact_calldata(sender, value, &data)
    }

    /// Execute a payable call in a new block.
    ///
    /// On `Err` nothing is mined and head state is unchanged; the error's
    /// [`revert_data`](crate::LedgerError::revert_data) is what a node would return.
    pub fn transact_calldata(
        &mut self,
        sender: Address,
        value: U256,
        data: &[u8],
    ) -> Result<Receipt> {
        let parent = self.head().header;
        let number = parent.number + 1;
        let timestamp = self.timestamp_at(number);

        let mut state = self.head_state().clone();
        let contract = state.tip_jar.address();
        state.accounts.transfer(sender, contract, value)?;

        let mut raw_logs = Vec::new();
        let outcome = {
            let mut env = CallEnv {
                sender,
                value,
                timestamp,
                accounts: &mut state.accounts,
                logs: &mut raw_logs,
            };
            state.tip_jar.transact(&mut env, data)?
        };

        let tx_hash = self.next_tx_hash(sender, value, data);
        let block = self.push_block(state, parent.hash, vec![(tx_hash, raw_logs)]);

        debug!(
            block = block.header.number,
            tx = %tx_hash,
            logs = block.logs.len(),
            "Mined transaction"
        );

        Ok(Receipt {
            tx_hash,
            block_number: block.header.number,
            block_hash: block.header.hash,
            logs: block.logs.clone(),
            outcome,
        })
    }

    /// Evaluate a view call at head and return ABI-encoded output.
    pub fn call(&self, data: &[u8]) -> Result<Vec<u8>> {
        self.head_state().tip_jar.call_view(data)
    }

    /// Mine `count` blocks without transactions.
    pub fn mine_empty(&mut self, count: u64) {
        for _ in 0..count {
            let parent = self.head().header.hash;
            let state = self.head_state().clone();
            self.push_block(state, parent, Vec::new());
        }
    }

    /// Drop the last `depth` blocks and their effects.
    ///
    /// Never removes genesis and never goes deeper than the reorg window.
    /// Returns the number of blocks removed. Blocks mined afterwards get new hashes.
    pub fn reorg(&mut self, depth: u64) -> u64 {
        let removable = self.block_number().min(self.states.len() as u64 - 1);
        let removed = depth.min(removable);
        let keep = self.blocks.len() - removed as usize;
        self.blocks.truncate(keep);
        self.states.truncate(self.states.len() - removed as usize);
        self.fork += 1;

        info!(
            removed,
            head = self.block_number(),
            fork = self.fork,
            "Reorganized chain"
        );
        removed
    }

    fn head(&self) -> &Block {
        // Genesis is created in `new` and `reorg` never removes it.
        &self.blocks[self.blocks.len() - 1]
    }

    fn head_state(&self) -> &WorldState {
        // `new` pushes the genesis state and `reorg` always keeps one.
        &self.states[self.states.len() - 1]
    }

    fn head_state_mut(&mut self) -> &mut WorldState {
        let last = self.states.len() - 1;
        &mut self.states[last]
    }

    fn timestamp_at(&self, number: u64) -> u64 {
        self.config.genesis_timestamp + number * self.config.block_time_secs
    }

    fn next_tx_hash(&mut self, sender: Address, value: U256, data: &[u8]) -> B256 {
        let mut preimage = Vec::with_capacity(20 + 8 + 8 + 32 + data.len());
        preimage.extend_from_slice(sender.as_slice());
        preimage.extend_from_slice(&self.config.chain_id.to_be_bytes());
        preimage.extend_from_slice(&self.tx_nonce.to_be_bytes());
        preimage.extend_from_slice(&value.to_be_bytes::<32>());
        preimage.extend_from_slice(data);
        self.tx_nonce += 1;
        keccak256(&preimage)
    }

    fn push_block(
        &mut self,
        state: WorldState,
        parent_hash: B256,
        txs: Vec<(B256, Vec<Log>)>,
    ) -> &Block {
        let number = self.blocks.len() as u64;
        let timestamp = self.timestamp_at(number);

        let mut preimage = Vec::new();
        preimage.extend_from_slice(parent_hash.as_slice());
        preimage.extend_from_slice(&number.to_be_bytes());
        preimage.extend_from_slice(&timestamp.to_be_bytes());
        preimage.extend_from_slice(&self.fork.to_be_bytes());
        for (tx_hash, _) in &txs {
            preimage.extend_from_slice(tx_hash.as_slice());
        }
        let hash = keccak256(&preimage);

        let mut logs = Vec::new();
        for (tx_index, (tx_hash, tx_logs)) in txs.into_iter().enumerate() {
            for inner in tx_logs {
                let log_index = logs.len() as u64;
                logs.push(EmittedLog {
                    inner,
                    block_number: number,
                    block_hash: hash,
                    block_timestamp: timestamp,
                    tx_hash,
                    tx_index: tx_index as u64,
                    log_index,
                });
            }
        }

        self.blocks.push(Block {
            header: BlockHeader {
                number,
                hash,
                parent_hash,
                timestamp,
            },
            logs,
        });
        self.states.push_back(state);
        while self.states.len() as u64 > self.config.reorg_window + 1 {
            self.states.pop_front();
        }
        self.head()
    }
}
