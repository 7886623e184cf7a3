//! TipJar contract logic.
//!
//! Handlers validate first, then move value, then update counters, then emit
//! events. A handler returning `Err` may have partially mutated its inputs; the
//! [`Chain`](crate::Chain) discards them in that case.

use alloy_primitives::{Address, Log, U256};
use alloy_sol_types::{SolCall, SolEvent, SolInterface};
use tipjar_core::abi::ITipJar::{self, ITipJarCalls};
use tipjar_core::{
    calculate_fee, CreatorStats, FeeSplit, BPS_DENOMINATOR, MIN_TIP_AMOUNT, PROTOCOL_FEE_BPS,
};
use tracing::debug;

use crate::error::{LedgerError, Result};
use crate::state::{Accounts, LedgerConfig, TipJarStorage};

/// Context of one incoming call.
pub struct CallEnv<'a> {
    /// `msg.sender`.
    pub sender: Address,
    /// `msg.value`, already credited to the contract.
    pub value: U256,
    /// `block.timestamp`.
    pub timestamp: u64,
    /// Balances, mutated by outbound transfers.
    pub accounts: &'a mut Accounts,
    /// Logs emitted so far in this transaction.
    pub logs: &'a mut Vec<Log>,
}

/// Outcome of an accepted tip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TipOutcome {
    /// Tipped creator.
    pub recipient: Address,
    /// Gross amount.
    pub amount: U256,
    /// Fee and net split of `amount`.
    pub split: FeeSplit,
    /// Recipient stats after the tip.
    pub stats: CreatorStats,
}

/// A deployed TipJar.
#[derive(Debug, Clone)]
pub struct TipJar {
    address: Address,
    storage: TipJarStorage,
}

impl TipJar {
    /// Deploy at `address`. The fee recipient is fixed for the lifetime of the contract.
    pub fn deploy(
        address: Address,
        protocol_fee_recipient: Address,
        config: LedgerConfig,
    ) -> Result<Self> {
        if protocol_fee_recipient == Address::ZERO {
            return Err(LedgerError::InvalidRecipient);
        }

        Ok(Self {
            address,
            storage: TipJarStorage::new(protocol_fee_recipient, config),
        })
    }

    /// Contract address.
    pub fn address(&self) -> Address {
        self.address
    }

    /// Receiver of every protocol fee.
    pub fn protocol_fee_recipient(&self) -> Address {
        self.storage.protocol_fee_recipient
    }

    /// Deployment policy.
    pub fn config(&self) -> &LedgerConfig {
        &self.storage.config
    }

    /// Number of tips accepted across all recipients.
    pub fn global_tip_count(&self) -> u64 {
        self.storage.global_tip_count
    }

    /// Stats for `creator`, `(0, 0)` if it never received a tip.
    pub fn get_creator_stats(&self, creator: &Address) -> CreatorStats {
        self.storage
            .creator_stats
            .get(creator)
            .copied()
            .unwrap_or_default()
    }

    /// Pure fee split.
    pub fn calculate_fee(amount: U256) -> FeeSplit {
        calculate_fee(amount)
    }

    /// `tip(address)`.
    pub fn tip(&mut self, env: &mut CallEnv<'_>, recipient: Address) -> Result<TipOutcome> {
        self.check_tip(env, recipient)?;
        self.settle(env, recipient)
    }

    /// `tipWithMessage(address,string)`. Emits `TipMessage` right after `TipSent`.
    pub fn tip_with_message(
        &mut self,
        env: &mut CallEnv<'_>,
        recipient: Address,
        message: &str,
    ) -> Result<TipOutcome> {
        self.check_tip(env, recipient)?;

        let max = self.storage.config.max_message_bytes;
        if message.len() > max {
            return Err(LedgerError::MessageTooLong {
                length: message.len(),
                max,
            });
        }

        let outcome = self.settle(env, recipient)?;
        self.emit(
            env,
            &ITipJar::TipMessage {
                sender: env.sender,
                recipient,
                message: message.to_string(),
            },
        );
        Ok(outcome)
    }

    /// Execute a payable call from ABI calldata.
    pub fn transact(&mut self, env: &mut CallEnv<'_>, data: &[u8]) -> Result<TipOutcome> {
        match decode_call(data)? {
            ITipJarCalls::tip(call) => self.tip(env, call.recipient),
            ITipJarCalls::tipWithMessage(call) => {
                self.tip_with_message(env, call.recipient, &call.message)
            }
            _ => Err(LedgerError::UnsupportedCall("view function sent as transaction")),
        }
    }

    /// Answer a view call from ABI calldata with ABI-encoded return data.
    pub fn call_view(&self, data: &[u8]) -> Result<Vec<u8>> {
        let encoded = match decode_call(data)? {
            ITipJarCalls::calculateFee(call) => {
                let split = calculate_fee(call.amount);
                ITipJar::calculateFeeCall::abi_encode_returns(&(split.fee, split.net_amount))
            }
            ITipJarCalls::getCreatorStats(call) => {
                let stats = self.get_creator_stats(&call.creator);
                ITipJar::getCreatorStatsCall::abi_encode_returns(&(
                    stats.total_tips,
                    U256::from(stats.tip_count),
                ))
            }
            ITipJarCalls::PROTOCOL_FEE_BPS(_) => {
                ITipJar::PROTOCOL_FEE_BPSCall::abi_encode_returns(&(U256::from(PROTOCOL_FEE_BPS),))
            }
            ITipJarCalls::BPS_DENOMINATOR(_) => {
                ITipJar::BPS_DENOMINATORCall::abi_encode_returns(&(U256::from(BPS_DENOMINATOR),))
            }
            ITipJarCalls::MIN_TIP_AMOUNT(_) => {
                ITipJar::MIN_TIP_AMOUNTCall::abi_encode_returns(&(MIN_TIP_AMOUNT,))
            }
            ITipJarCalls::protocolFeeRecipient(_) => {
                ITipJar::protocolFeeRecipientCall::abi_encode_returns(&(self
                    .storage
                    .protocol_fee_recipient,))
            }
            ITipJarCalls::globalTipCount(_) => ITipJar::globalTipCountCall::abi_encode_returns(&(
                U256::from(self.storage.global_tip_count),
            )),
            ITipJarCalls::tip(_) | ITipJarCalls::tipWithMessage(_) => {
                return Err(LedgerError::UnsupportedCall("payable function sent as view call"))
            }
        };
        Ok(encoded)
    }

    fn check_tip(&self, env: &CallEnv<'_>, recipient: Address) -> Result<()> {
        if recipient == Address::ZERO {
            return Err(LedgerError::InvalidRecipient);
        }
        if env.value < MIN_TIP_AMOUNT {
            return Err(LedgerError::TipTooSmall {
                amount: env.value,
                minimum: MIN_TIP_AMOUNT,
            });
        }
        Ok(())
    }

    fn settle(&mut self, env: &mut CallEnv<'_>, recipient: Address) -> Result<TipOutcome> {
        let amount = env.value;
        let split = calculate_fee(amount);

        env.accounts
            .transfer(self.address, self.storage.protocol_fee_recipient, split.fee)?;
        env.accounts
            .transfer(self.address, recipient, split.net_amount)?;

        let stats = self
            .get_creator_stats(&recipient)
            .checked_record(amount)
            .ok_or(LedgerError::Overflow)?;
        self.storage.creator_stats.insert(recipient, stats);
        self.storage.global_tip_count = self
            .storage
            .global_tip_count
            .checked_add(1)
            .ok_or(LedgerError::Overflow)?;

        self.emit(
            env,
            &ITipJar::TipSent {
                sender: env.sender,
                recipient,
                amount,
                fee: split.fee,
                netAmount: split.net_amount,
                timestamp: U256::from(env.timestamp),
            },
        );

        debug!(
            sender = %env.sender,
            recipient = %recipient,
            amount = %amount,
            fee = %split.fee,
            tip_count = stats.tip_count,
            "Tip settled"
        );

        Ok(TipOutcome {
            recipient,
            amount,
            split,
            stats,
        })
    }

    fn emit<E: SolEvent>(&self, env: &mut CallEnv<'_>, event: &E) {
        env.logs.push(Log {
            address: self.address,
            data: event.encode_log_data(),
        });
    }
}

fn decode_call(data: &[u8]) -> Result<ITipJarCalls> {
    ITipJarCalls::abi_decode(data, true).map_err(|e| LedgerError::AbiDecode(e.to_string()))
}
