//! World state: account balances and TipJar contract storage.
//!
//! Everything here is `Clone`; the [`Chain`](crate::Chain) snapshots it before each
//! call and only keeps the mutated copy when the call succeeds.

use alloy_primitives::{Address, U256};
use std::collections::{HashMap, HashSet};
use tipjar_core::{CreatorStats, DEFAULT_MAX_MESSAGE_BYTES};

use crate::error::{LedgerError, Result};

/// Native-value balances.
#[derive(Debug, Clone, Default)]
pub struct Accounts {
    balances: HashMap<Address, U256>,
    /// Accounts whose receive hook reverts (e.g. a contract without a payable fallback).
    rejects_value: HashSet<Address>,
}

impl Accounts {
    /// Balance of `account` (zero when never touched).
    pub fn balance(&self, account: &Address) -> U256 {
        self.balances.get(account).copied().unwrap_or(U256::ZERO)
    }

    /// Mark `account` as refusing (or accepting again) incoming value.
    pub fn set_rejects_value(&mut self, account: Address, rejects: bool) {
        if rejects {
            self.rejects_value.insert(account);
        } else {
            self.rejects_value.remove(&account);
        }
    }

    /// Mint value into `account` outside of any call (genesis allocation, faucets).
    pub fn mint(&mut self, account: Address, amount: U256) -> Result<()> {
        let balance = self.balances.entry(account).or_default();
        *balance = balance.checked_add(amount).ok_or(LedgerError::Overflow)?;
        Ok(())
    }

    /// Move `amount` from `from` to `to`.
    ///
    /// Fails with `TransferFailed` if `to` refuses value and with
    /// `InsufficientBalance` if `from` cannot cover it.
    pub fn transfer(&mut self, from: Address, to: Address, amount: U256) -> Result<()> {
        if self.rejects_value.contains(&to) {
            return Err(LedgerError::TransferFailed { to });
        }

        let available = self.balance(&from);
        if available < amount {
            return Err(LedgerError::InsufficientBalance {
                account: from,
                available,
                required: amount,
            });
        }

        self.balances.insert(from, available - amount);
        let credited = self
            .balance(&to)
            .checked_add(amount)
            .ok_or(LedgerError::Overflow)?;
        self.balances.insert(to, credited);
        Ok(())
    }
}

/// Deployment-time ledger policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerConfig {
    /// Maximum `tipWithMessage` message length in UTF-8 bytes.
    pub max_message_bytes: usize,
}

impl Default for LedgerConfig {
    fn default() -> Self {
        Self {
            max_message_bytes: DEFAULT_MAX_MESSAGE_BYTES,
        }
    }
}

/// Persistent storage of the TipJar contract.
#[derive(Debug, Clone)]
pub struct TipJarStorage {
    /// Immutable after deployment.
    pub(crate) protocol_fee_recipient: Address,
    pub(crate) config: LedgerConfig,
    pub(crate) creator_stats: HashMap<Address, CreatorStats>,
    pub(crate) global_tip_count: u64,
}

impl TipJarStorage {
    pub(crate) fn new(protocol_fee_recipient: Address, config: LedgerConfig) -> Self {
        Self {
            protocol_fee_recipient,
            config,
            creator_stats: HashMap::new(),
            global_tip_count: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_moves_value() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let mut accounts = Accounts::default();
        accounts.mint(a, U256::from(100u64)).unwrap();

        accounts.transfer(a, b, U256::from(30u64)).unwrap();
        assert_eq!(accounts.balance(&a), U256::from(70u64));
        assert_eq!(accounts.balance(&b), U256::from(30u64));
    }

    #[test]
    fn test_transfer_rejects_overdraft() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let mut accounts = Accounts::default();
        accounts.mint(a, U256::from(10u64)).unwrap();

        let err = accounts.transfer(a, b, U256::from(11u64)).unwrap_err();
        assert!(matches!(err, LedgerError::InsufficientBalance { .. }));
        assert_eq!(accounts.balance(&a), U256::from(10u64));
    }

    #[test]
    fn test_rejecting_account_fails_transfer() {
        let a = Address::repeat_byte(0x0a);
        let b = Address::repeat_byte(0x0b);
        let mut accounts = Accounts::default();
        accounts.mint(a, U256::from(10u64)).unwrap();
        accounts.set_rejects_value(b, true);

        assert_eq!(
            accounts.transfer(a, b, U256::from(1u64)),
            Err(LedgerError::TransferFailed { to: b })
        );

        accounts.set_rejects_value(b, false);
        assert!(accounts.transfer(a, b, U256::from(1u64)).is_ok());
    }
}
