//! Shared domain types and boundary parsing helpers.

use alloy_primitives::{Address, B256, U256};
use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::error::{CoreError, Result};

/// Aggregate tip statistics for one recipient.
///
/// The ledger maintains these authoritatively; the indexer mirrors them.
/// An address with no history has `CreatorStats::default()`, i.e. `(0, 0)`.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreatorStats {
    /// Sum of gross tip amounts in wei.
    pub total_tips: U256,
    /// Number of tips received.
    pub tip_count: u64,
}

impl CreatorStats {
    /// Fold one more tip of `amount` into the stats.
    ///
    /// Returns `None` on overflow.
    pub fn checked_record(&self, amount: U256) -> Option<Self> {
        Some(Self {
            total_tips: self.total_tips.checked_add(amount)?,
            tip_count: self.tip_count.checked_add(1)?,
        })
    }
}

/// Parse a hex address (`0x`-prefixed or bare, any case).
pub fn parse_address(input: &str) -> Result<Address> {
    let trimmed = input.trim();
    if trimmed.is_empty() {
        return Err(CoreError::InvalidAddress("empty".to_string()));
    }
    Address::from_str(trimmed).map_err(|_| CoreError::InvalidAddress(trimmed.to_string()))
}

/// Parse an address stored as raw bytes.
pub fn address_from_bytes(bytes: &[u8]) -> Result<Address> {
    Address::try_from(bytes).map_err(|_| CoreError::InvalidLength {
        kind: "address",
        expected: 20,
        actual: bytes.len(),
    })
}

/// Parse a 32-byte hash stored as raw bytes.
pub fn b256_from_bytes(bytes: &[u8]) -> Result<B256> {
    B256::try_from(bytes).map_err(|_| CoreError::InvalidLength {
        kind: "bytes32",
        expected: 32,
        actual: bytes.len(),
    })
}

/// Parse a canonical base-10 wei amount.
pub fn parse_amount(input: &str) -> Result<U256> {
    let trimmed = input.trim();
    if trimmed.is_empty() || !trimmed.bytes().all(|b| b.is_ascii_digit()) {
        return Err(CoreError::InvalidAmount(input.to_string()));
    }
    U256::from_str_radix(trimmed, 10).map_err(|_| CoreError::InvalidAmount(input.to_string()))
}

/// Render a wei amount as a canonical base-10 string.
pub fn format_amount(amount: &U256) -> String {
    amount.to_string()
}
