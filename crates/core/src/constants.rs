//! Protocol constants for the TipJar ledger.
//!
//! These values are part of the public ABI (`PROTOCOL_FEE_BPS()`, `BPS_DENOMINATOR()`,
//! `MIN_TIP_AMOUNT()`) and MUST stay in sync with deployed contracts.

use alloy_primitives::U256;

/// Protocol fee in basis points (200 = 2%).
pub const PROTOCOL_FEE_BPS: u64 = 200;

/// Basis point denominator (10_000 = 100%).
pub const BPS_DENOMINATOR: u64 = 10_000;

/// Minimum gross tip in wei (0.0001 ether).
///
/// Keeps dust out of the ledger and guarantees a non-zero fee.
pub const MIN_TIP_AMOUNT: U256 = U256::from_limbs([100_000_000_000_000, 0, 0, 0]);

/// Default cap on `tipWithMessage` message length, in UTF-8 bytes.
pub const DEFAULT_MAX_MESSAGE_BYTES: usize = 280;

/// One ether in wei.
pub const WEI_PER_ETHER: U256 = U256::from_limbs([1_000_000_000_000_000_000, 0, 0, 0]);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_min_tip_is_a_ten_thousandth_of_an_ether() {
        assert_eq!(MIN_TIP_AMOUNT * U256::from(10_000u64), WEI_PER_ETHER);
    }

    #[test]
    fn test_min_tip_fee_is_non_zero() {
        let fee = MIN_TIP_AMOUNT * U256::from(PROTOCOL_FEE_BPS) / U256::from(BPS_DENOMINATOR);
        assert!(!fee.is_zero());
    }
}
