//! Protocol fee calculation.
//!
//! Splits a gross tip into the protocol fee and the creator's net amount.

use alloy_primitives::U256;
use serde::{Deserialize, Serialize};

use crate::constants::{BPS_DENOMINATOR, PROTOCOL_FEE_BPS};

/// Result of splitting a gross amount.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FeeSplit {
    /// Protocol fee, `floor(amount * PROTOCOL_FEE_BPS / BPS_DENOMINATOR)`.
    pub fee: U256,
    /// Amount forwarded to the recipient, `amount - fee`.
    pub net_amount: U256,
}

impl FeeSplit {
    /// Gross amount this split was computed from.
    pub fn gross(&self) -> U256 {
        self.fee + self.net_amount
    }
}

/// Split `amount` into `(fee, net_amount)`.
///
/// The fee is `floor(amount * 200 / 10_000)`. The product is never formed directly:
/// writing `amount = q * 10_000 + r` gives `fee = q * 200 + floor(r * 200 / 10_000)`,
/// which is exact and cannot overflow for any `U256`. `fee + net_amount == amount`
/// always holds.
///
/// # Example
///
/// ```
/// use tipjar_core::{calculate_fee, U256};
///
/// let split = calculate_fee(U256::from(10_000_000_000_000_000u64)); // 0.01 ether
/// assert_eq!(split.fee, U256::from(200_000_000_000_000u64));
/// assert_eq!(split.net_amount, U256::from(9_800_000_000_000_000u64));
/// ```
pub fn calculate_fee(amount: U256) -> FeeSplit {
    let bps = U256::from(PROTOCOL_FEE_BPS);
    let denominator = U256::from(BPS_DENOMINATOR);

    let quotient = amount / denominator;
    let remainder = amount % denominator;
    let fee = quotient * bps + remainder * bps / denominator;

    FeeSplit {
        fee,
        net_amount: amount - fee,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{MIN_TIP_AMOUNT, WEI_PER_ETHER};

    fn ether_fraction(numerator: u64, denominator: u64) -> U256 {
        WEI_PER_ETHER * U256::from(numerator) / U256::from(denominator)
    }

    #[test]
    fn test_fee_for_common_amounts() {
        // 0.01, 0.1, 1 and 10 ether
        for amount in [
            ether_fraction(1, 100),
            ether_fraction(1, 10),
            WEI_PER_ETHER,
            WEI_PER_ETHER * U256::from(10u64),
        ] {
            let split = calculate_fee(amount);
            assert_eq!(split.fee, amount * U256::from(200u64) / U256::from(10_000u64));
            assert_eq!(split.gross(), amount);
        }
    }

    #[test]
    fn test_fee_at_minimum_tip() {
        let split = calculate_fee(MIN_TIP_AMOUNT);
        assert_eq!(split.fee, U256::from(2_000_000_000_000u64));
        assert_eq!(split.fee + split.net_amount, MIN_TIP_AMOUNT);
    }

    #[test]
    fn test_fee_rounds_down() {
        // 49 * 200 / 10_000 = 0.98 -> 0
        let split = calculate_fee(U256::from(49u64));
        assert_eq!(split.fee, U256::ZERO);
        assert_eq!(split.net_amount, U256::from(49u64));

        // 50 * 200 / 10_000 = 1
        let split = calculate_fee(U256::from(50u64));
        assert_eq!(split.fee, U256::from(1u64));
        assert_eq!(split.net_amount, U256::from(49u64));

        // 12_345 -> 10_000 * 0.02 + floor(2_345 * 0.02) = 200 + 46
        let split = calculate_fee(U256::from(12_345u64));
        assert_eq!(split.fee, U256::from(246u64));
    }

    #[test]
    fn test_fee_for_zero() {
        let split = calculate_fee(U256::ZERO);
        assert_eq!(split.fee, U256::ZERO);
        assert_eq!(split.net_amount, U256::ZERO);
    }

    #[test]
    fn test_fee_does_not_overflow_at_max() {
        let split = calculate_fee(U256::MAX);
        assert_eq!(split.gross(), U256::MAX);
        assert!(split.fee < split.net_amount);
    }

    #[test]
    fn test_fee_matches_floor_formula_across_remainders() {
        let base = U256::from(7u64) * WEI_PER_ETHER;
        for remainder in [0u64, 1, 49, 50, 51, 4_999, 5_000, 9_999] {
            let amount = base + U256::from(remainder);
            let expected = amount * U256::from(PROTOCOL_FEE_BPS) / U256::from(BPS_DENOMINATOR);
            let split = calculate_fee(amount);
            assert_eq!(split.fee, expected, "remainder {remainder}");
            assert_eq!(split.gross(), amount);
        }
    }
}
