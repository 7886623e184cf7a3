//! Ledger errors.
//!
//! Every variant aborts the whole call. Contract-level variants map to an
//! ABI-encoded custom error through [`LedgerError::revert_data`].

use alloy_primitives::{Address, U256};
use alloy_sol_types::SolError;
use thiserror::Error;
use tipjar_core::abi::ITipJar;

/// Reason a ledger call was rejected.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LedgerError {
    /// Recipient is the zero address.
    #[error("Invalid recipient: zero address")]
    InvalidRecipient,

    /// Tip value is below the minimum.
    #[error("Tip too small: {amount} wei (minimum {minimum} wei)")]
    TipTooSmall {
        /// Value sent.
        amount: U256,
        /// Required minimum.
        minimum: U256,
    },

    /// Message exceeds the byte cap.
    #[error("Message too long: {length} bytes (max {max})")]
    MessageTooLong {
        /// Message length in bytes.
        length: usize,
        /// Configured cap.
        max: usize,
    },

    /// An outbound value transfer failed.
    #[error("Transfer to {to} failed")]
    TransferFailed {
        /// Intended receiver.
        to: Address,
    },

    /// Sender cannot cover the call value.
    #[error("Insufficient balance for {account}: has {available} wei, needs {required} wei")]
    InsufficientBalance {
        /// Paying account.
        account: Address,
        /// Current balance.
        available: U256,
        /// Value required.
        required: U256,
    },

    /// A counter or balance would overflow.
    #[error("Arithmetic overflow")]
    Overflow,

    /// Calldata did not decode to a known function.
    #[error("Failed to decode calldata: {0}")]
    AbiDecode(String),

    /// A view function was sent as a transaction, or value was sent to a view.
    #[error("Unsupported call: {0}")]
    UnsupportedCall(&'static str),
}

impl LedgerError {
    /// ABI-encoded revert payload for contract-level errors.
    ///
    /// Environment failures (balance, decoding) have no custom error and return `None`.
    pub fn revert_data(&self) -> Option<Vec<u8>> {
        match self {
            LedgerError::InvalidRecipient => Some(ITipJar::InvalidRecipient {}.abi_encode()),
            LedgerError::TipTooSmall { .. } => Some(ITipJar::TipTooSmall {}.abi_encode()),
            LedgerError::MessageTooLong { length, max } => Some(
                ITipJar::MessageTooLong {
                    length: U256::from(*length),
                    maxLength: U256::from(*max),
                }
                .abi_encode(),
            ),
            LedgerError::TransferFailed { .. } => Some(ITipJar::TransferFailed {}.abi_encode()),
            LedgerError::InsufficientBalance { .. }
            | LedgerError::Overflow
            | LedgerError::AbiDecode(_)
            | LedgerError::UnsupportedCall(_) => None,
        }
    }
}

/// Result type alias for ledger operations.
pub type Result<T> = std::result::Result<T, LedgerError>;
