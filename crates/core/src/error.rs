//! Error types for the core crate.

use thiserror::Error;

/// Core error type.
#[derive(Error, Debug, PartialEq, Eq)]
pub enum CoreError {
    /// Invalid address format.
    #[error("Invalid address: {0}")]
    InvalidAddress(String),

    /// Invalid wei amount (not a base-10 unsigned integer that fits in 256 bits).
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Byte slice had the wrong length for the target type.
    #[error("Invalid length for {kind}: expected {expected} bytes, got {actual}")]
    InvalidLength {
        /// Target type name.
        kind: &'static str,
        /// Expected length.
        expected: usize,
        /// Actual length.
        actual: usize,
    },
}

/// Result type alias for CoreError.
pub type Result<T> = std::result::Result<T, CoreError>;
