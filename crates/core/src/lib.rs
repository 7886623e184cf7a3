//! # TipJar Core
//!
//! Shared building blocks for the TipJar ledger, indexer and read API.
//!
//! This crate keeps every component on the same definitions of:
//!
//! - **ABI**: the `ITipJar` interface (functions, events, custom errors) declared with
//!   Alloy's `sol!` macro, so the ledger, the indexer and any client encode and decode
//!   the exact same bytes
//! - **Constants**: protocol fee in basis points, denominator, minimum tip, message cap
//! - **Fee math**: the pure `calculate_fee` split that every other component relies on
//! - **Types**: `CreatorStats` and address/amount parsing helpers

#![warn(missing_docs)]

pub mod abi;
pub mod constants;
pub mod error;
pub mod fee;
pub mod types;

pub use constants::*;
pub use error::{CoreError, Result};
pub use fee::{calculate_fee, FeeSplit};
pub use types::*;

// Re-export Alloy primitives for convenience
pub use alloy_primitives::{Address, B256, U256};
