//! TipJar ledger.
//!
//! The authoritative fee-accounting state machine ([`TipJar`]) and the
//! in-process [`Chain`] that executes it: balances, one block per
//! transaction, per-call atomicity, ABI-encoded logs and reverts.

#![warn(missing_docs)]

pub mod chain;
pub mod error;
pub mod state;
pub mod tip_jar;

pub use chain::{BlockHeader, Chain, ChainConfig, EmittedLog, Receipt};
pub use error::{LedgerError, Result};
pub use state::{Accounts, LedgerConfig};
pub use tip_jar::{CallEnv, TipJar, TipOutcome};
