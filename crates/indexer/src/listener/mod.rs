//! Event listener for TipJar `TipSent` and `TipMessage` events.
//!
//! This module provides:
//! - Event decoding and message pairing
//! - The [`ChainSource`] seam with an RPC implementation and an in-process one
//! - Sync engine for historical and live block processing with reorg recovery

pub mod events;
pub mod local;
pub mod provider;
pub mod sync;

pub use events::{decode_logs, DecodedLogs, TipJarEvent};
pub use local::LocalChainSource;
pub use provider::{BlockHeader, ChainSource, RpcProvider};
pub use sync::{ChainIdMismatch, SyncEngine, SyncStep};
