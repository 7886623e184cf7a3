//! TipJar event ingestion.
//!
//! This crate provides:
//! - Event listeners for `TipSent` and `TipMessage` logs
//! - Idempotent tip storage with creator stats kept in the same transaction
//! - Confirmation-lagged sync with checkpoint history and reorg rollback
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────┐
//! │  tipjar-indexer (this)       │
//! │                              │
//! │  ┌─────────────────┐         │
//! │  │   Sync Engine   │ ← RPC   │
//! │  │   (tokio task)  │   TipSent + TipMessage
//! │  └────────┬────────┘         │
//! │           │                  │
//! │      ┌────▼──────┐           │
//! │      │  Storage  │ ← SQLite  │
//! │      │ (tips,    │   WAL     │
//! │      │  stats)   │           │
//! │      └───────────┘           │
//! └──────────────────────────────┘
//!          │
//!          │ Shared DB (read-only)
//!          │
//! ┌────────▼──────────────────────┐
//! │   tipjar-api (separate)       │
//! │   • GET /tips/history         │
//! │   • GET /creators/:a/stats    │
//! │   • GET /health               │
//! └───────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod config;
pub mod listener;
pub mod storage;

pub use tipjar_core::{types::*, *};
