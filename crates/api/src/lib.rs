//! Axum-based read API for TipJar.
//!
//! This crate provides:
//! - `/tips/history?recipient=...&limit=...` - Tips received by an address, newest first
//! - `/creators/:address/stats` - Indexed totals for a recipient
//! - `/health` - Liveness probe
//!
//! The database is written by `tipjar-indexer` and opened read-only here.

#![warn(missing_docs)]

pub mod db;
/// API server runtime and in-process app builder.
pub mod server;
