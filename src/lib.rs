//! # Lattice
//!
//! The consensus core of the Lattice layer-one node:
//! - **GHOSTDAG ledger** — blocks form a DAG, totally ordered by blue score
//! - **Proof-of-stake** — stake-weighted leader selection with layered
//!   soft/hard finality
//! - **Post-quantum authentication** — CRYSTALS-Dilithium block signatures
//!   with per-chain domain separation
//! - **Deterministic persistence** — write-once block files plus an
//!   append-only, fsynced log that drives crash recovery
//!
//! The JSON-RPC surface, peer-to-peer transport, and indexer are external
//! collaborators; they consume the ports in [`network`] and [`node`].

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod mempool;
pub mod network;
pub mod node;
pub mod producer;
pub mod replay;
pub mod storage;
pub mod transaction;

/// Protocol constants
pub mod constants {
    /// Maximum clock drift allowed into the future for block timestamps (seconds).
    pub const MAX_FUTURE_DRIFT_SECS: i64 = 300;
    /// Oldest acceptable block timestamp relative to now (seconds).
    pub const MAX_PAST_DRIFT_SECS: i64 = 3600;
    /// Sanity floor for a hex-decoded post-quantum signature, in bytes.
    /// Dilithium2 signatures are 2420 bytes; anything under this is garbage.
    pub const MIN_SIGNATURE_BYTES: usize = 100;
    /// Bounded nonce look-ahead accepted by the mempool for out-of-order
    /// submissions from one account.
    pub const NONCE_LOOKAHEAD: u64 = 10;
    /// Default minimum gas price accepted by the mempool (1 gwei).
    pub const DEFAULT_MIN_GAS_PRICE: u128 = 1_000_000_000;
    /// Default per-transaction gas limit ceiling (1M gas).
    pub const DEFAULT_MAX_TX_GAS_LIMIT: u64 = 1_000_000;
    /// Default mempool capacity in transactions.
    pub const DEFAULT_MEMPOOL_SIZE: usize = 10_000;
    /// Default block gas budget (15M gas).
    pub const DEFAULT_BLOCK_GAS_LIMIT: u64 = 15_000_000;
    /// Default minimum block gas budget (1M gas).
    pub const DEFAULT_MIN_BLOCK_GAS_LIMIT: u64 = 1_000_000;
    /// Interval between node status log lines (seconds).
    pub const MONITOR_INTERVAL_SECS: u64 = 30;
    /// Total budget for graceful shutdown (seconds).
    pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
    /// Sentinel hash of the genesis block.
    pub const GENESIS_HASH: &str = "genesis";
}

/// Current Unix time in seconds.
pub(crate) fn unix_now() -> i64 {
    use std::time::{SystemTime, UNIX_EPOCH};
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
