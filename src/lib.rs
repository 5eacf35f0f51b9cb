//! PoT Core Library
//!
//! Proof-of-Transaction full-node core: a height-versioned, reorg-safe
//! ledger of delegation records and club rosters, and the consensus engine
//! that weighs forgers by the harvest power that ledger assigns them.

pub mod config;
pub mod consensus;
pub mod crypto;
pub mod error;
pub mod instrumentation;
pub mod ledger;
pub mod logging;
pub mod node;
pub mod roster;
pub mod storage;
pub mod validation;

/// Protocol constants
pub mod constants {
    /// Base units per coin (8 decimal places)
    pub const COIN: u64 = 100_000_000;

    /// Upper bound on any amount, in base units
    pub const MAX_MONEY: u64 = 21_000_000 * COIN;

    /// Target block spacing in seconds
    pub const TARGET_SPACING: u64 = 60;

    /// Base target of the first blocks
    pub const GENESIS_BASE_TARGET: u64 = 153_722_867;

    /// Chain name; seeds the genesis generation signature
    pub const CHAIN_NAME: &str = "PoT";

    /// Genesis timestamp (Unix timestamp)
    pub const GENESIS_TIMESTAMP: u64 = 1_760_000_000;

    /// Addresses whose version chains are memoized by default
    pub const DEFAULT_HISTORY_MEMO_CAPACITY: usize = 4096;
}
