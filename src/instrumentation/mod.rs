//! Instrumentation module - diagnostics recorded alongside the ledger

mod reward_rate;

pub use reward_rate::*;
