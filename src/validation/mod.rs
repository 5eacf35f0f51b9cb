//! Validation module - transaction model consumed by the weight ledger

mod transaction;

pub use transaction::*;
