//! Roster module - per-owner member weights and club rewards

mod entry;
mod reward;
mod store;

pub use entry::*;
pub use reward::*;
pub use store::*;
