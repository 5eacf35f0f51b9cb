//! Node module - ledger service, chain orchestration and genesis

mod chain;
mod genesis;
mod service;

pub use chain::*;
pub use genesis::*;
pub use service::*;
