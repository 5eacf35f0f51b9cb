//! Storage module - key-value collaborator, key layout, coin view

pub mod db;
mod error;
pub mod keys;
mod kv;
mod memory;
mod utxo;

pub use db::SledStore;
pub use error::*;
pub use kv::*;
pub use memory::*;
pub use utxo::*;
