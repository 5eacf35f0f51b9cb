//! Ledger module - height-versioned delegation records
//!
//! [`AddressLedger`] owns the records, the roster store and the undo
//! journal; [`LedgerHistory`] serves past heights without its lock.

mod address_ledger;
mod error;
mod history;
mod journal;
mod record;

pub use address_ledger::*;
pub use error::*;
pub use history::*;
pub use journal::LedgerOp;
pub use record::*;
