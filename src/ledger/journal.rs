//! Per-height operation journal
//!
//! Forward processing appends one operation per ledger effect. The journal
//! is persisted with the block so undo can pop it in reverse and check each
//! step against what it recomputes from the transaction.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::AddressRecord;
use crate::crypto::Address;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum LedgerOp {
    /// An entrust or distribution that changed nothing
    Unchanged,
    Entrusted {
        from: Address,
        to: Address,
        /// `from`'s record before the move
        previous: AddressRecord,
        /// Member swapped into `from`'s old slot
        moved: Option<Address>,
    },
    /// First appearance of `address`, placed in `roster`
    Joined { address: Address, roster: Address },
    Credited { address: Address },
    Claimed { address: Address, amount: u64 },
    Distributed {
        root: Address,
        amount: u64,
        distributed: u64,
    },
}

impl fmt::Display for LedgerOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            LedgerOp::Unchanged => f.write_str("no-op"),
            LedgerOp::Entrusted { from, to, .. } => write!(f, "entrust {from} -> {to}"),
            LedgerOp::Joined { address, roster } => write!(f, "join {address} into {roster}"),
            LedgerOp::Credited { address } => write!(f, "credit {address}"),
            LedgerOp::Claimed { address, amount } => write!(f, "claim {amount} by {address}"),
            LedgerOp::Distributed { root, amount, .. } => write!(f, "distribute {amount} over {root}"),
        }
    }
}

/// Undo scratch for the height being disconnected
#[derive(Debug, Default)]
pub(crate) struct UndoScratch {
    pub height: u64,
    pub ops: Vec<LedgerOp>,
    /// Addresses whose first appearance was undone, in undo order
    pub removals: Vec<Address>,
}
