//! Error taxonomy shared by every layer
//!
//! Each layer has its own `thiserror` enum; all of them map onto
//! [`ErrorKind`] so callers can decide between rejecting a block, aborting
//! it, or shutting the node down.

use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Empty or non-positive argument; the block is rejected
    InvalidInput,
    /// A roster slot or address record was referenced before it was created
    RecordNotFound,
    /// Weight or reward arithmetic left its representable range
    ArithmeticOverflow,
    /// The key-value store failed; fatal
    StorageFailure,
    /// Forger weight at or below the minimum floor; the block is rejected
    InsufficientWeight,
}

impl ErrorKind {
    /// Whether the node must stop instead of rejecting the block
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorKind::StorageFailure)
    }

    /// Whether the error means the caller handed the core an inconsistent
    /// transaction, which aborts the block being processed
    pub fn is_contract_violation(self) -> bool {
        matches!(self, ErrorKind::RecordNotFound | ErrorKind::ArithmeticOverflow)
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::InvalidInput => "invalid input",
            ErrorKind::RecordNotFound => "record not found",
            ErrorKind::ArithmeticOverflow => "arithmetic overflow",
            ErrorKind::StorageFailure => "storage failure",
            ErrorKind::InsufficientWeight => "insufficient weight",
        };
        f.write_str(name)
    }
}
