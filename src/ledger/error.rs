//! Ledger errors

use thiserror::Error;

use crate::crypto::{Address, SignatureError};
use crate::error::ErrorKind;
use crate::roster::RosterError;
use crate::storage::StorageError;
use crate::validation::OutPoint;

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error(transparent)]
    Storage(#[from] StorageError),
    #[error(transparent)]
    Roster(#[from] RosterError),
    #[error("no record for address {0}")]
    UnknownAddress(Address),
    #[error("spent coin {}:{} is missing from the coin view", .0.tx_hash, .0.index)]
    MissingCoin(OutPoint),
    #[error("harvest power of {0} would go out of range")]
    PowerOutOfRange(Address),
    #[error("reward claim carries an unusable key: {0}")]
    InvalidClaimKey(#[from] SignatureError),
    #[error("height {height} does not follow committed height {committed:?}")]
    UnexpectedHeight { height: u64, committed: Option<u64> },
    #[error("ledger height {ledger:?} disagrees with roster height {roster:?}")]
    HeightMismatch {
        ledger: Option<u64>,
        roster: Option<u64>,
    },
    #[error("undo at height {height} expected {expected} but the journal holds {found}")]
    JournalMismatch {
        height: u64,
        expected: String,
        found: String,
    },
    #[error("journal of height {height} still holds {remaining} operations")]
    JournalNotConsumed { height: u64, remaining: usize },
    #[error("genesis can only be seeded into an empty ledger")]
    AlreadySeeded,
}

impl LedgerError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Storage(e) => e.kind(),
            LedgerError::Roster(e) => e.kind(),
            LedgerError::UnknownAddress(_)
            | LedgerError::MissingCoin(_)
            | LedgerError::JournalMismatch { .. }
            | LedgerError::JournalNotConsumed { .. } => ErrorKind::RecordNotFound,
            LedgerError::PowerOutOfRange(_) => ErrorKind::ArithmeticOverflow,
            LedgerError::InvalidClaimKey(_)
            | LedgerError::UnexpectedHeight { .. }
            | LedgerError::AlreadySeeded => ErrorKind::InvalidInput,
            LedgerError::HeightMismatch { .. } => ErrorKind::StorageFailure,
        }
    }
}
