//! Consensus errors

use thiserror::Error;

use crate::crypto::{Address, SignatureError};
use crate::error::ErrorKind;
use crate::ledger::LedgerError;

#[derive(Debug, Error)]
pub enum ConsensusError {
    #[error("invalid forging input: {0}")]
    InvalidInput(&'static str),
    #[error("forger key is unusable: {0}")]
    InvalidKey(#[from] SignatureError),
    #[error("harvest power {power} of {address} is at or below the floor {floor}")]
    InsufficientWeight {
        address: Address,
        power: u64,
        floor: u64,
    },
    #[error("harvest power lookup failed: {0}")]
    Ledger(#[from] LedgerError),
}

impl ConsensusError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ConsensusError::InvalidInput(_) | ConsensusError::InvalidKey(_) => ErrorKind::InvalidInput,
            ConsensusError::InsufficientWeight { .. } => ErrorKind::InsufficientWeight,
            ConsensusError::Ledger(e) => e.kind(),
        }
    }
}
