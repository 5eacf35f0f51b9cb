//! Chain state management
//!
//! Connects and disconnects blocks at the tip: every consensus check runs
//! before the ledger is touched, then the block's transactions flow through
//! the ledger service and the height is committed. The coin view is
//! in-memory; a failed block leaves it untouched.

use num_bigint::BigUint;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::LedgerService;
use crate::consensus::{derive_generation_signature, verify_generation_signature, AncestorInfo, Block, ConsensusError, RETARGET_WINDOW};
use crate::crypto::{Address, Hash, PublicKey};
use crate::error::ErrorKind;
use crate::ledger::LedgerError;
use crate::storage::{Coin, UtxoSet};
use crate::validation::OutPoint;

#[derive(Debug, Error)]
pub enum ChainError {
    #[error("block builds on {found}, tip is {expected}")]
    UnexpectedParent { expected: Hash, found: Hash },
    #[error("block height {found} does not follow tip height {tip}")]
    UnexpectedHeight { tip: u64, found: u64 },
    #[error("payload hash does not match the transactions")]
    InvalidPayload,
    #[error("forger signature does not verify")]
    InvalidForgerSignature,
    #[error("generation signature does not follow the previous block")]
    InvalidGenerationSignature,
    #[error("base target {found} differs from the retargeted {expected}")]
    UnexpectedBaseTarget { expected: u64, found: u64 },
    #[error("forger did not win the round at height {height}")]
    ForgingRejected { height: u64 },
    #[error("genesis block cannot be disconnected")]
    GenesisDisconnect,
    #[error("chain must start from a genesis block")]
    NotGenesis,
    #[error("ledger is already at height {0}, past genesis")]
    LedgerAhead(u64),
    #[error(transparent)]
    Consensus(#[from] ConsensusError),
    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ChainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            ChainError::Consensus(e) => e.kind(),
            ChainError::Ledger(e) => e.kind(),
            ChainError::LedgerAhead(_) => ErrorKind::StorageFailure,
            _ => ErrorKind::InvalidInput,
        }
    }

    /// Whether the node must stop rather than drop the block
    pub fn is_fatal(&self) -> bool {
        self.kind().is_fatal()
    }
}

struct ChainEntry {
    block: Block,
    hash: Hash,
    cumulative_difficulty: BigUint,
    /// Coins spent by each transaction, for disconnecting
    spent: Vec<Vec<(OutPoint, Coin)>>,
}

/// Snapshot of the tip
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChainStats {
    pub height: u64,
    pub tip_hash: Hash,
    pub base_target: u64,
    pub cumulative_difficulty: BigUint,
    pub coin_count: usize,
}

pub struct ChainState {
    service: Arc<LedgerService>,
    coins: UtxoSet,
    /// Indexed by height
    entries: Vec<ChainEntry>,
}

impl std::fmt::Debug for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChainState").field("entries", &self.entries.len()).finish_non_exhaustive()
    }
}

impl ChainState {
    /// Start a chain from `genesis`, seeding `roots` into an empty ledger
    pub fn from_genesis(service: Arc<LedgerService>, genesis: Block, roots: &[Address]) -> Result<Self, ChainError> {
        if !genesis.is_genesis() {
            return Err(ChainError::NotGenesis);
        }
        match service.committed_height() {
            None => service.seed_genesis(roots)?,
            Some(0) => debug!("ledger already seeded"),
            Some(height) => return Err(ChainError::LedgerAhead(height)),
        }

        let mut coins = UtxoSet::new();
        let spent = genesis
            .transactions
            .iter()
            .map(|tx| coins.apply_transaction(tx, 0))
            .collect();
        let hash = genesis.hash();
        let cumulative_difficulty = service.next_cumulative_difficulty(&BigUint::default(), genesis.header.base_target);
        info!(hash = %hash, "chain started from genesis");
        Ok(Self {
            service,
            coins,
            entries: vec![ChainEntry {
                block: genesis,
                hash,
                cumulative_difficulty,
                spent,
            }],
        })
    }

    fn tip_entry(&self) -> &ChainEntry {
        // Never empty: genesis cannot be disconnected
        &self.entries[self.entries.len() - 1]
    }

    pub fn height(&self) -> u64 {
        self.tip_entry().block.height()
    }

    pub fn tip_hash(&self) -> Hash {
        self.tip_entry().hash
    }

    pub fn tip(&self) -> &Block {
        &self.tip_entry().block
    }

    pub fn cumulative_difficulty(&self) -> &BigUint {
        &self.tip_entry().cumulative_difficulty
    }

    pub fn coins(&self) -> &UtxoSet {
        &self.coins
    }

    pub fn service(&self) -> &Arc<LedgerService> {
        &self.service
    }

    /// Tip first, as many as the retarget looks at
    pub fn ancestors(&self) -> Vec<AncestorInfo> {
        self.entries
            .iter()
            .rev()
            .take(RETARGET_WINDOW as usize + 1)
            .map(|entry| AncestorInfo {
                height: entry.block.header.height,
                timestamp: entry.block.header.timestamp,
                base_target: entry.block.header.base_target,
            })
            .collect()
    }

    /// Base target the next block must carry
    pub fn next_base_target(&self) -> u64 {
        self.service.retarget_base_target(&self.ancestors())
    }

    /// Generation signature `forger` must put in the next block
    pub fn next_generation_signature(&self, forger: &PublicKey) -> Result<Hash, ChainError> {
        Ok(derive_generation_signature(&self.tip().header.generation_signature, forger)?)
    }

    /// Validate `block` against the tip and connect it
    pub fn connect_block(&mut self, block: Block) -> Result<Hash, ChainError> {
        let header = &block.header;
        let tip = &self.tip_entry().block.header;
        let height = tip.height + 1;

        if header.prev_hash != self.tip_hash() {
            return Err(ChainError::UnexpectedParent {
                expected: self.tip_hash(),
                found: header.prev_hash,
            });
        }
        if header.height != height {
            return Err(ChainError::UnexpectedHeight {
                tip: tip.height,
                found: header.height,
            });
        }
        if !block.has_valid_payload() {
            return Err(ChainError::InvalidPayload);
        }
        if !header.verify_signature() {
            return Err(ChainError::InvalidForgerSignature);
        }
        if !verify_generation_signature(&header.generation_signature, &tip.generation_signature, &header.forger_public_key) {
            return Err(ChainError::InvalidGenerationSignature);
        }
        let expected = self.next_base_target();
        if header.base_target != expected {
            return Err(ChainError::UnexpectedBaseTarget {
                expected,
                found: header.base_target,
            });
        }

        // Runs before the block's own transactions reach the ledger, so the
        // forger is weighed on the committed state
        let elapsed = header.timestamp as i64 - tip.timestamp as i64;
        let accepted = self.service.check_forging_right(
            &tip.generation_signature,
            &header.forger_public_key,
            height,
            elapsed,
            header.base_target,
        )?;
        if !accepted {
            return Err(ChainError::ForgingRejected { height });
        }

        let mut coins = self.coins.clone();
        let mut spent = Vec::with_capacity(block.transactions.len());
        for tx in &block.transactions {
            if let Err(err) = self.service.update_father_and_weight_by_transaction(tx, &coins, height) {
                let kind = err.kind();
                if kind.is_fatal() {
                    error!(height, tx = %tx.hash(), error = %err, "ledger failed while connecting block");
                } else if kind.is_contract_violation() {
                    warn!(height, tx = %tx.hash(), error = %err, "block aborted: transaction contradicts the ledger");
                } else {
                    warn!(height, tx = %tx.hash(), error = %err, "transaction rejected by the ledger");
                }
                self.service.discard_pending();
                return Err(err.into());
            }
            spent.push(coins.apply_transaction(tx, height));
        }
        if let Err(err) = self.service.commit_ledger(height, false) {
            self.service.discard_pending();
            return Err(err.into());
        }

        let hash = block.hash();
        let cumulative_difficulty = self
            .service
            .next_cumulative_difficulty(self.cumulative_difficulty(), header.base_target);
        info!(height, hash = %hash, transactions = block.transactions.len(), "block connected");
        self.coins = coins;
        self.entries.push(ChainEntry {
            block,
            hash,
            cumulative_difficulty,
            spent,
        });
        Ok(hash)
    }

    /// Disconnect the tip and hand it back
    pub fn disconnect_tip(&mut self) -> Result<Block, ChainError> {
        if self.entries.len() <= 1 {
            return Err(ChainError::GenesisDisconnect);
        }
        let entry = self.tip_entry();
        let height = entry.block.height();

        let mut coins = self.coins.clone();
        let undone = entry
            .block
            .transactions
            .iter()
            .zip(&entry.spent)
            .rev()
            .try_for_each(|(tx, spent)| {
                coins.revert_transaction(tx, spent);
                self.service.undo_weight_by_transaction(tx, &coins, height)
            })
            .and_then(|()| self.service.undo_club_members(height))
            .and_then(|()| self.service.commit_ledger(height, true));
        if let Err(err) = undone {
            error!(height, error = %err, "block could not be disconnected");
            self.service.discard_pending();
            return Err(err.into());
        }

        self.coins = coins;
        let entry = self.entries.pop().ok_or(ChainError::GenesisDisconnect)?;
        info!(height, hash = %entry.hash, "block disconnected");
        Ok(entry.block)
    }

    pub fn stats(&self) -> ChainStats {
        ChainStats {
            height: self.height(),
            tip_hash: self.tip_hash(),
            base_target: self.tip().header.base_target,
            cumulative_difficulty: self.cumulative_difficulty().clone(),
            coin_count: self.coins.len(),
        }
    }
}
