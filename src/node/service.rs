//! Ledger service
//!
//! The handle the rest of the node talks to. One mutex guards the address
//! ledger (single writer); reads of heights below the committed one go
//! through the shared [`LedgerHistory`] and never take that mutex.

use num_bigint::BigUint;
use parking_lot::Mutex;
use std::sync::Arc;
use tracing::{debug, error, info};

use crate::config::NodeConfig;
use crate::consensus::{
    accumulate_cumulative_difficulty, check_forging_right, retarget_base_target, AncestorInfo, ConsensusError,
    ConsensusParams,
};
use crate::crypto::{Address, Hash, PublicKey};
use crate::instrumentation::{RewardRateRecorder, RewardRateSample};
use crate::ledger::{AddressLedger, AddressRecord, LedgerError, LedgerHistory, RewardDistribution};
use crate::roster::RosterEntry;
use crate::storage::{CoinView, KvStore, WriteBatch};
use crate::validation::Transaction;

struct Inner {
    ledger: AddressLedger,
    /// Reward splits of the block in progress, written once it commits
    pending_rates: Vec<RewardDistribution>,
}

pub struct LedgerService {
    inner: Mutex<Inner>,
    history: Arc<LedgerHistory>,
    rates: RewardRateRecorder,
    params: ConsensusParams,
}

impl LedgerService {
    /// Open the ledger kept in `store` with the settings of `config`
    pub fn open(store: Arc<dyn KvStore>, config: &NodeConfig) -> Result<Self, LedgerError> {
        let ledger = AddressLedger::open(store.clone(), config.ledger.history_memo_capacity)?;
        let rates = RewardRateRecorder::new(store, config.instrumentation.reward_rates);
        Ok(Self::new(ledger, rates, config.consensus.clone()))
    }

    pub fn new(ledger: AddressLedger, rates: RewardRateRecorder, params: ConsensusParams) -> Self {
        let history = ledger.history();
        Self {
            inner: Mutex::new(Inner {
                ledger,
                pending_rates: Vec::new(),
            }),
            history,
            rates,
            params,
        }
    }

    pub fn params(&self) -> &ConsensusParams {
        &self.params
    }

    pub fn committed_height(&self) -> Option<u64> {
        self.history.committed_height()
    }

    /// Record of `address` as seen at `height`
    pub fn get_record(&self, address: &Address, height: u64) -> Result<AddressRecord, LedgerError> {
        if self.history.is_historical(height) {
            return Ok(self.history.record_at(address, height)?);
        }
        self.inner.lock().ledger.get_record(address, height)
    }

    /// Harvest power of `address` at `height`; zero unless it is a root there
    pub fn get_harvest_power_by_address(&self, address: &Address, height: u64) -> Result<u64, LedgerError> {
        let record = self.get_record(address, height)?;
        Ok(if record.is_root() {
            record.total_harvest_power
        } else {
            0
        })
    }

    /// Current roster entry of `address`, block in progress included
    pub fn member_entry(&self, address: &Address) -> Option<RosterEntry> {
        self.inner.lock().ledger.member_entry(address).cloned()
    }

    /// Apply the ledger effects of `tx` for the block at `height`
    pub fn update_father_and_weight_by_transaction(
        &self,
        tx: &Transaction,
        coins: &dyn CoinView,
        height: u64,
    ) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        if let Some(distribution) = inner.ledger.apply_transaction(tx, coins, height)? {
            if self.rates.is_enabled() {
                inner.pending_rates.push(distribution);
            }
        }
        Ok(())
    }

    /// Reverse [`Self::update_father_and_weight_by_transaction`] for the
    /// committed tip; `coins` must again hold what `tx` spent
    pub fn undo_weight_by_transaction(
        &self,
        tx: &Transaction,
        coins: &dyn CoinView,
        height: u64,
    ) -> Result<(), LedgerError> {
        self.inner.lock().ledger.undo_transaction(tx, coins, height)
    }

    pub fn undo_club_members(&self, height: u64) -> Result<(), LedgerError> {
        self.inner.lock().ledger.undo_club_members(height)
    }

    /// Commit the block in progress at `height`, or erase `height` when
    /// `is_undo` is set. Reward-rate samples are written, or removed, in the
    /// same batch as the ledger.
    ///
    /// A storage failure here is fatal: it is logged and returned, and the
    /// caller must stop the node.
    pub fn commit_ledger(&self, height: u64, is_undo: bool) -> Result<(), LedgerError> {
        let mut inner = self.inner.lock();
        let mut samples = WriteBatch::new();
        let staged = if is_undo {
            self.rates.stage_removal(height, &mut samples)
        } else {
            self.rates.stage(height, &inner.pending_rates, &mut samples)
        };
        let staged = staged.map_err(|err| {
            error!(height, is_undo, error = %err, "reward rate samples could not be staged");
            LedgerError::from(err)
        })?;

        if let Err(err) = inner.ledger.commit_with(height, is_undo, samples) {
            if err.kind().is_fatal() {
                error!(height, is_undo, error = %err, "ledger commit failed");
            }
            return Err(err);
        }
        inner.pending_rates.clear();
        if staged > 0 {
            debug!(height, is_undo, samples = staged, "reward rate samples committed");
        }
        Ok(())
    }

    /// Whether the forger behind `forger` may produce the block at `height`
    pub fn check_forging_right(
        &self,
        previous: &Hash,
        forger: &PublicKey,
        height: u64,
        elapsed_seconds: i64,
        base_target: u64,
    ) -> Result<bool, ConsensusError> {
        check_forging_right(
            previous,
            forger,
            height,
            elapsed_seconds,
            base_target,
            &self.params,
            |address, at| self.get_harvest_power_by_address(address, at),
        )
    }

    /// Base target of the block following `ancestors[0]`
    pub fn retarget_base_target(&self, ancestors: &[AncestorInfo]) -> u64 {
        retarget_base_target(ancestors, self.params.genesis_base_target, self.params.target_spacing)
    }

    pub fn next_cumulative_difficulty(&self, previous: &BigUint, base_target: u64) -> BigUint {
        accumulate_cumulative_difficulty(previous, base_target)
    }

    /// Seed height 0 with `roots`
    pub fn seed_genesis(&self, roots: &[Address]) -> Result<(), LedgerError> {
        self.inner.lock().ledger.seed_genesis(roots)?;
        info!(roots = roots.len(), "ledger initialized");
        Ok(())
    }

    /// Drop the effects of a block that will not be committed
    pub fn discard_pending(&self) {
        let mut inner = self.inner.lock();
        inner.ledger.discard_pending();
        if !inner.pending_rates.is_empty() {
            debug!(samples = inner.pending_rates.len(), "discarding reward rate samples");
            inner.pending_rates.clear();
        }
    }

    /// Reward splits recorded at `height`
    pub fn reward_rates(&self, height: u64) -> Result<Vec<RewardRateSample>, LedgerError> {
        Ok(self.rates.samples_at(height)?)
    }
}
