//! Address ledger
//!
//! Turns block effects into record and roster mutations. Changes for the
//! block being processed accumulate in `pending` (plus the roster store's
//! staged rosters) and reach the store in a single batch on commit; the
//! `latest` cache always mirrors the committed state.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, error, info, trace, warn};

use super::journal::UndoScratch;
use super::{AddressRecord, LedgerError, LedgerHistory, LedgerOp, Link, RecordVersion};
use crate::crypto::Address;
use crate::roster::{compute_member_reward, Roster, RosterEntry, RosterStore};
use crate::storage::keys::{
    decode_value, encode_value, journal_key, ledger_height_key, record_key, record_key_address,
    roster_height_key, roster_key, roster_key_owner, roster_prefix, snapshot_key, snapshot_prefix,
    version_prefix,
};
use crate::storage::{CoinView, KvStore, StorageError, WriteBatch};
use crate::validation::Transaction;

/// How a coinbase reward was split over a club
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RewardDistribution {
    pub root: Address,
    /// Total paid out by the coinbase
    pub amount: u64,
    /// Portion proportional to the root's own weight
    pub root_share: u64,
    /// Sum credited to members below the root
    pub distributed: u64,
    /// Root's harvest power at distribution time
    pub harvest_power: u64,
}

pub struct AddressLedger {
    store: Arc<dyn KvStore>,
    history: Arc<LedgerHistory>,
    rosters: RosterStore,
    latest: HashMap<Address, RecordVersion>,
    pending: HashMap<Address, AddressRecord>,
    journal: Vec<LedgerOp>,
    pending_height: Option<u64>,
    undo: Option<UndoScratch>,
}

impl AddressLedger {
    /// Load the committed state from `store`.
    ///
    /// The ledger's height marker and the roster store's height must agree,
    /// otherwise the previous run stopped between two writes.
    pub fn open(store: Arc<dyn KvStore>, memo_capacity: usize) -> Result<Self, LedgerError> {
        let ledger_height = read_height(store.as_ref(), &ledger_height_key())?;
        let roster_height = read_height(store.as_ref(), &roster_height_key())?;
        if ledger_height != roster_height {
            error!(?ledger_height, ?roster_height, "ledger and roster heights disagree");
            return Err(LedgerError::HeightMismatch {
                ledger: ledger_height,
                roster: roster_height,
            });
        }

        let mut latest = HashMap::new();
        for item in store.scan_prefix(&snapshot_prefix()) {
            let (key, bytes) = item?;
            let address = record_key_address(&key)
                .ok_or_else(|| StorageError::Corrupted(format!("unreadable snapshot key {}", hex::encode(&key))))?;
            let version: RecordVersion = decode_value("snapshot marker", &key, &bytes)?;
            latest.insert(address, version);
        }

        let mut rosters = HashMap::new();
        for item in store.scan_prefix(&roster_prefix()) {
            let (key, bytes) = item?;
            let Some(owner) = roster_key_owner(&key) else {
                continue;
            };
            let roster: Roster = decode_value("roster", &key, &bytes)?;
            rosters.insert(owner, roster);
        }

        info!(
            height = ?ledger_height,
            addresses = latest.len(),
            rosters = rosters.len(),
            "address ledger loaded"
        );

        let history = Arc::new(LedgerHistory::new(store.clone(), ledger_height, memo_capacity));
        Ok(Self {
            store,
            history,
            rosters: RosterStore::from_snapshot(rosters, roster_height),
            latest,
            pending: HashMap::new(),
            journal: Vec::new(),
            pending_height: None,
            undo: None,
        })
    }

    pub fn committed_height(&self) -> Option<u64> {
        self.history.committed_height()
    }

    /// Shared reader for heights below the committed one
    pub fn history(&self) -> Arc<LedgerHistory> {
        self.history.clone()
    }

    pub fn rosters(&self) -> &RosterStore {
        &self.rosters
    }

    /// Record of `address` as seen at `height`.
    ///
    /// Past heights walk the persisted versions, the committed height reads
    /// the latest cache, and anything above sees the block in progress.
    pub fn get_record(&self, address: &Address, height: u64) -> Result<AddressRecord, LedgerError> {
        match self.committed_height() {
            Some(committed) if height < committed => Ok(self.history.record_at(address, height)?),
            Some(committed) if height == committed => Ok(self.latest_record(address)),
            _ => Ok(self.working(address)),
        }
    }

    /// Aggregate weight of `address` at `height`; zero unless it is a root
    pub fn get_harvest_power(&self, address: &Address, height: u64) -> Result<u64, LedgerError> {
        let record = self.get_record(address, height)?;
        Ok(if record.is_root() {
            record.total_harvest_power
        } else {
            0
        })
    }

    /// Current roster entry of `address` (including the block in progress)
    pub fn member_entry(&self, address: &Address) -> Option<&RosterEntry> {
        let record = self.working(address);
        let owner = record.roster_owner(address)?;
        self.rosters.entry(&owner, record.index).ok()
    }

    fn latest_record(&self, address: &Address) -> AddressRecord {
        self.latest
            .get(address)
            .map(|version| version.record.clone())
            .unwrap_or_default()
    }

    fn working(&self, address: &Address) -> AddressRecord {
        match self.pending.get(address) {
            Some(record) => record.clone(),
            None => self.latest_record(address),
        }
    }

    fn put_working(&mut self, address: &Address, record: AddressRecord) {
        self.pending.insert(address.clone(), record);
    }

    fn set_index(&mut self, address: &Address, index: usize) {
        let mut record = self.working(address);
        record.index = index;
        self.put_working(address, record);
    }

    fn set_miner(&mut self, address: &Address, root: &Address) {
        let mut record = self.working(address);
        record.miner = Link::To(root.clone());
        self.put_working(address, record);
    }

    fn change_power(&mut self, root: &Address, amount: u64, add: bool) -> Result<(), LedgerError> {
        let mut record = self.working(root);
        if !record.is_root() {
            return Err(LedgerError::UnknownAddress(root.clone()));
        }
        let updated = if add {
            record.total_harvest_power.checked_add(amount)
        } else {
            record.total_harvest_power.checked_sub(amount)
        };
        record.total_harvest_power = updated.ok_or_else(|| LedgerError::PowerOutOfRange(root.clone()))?;
        self.put_working(root, record);
        Ok(())
    }

    fn begin(&mut self, height: u64) -> Result<(), LedgerError> {
        let committed = self.committed_height();
        let expected = committed.map_or(0, |c| c + 1);
        if height != expected || self.undo.is_some() {
            return Err(LedgerError::UnexpectedHeight { height, committed });
        }
        self.pending_height = Some(height);
        Ok(())
    }

    fn begin_undo(&mut self, height: u64) -> Result<&mut UndoScratch, LedgerError> {
        let committed = self.committed_height();
        if committed != Some(height) || self.pending_height.is_some() {
            return Err(LedgerError::UnexpectedHeight { height, committed });
        }
        if self.undo.as_ref().map(|scratch| scratch.height) != Some(height) {
            let key = journal_key(height);
            let bytes = self
                .store
                .get(&key)?
                .ok_or_else(|| StorageError::Corrupted(format!("no journal for height {height}")))?;
            let ops: Vec<LedgerOp> = decode_value("journal", &key, &bytes)?;
            debug!(height, ops = ops.len(), "loaded journal for undo");
            self.undo = Some(UndoScratch {
                height,
                ops,
                removals: Vec::new(),
            });
        }
        self.undo
            .as_mut()
            .ok_or(LedgerError::UnexpectedHeight { height, committed })
    }

    fn pop_op(&mut self, height: u64, expected: &str) -> Result<LedgerOp, LedgerError> {
        self.begin_undo(height)?
            .ops
            .pop()
            .ok_or_else(|| LedgerError::JournalMismatch {
                height,
                expected: expected.to_string(),
                found: "end of journal".to_string(),
            })
    }

    // ----------------------------------------------------------------------
    // Delegation
    // ----------------------------------------------------------------------

    /// Move `from` (with everything below it) under `to`.
    ///
    /// `from == to` turns a delegated address back into a root. Returns
    /// whether anything changed.
    pub fn entrust(&mut self, from: &Address, to: &Address, height: u64) -> Result<bool, LedgerError> {
        self.begin(height)?;
        let op = self.apply_entrust(from, to)?;
        let changed = op != LedgerOp::Unchanged;
        self.journal.push(op);
        Ok(changed)
    }

    /// Whether `ancestor` sits on the father chain above (or at) `address`
    fn is_within(&self, address: &Address, ancestor: &Address) -> bool {
        let mut current = address.clone();
        let mut seen = HashSet::new();
        loop {
            if current == *ancestor {
                return true;
            }
            if !seen.insert(current.clone()) {
                return false;
            }
            match self.working(&current).father {
                Link::To(father) => current = father,
                _ => return false,
            }
        }
    }

    fn subtree_weight(&self, address: &Address, own: u64) -> Result<(Vec<Address>, u64), LedgerError> {
        let members = self.rosters.subtree_members(address);
        let mut weight = own;
        for (_, member_weight) in &members {
            weight = weight
                .checked_add(*member_weight)
                .ok_or_else(|| LedgerError::PowerOutOfRange(address.clone()))?;
        }
        Ok((members.into_iter().map(|(member, _)| member).collect(), weight))
    }

    fn apply_entrust(&mut self, from: &Address, to: &Address) -> Result<LedgerOp, LedgerError> {
        let from_record = self.working(from);
        let to_record = self.working(to);
        if from_record.is_blank() || to_record.is_blank() {
            return Ok(LedgerOp::Unchanged);
        }
        let undelegate = from == to;
        if undelegate && from_record.is_root() {
            return Ok(LedgerOp::Unchanged);
        }
        if !undelegate && (from_record.father.target() == Some(to) || self.is_within(to, from)) {
            trace!(from = %from, to = %to, "entrust would not change anything");
            return Ok(LedgerOp::Unchanged);
        }

        let unknown = || LedgerError::UnknownAddress(from.clone());
        let owner = from_record.roster_owner(from).ok_or_else(unknown)?;
        let old_root = from_record.effective_root(from).ok_or_else(unknown)?;
        let new_root = if undelegate {
            from.clone()
        } else {
            to_record
                .effective_root(to)
                .ok_or_else(|| LedgerError::UnknownAddress(to.clone()))?
        };

        let (entry, moved) = self.rosters.remove_member(&owner, from_record.index)?;
        if let Some(moved) = &moved {
            self.set_index(moved, from_record.index);
        }
        let (members, moved_weight) = self.subtree_weight(from, entry.weight)?;

        if old_root != *from {
            self.change_power(&old_root, moved_weight, false)?;
        }

        let mut record = if undelegate {
            self.rosters.add_member(from, entry);
            AddressRecord::root(moved_weight)
        } else {
            let index = self.rosters.add_member(to, entry);
            AddressRecord::delegated(new_root.clone(), to.clone(), index)
        };
        record.last_recorded_height = from_record.last_recorded_height;
        self.put_working(from, record);

        if !undelegate {
            self.change_power(&new_root, moved_weight, true)?;
        }
        for member in &members {
            self.set_miner(member, &new_root);
        }

        debug!(
            from = %from,
            to = %to,
            old_root = %old_root,
            new_root = %new_root,
            weight = moved_weight,
            members = members.len(),
            "entrusted"
        );
        Ok(LedgerOp::Entrusted {
            from: from.clone(),
            to: to.clone(),
            previous: from_record,
            moved,
        })
    }

    fn undo_entrust(&mut self, from: &Address, previous: AddressRecord, moved: Option<Address>) -> Result<(), LedgerError> {
        let unknown = || LedgerError::UnknownAddress(from.clone());
        let current = self.working(from);
        let owner = current.roster_owner(from).ok_or_else(unknown)?;
        let current_root = current.effective_root(from).ok_or_else(unknown)?;

        let (entry, shifted) = self.rosters.remove_member(&owner, current.index)?;
        if let Some(shifted) = &shifted {
            self.set_index(shifted, current.index);
        }
        let (members, moved_weight) = self.subtree_weight(from, entry.weight)?;
        if current_root != *from {
            self.change_power(&current_root, moved_weight, false)?;
        }

        let previous_owner = previous.roster_owner(from).ok_or_else(unknown)?;
        let previous_root = previous.effective_root(from).ok_or_else(unknown)?;
        let displaced = self.rosters.restore_member(&previous_owner, previous.index, entry)?;
        if displaced != moved {
            warn!(
                from = %from,
                ?displaced,
                ?moved,
                "restored slot displaced a different member than the forward move"
            );
        }
        if let Some(displaced) = &displaced {
            let end = self
                .rosters
                .roster(&previous_owner)
                .map(|roster| roster.len() - 1)
                .unwrap_or_default();
            self.set_index(displaced, end);
        }
        self.put_working(from, previous);

        if previous_root != *from {
            self.change_power(&previous_root, moved_weight, true)?;
        }
        for member in &members {
            self.set_miner(member, &previous_root);
        }
        debug!(from = %from, root = %previous_root, weight = moved_weight, "entrust undone");
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Activity
    // ----------------------------------------------------------------------

    /// One unit of weight for `address`.
    ///
    /// A first-time address joins `recruiter`'s roster, or becomes a root
    /// when there is no seen recruiter.
    pub fn credit_activity(
        &mut self,
        address: &Address,
        height: u64,
        recruiter: Option<&Address>,
    ) -> Result<(), LedgerError> {
        self.begin(height)?;
        let op = self.apply_credit(address, recruiter)?;
        self.journal.push(op);
        Ok(())
    }

    fn apply_credit(&mut self, address: &Address, recruiter: Option<&Address>) -> Result<LedgerOp, LedgerError> {
        let record = self.working(address);
        if !record.is_blank() {
            let unknown = || LedgerError::UnknownAddress(address.clone());
            let owner = record.roster_owner(address).ok_or_else(unknown)?;
            let root = record.effective_root(address).ok_or_else(unknown)?;
            self.rosters.adjust_weight(&owner, record.index, 1, false)?;
            self.change_power(&root, 1, true)?;
            trace!(address = %address, root = %root, "credited activity");
            return Ok(LedgerOp::Credited {
                address: address.clone(),
            });
        }

        let recruiter = recruiter
            .filter(|recruiter| *recruiter != address)
            .filter(|recruiter| !self.working(recruiter).is_blank());
        let roster = match recruiter {
            Some(recruiter) => {
                let root = self
                    .working(recruiter)
                    .effective_root(recruiter)
                    .ok_or_else(|| LedgerError::UnknownAddress(recruiter.clone()))?;
                let index = self.rosters.add_member(recruiter, RosterEntry::new(address.clone(), 1));
                self.put_working(address, AddressRecord::delegated(root.clone(), recruiter.clone(), index));
                self.change_power(&root, 1, true)?;
                recruiter.clone()
            }
            None => {
                self.rosters.add_member(address, RosterEntry::new(address.clone(), 1));
                self.put_working(address, AddressRecord::root(1));
                address.clone()
            }
        };
        debug!(address = %address, roster = %roster, "new address joined");
        Ok(LedgerOp::Joined {
            address: address.clone(),
            roster,
        })
    }

    fn undo_credit(&mut self, address: &Address, joined: bool, height: u64) -> Result<(), LedgerError> {
        let record = self.working(address);
        let unknown = || LedgerError::UnknownAddress(address.clone());
        let owner = record.roster_owner(address).ok_or_else(unknown)?;
        let root = record.effective_root(address).ok_or_else(unknown)?;
        self.rosters.adjust_weight(&owner, record.index, 1, true)?;
        self.change_power(&root, 1, false)?;
        if joined {
            self.begin_undo(height)?.removals.push(address.clone());
        }
        Ok(())
    }

    /// Second undo pass: drop the addresses whose first appearance was undone
    pub fn undo_club_members(&mut self, height: u64) -> Result<(), LedgerError> {
        let removals = std::mem::take(&mut self.begin_undo(height)?.removals);
        for address in &removals {
            let record = self.working(address);
            let owner = record
                .roster_owner(address)
                .ok_or_else(|| LedgerError::UnknownAddress(address.clone()))?;
            let (entry, moved) = self.rosters.remove_member(&owner, record.index)?;
            if entry.address != *address {
                return Err(LedgerError::JournalMismatch {
                    height,
                    expected: format!("remove {address} from {owner}"),
                    found: format!("slot {} holds {}", record.index, entry.address),
                });
            }
            if entry.weight != 0 || entry.reward != 0 {
                warn!(address = %address, weight = entry.weight, reward = entry.reward, "removed member still held value");
            }
            if let Some(moved) = &moved {
                self.set_index(moved, record.index);
            }
            self.put_working(address, AddressRecord::blank());
        }

        let remaining = self.begin_undo(height)?.ops.len();
        if remaining != 0 {
            return Err(LedgerError::JournalNotConsumed { height, remaining });
        }
        debug!(height, removed = removals.len(), "club members undone");
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Rewards
    // ----------------------------------------------------------------------

    fn apply_claim(&mut self, address: &Address, amount: u64, is_undo: bool) -> Result<(), LedgerError> {
        let record = self.working(address);
        let owner = record
            .roster_owner(address)
            .ok_or_else(|| LedgerError::UnknownAddress(address.clone()))?;
        self.rosters
            .update_reward_by_change(&owner, record.index, is_undo, amount, false)?;
        Ok(())
    }

    fn distribute(&mut self, recipient: &Address, amount: u64, is_undo: bool) -> Result<Option<RewardDistribution>, LedgerError> {
        let record = self.working(recipient);
        let Some(root) = record.effective_root(recipient) else {
            return Ok(None);
        };
        if amount == 0 {
            return Ok(None);
        }

        let harvest_power = self.working(&root).total_harvest_power;
        let root_weight = self.rosters.entry(&root, 0)?.weight;
        let root_share = compute_member_reward(root_weight, harvest_power, amount);
        let distributed = self.rosters.distribute_reward(
            &root,
            amount - root_share,
            harvest_power.saturating_sub(root_weight),
            is_undo,
        )?;
        self.rosters
            .update_reward_by_change(&root, 0, is_undo, amount - distributed, true)?;

        debug!(root = %root, amount, root_share, distributed, is_undo, "club reward distributed");
        Ok(Some(RewardDistribution {
            root,
            amount,
            root_share,
            distributed,
            harvest_power,
        }))
    }

    // ----------------------------------------------------------------------
    // Transactions
    // ----------------------------------------------------------------------

    /// Apply every ledger effect of `tx` at `height`.
    ///
    /// Returns the reward split when `tx` is a coinbase paying a known club.
    pub fn apply_transaction(
        &mut self,
        tx: &Transaction,
        coins: &dyn CoinView,
        height: u64,
    ) -> Result<Option<RewardDistribution>, LedgerError> {
        self.begin(height)?;

        if tx.is_coinbase() {
            let Some(output) = tx.outputs.first() else {
                self.journal.push(LedgerOp::Unchanged);
                return Ok(None);
            };
            let distribution = self.distribute(&output.recipient, output.amount, false)?;
            self.journal.push(match &distribution {
                Some(d) => LedgerOp::Distributed {
                    root: d.root.clone(),
                    amount: d.amount,
                    distributed: d.distributed,
                },
                None => LedgerOp::Unchanged,
            });
            return Ok(distribution);
        }

        let best_father = best_father(tx, coins)?;
        for input in &tx.inputs {
            if let Some(claim) = input.reward_claim {
                let claimant = Address::from_public_key(&input.public_key)?;
                self.apply_claim(&claimant, claim.amount, false)?;
                self.journal.push(LedgerOp::Claimed {
                    address: claimant,
                    amount: claim.amount,
                });
            }
        }

        for output in &tx.outputs {
            let op = if output.is_entrust() {
                match &best_father {
                    Some(from) => self.apply_entrust(from, &output.recipient)?,
                    None => LedgerOp::Unchanged,
                }
            } else {
                self.apply_credit(&output.recipient, best_father.as_ref())?
            };
            self.journal.push(op);
        }
        Ok(None)
    }

    /// Reverse [`AddressLedger::apply_transaction`] for the committed tip.
    ///
    /// `coins` must again hold the coins `tx` spent. Transactions are undone
    /// in reverse block order, then [`AddressLedger::undo_club_members`] runs.
    pub fn undo_transaction(&mut self, tx: &Transaction, coins: &dyn CoinView, height: u64) -> Result<(), LedgerError> {
        self.begin_undo(height)?;

        if tx.is_coinbase() {
            let op = self.pop_op(height, "coinbase distribution")?;
            return match (op, tx.outputs.first()) {
                (LedgerOp::Unchanged, _) => Ok(()),
                (LedgerOp::Distributed { root, amount, distributed }, Some(output)) if output.amount == amount => {
                    let undone = self.distribute(&output.recipient, amount, true)?;
                    match undone {
                        Some(d) if d.root == root && d.distributed == distributed => Ok(()),
                        other => Err(LedgerError::JournalMismatch {
                            height,
                            expected: format!("distribute {amount} over {root}"),
                            found: format!("{other:?}"),
                        }),
                    }
                }
                (op, _) => Err(LedgerError::JournalMismatch {
                    height,
                    expected: "coinbase distribution".to_string(),
                    found: op.to_string(),
                }),
            };
        }

        let best_father = best_father(tx, coins)?;
        for output in tx.outputs.iter().rev() {
            let recipient = &output.recipient;
            if output.is_entrust() {
                let op = self.pop_op(height, "entrust")?;
                match (op, &best_father) {
                    (LedgerOp::Unchanged, _) => {}
                    (LedgerOp::Entrusted { from, to, previous, moved }, Some(father))
                        if from == *father && to == *recipient =>
                    {
                        self.undo_entrust(&from, previous, moved)?;
                    }
                    (op, _) => {
                        return Err(LedgerError::JournalMismatch {
                            height,
                            expected: format!("entrust to {recipient}"),
                            found: op.to_string(),
                        })
                    }
                }
            } else {
                let op = self.pop_op(height, "activity")?;
                match op {
                    LedgerOp::Credited { address } if address == *recipient => {
                        self.undo_credit(recipient, false, height)?
                    }
                    LedgerOp::Joined { address, .. } if address == *recipient => {
                        self.undo_credit(recipient, true, height)?
                    }
                    op => {
                        return Err(LedgerError::JournalMismatch {
                            height,
                            expected: format!("credit {recipient}"),
                            found: op.to_string(),
                        })
                    }
                }
            }
        }

        for input in tx.inputs.iter().rev() {
            let Some(claim) = input.reward_claim else {
                continue;
            };
            let claimant = Address::from_public_key(&input.public_key)?;
            match self.pop_op(height, "reward claim")? {
                LedgerOp::Claimed { address, amount } if address == claimant && amount == claim.amount => {
                    self.apply_claim(&claimant, amount, true)?;
                }
                op => {
                    return Err(LedgerError::JournalMismatch {
                        height,
                        expected: format!("claim {} by {claimant}", claim.amount),
                        found: op.to_string(),
                    })
                }
            }
        }
        Ok(())
    }

    // ----------------------------------------------------------------------
    // Commit
    // ----------------------------------------------------------------------

    /// Persist the block in progress at `height`, or with `is_undo` erase
    /// `height` and fall back to the previous versions.
    ///
    /// On failure nothing in memory changes; the caller must treat the
    /// pending state as lost and stop.
    pub fn commit(&mut self, height: u64, is_undo: bool) -> Result<(), LedgerError> {
        self.commit_with(height, is_undo, WriteBatch::new())
    }

    /// [`Self::commit`], writing `extra` in the same atomic batch
    pub fn commit_with(&mut self, height: u64, is_undo: bool, extra: WriteBatch) -> Result<(), LedgerError> {
        if is_undo {
            self.commit_undo(height, extra)
        } else {
            self.commit_forward(height, extra)
        }
    }

    fn stage_rosters(&self, batch: &mut WriteBatch) -> Result<(), LedgerError> {
        for (owner, roster) in self.rosters.staged() {
            match roster {
                Some(roster) => batch.put(roster_key(owner), encode_value("roster", roster)?),
                None => batch.delete(roster_key(owner)),
            }
        }
        Ok(())
    }

    fn write(&self, batch: WriteBatch, height: u64, is_undo: bool) -> Result<(), LedgerError> {
        let ops = batch.len();
        self.store.write_batch(batch).map_err(|e| {
            error!(height, is_undo, ops, error = %e, "ledger commit failed");
            LedgerError::from(e)
        })
    }

    fn commit_forward(&mut self, height: u64, extra: WriteBatch) -> Result<(), LedgerError> {
        let committed = self.committed_height();
        if height != committed.map_or(0, |c| c + 1) || self.undo.is_some() {
            return Err(LedgerError::UnexpectedHeight { height, committed });
        }

        let mut touched: Vec<&Address> = self.pending.keys().collect();
        touched.sort();

        let mut batch = WriteBatch::new();
        let mut versions = Vec::with_capacity(touched.len());
        for address in touched {
            let record = &self.pending[address];
            let previous = self.latest.get(address).map(|version| version.height);
            if record.is_blank() && previous.is_none() {
                continue;
            }
            let mut stored = record.clone();
            stored.last_recorded_height = previous;
            batch.put(record_key(height as i64, address), encode_value("address record", &stored)?);
            let version = RecordVersion {
                height,
                record: stored,
            };
            batch.put(snapshot_key(address), encode_value("snapshot marker", &version)?);
            versions.push((address.clone(), version));
        }
        self.stage_rosters(&mut batch)?;
        batch.put(journal_key(height), encode_value("journal", &self.journal)?);
        batch.put(ledger_height_key(), encode_value("ledger height", &height)?);
        batch.put(roster_height_key(), encode_value("roster height", &height)?);
        batch.extend(extra);

        self.write(batch, height, false)?;

        let changed = versions.len();
        let ops = self.journal.len();
        for (address, version) in versions {
            self.latest.insert(address, version);
        }
        self.history.invalidate(self.pending.keys());
        self.pending.clear();
        self.journal.clear();
        self.pending_height = None;
        self.rosters.apply_staged(Some(height));
        self.history.set_committed_height(Some(height));

        info!(height, records = changed, ops, "ledger committed");
        Ok(())
    }

    fn commit_undo(&mut self, height: u64, extra: WriteBatch) -> Result<(), LedgerError> {
        let scratch = self.begin_undo(height)?;
        if !scratch.ops.is_empty() || !scratch.removals.is_empty() {
            return Err(LedgerError::JournalNotConsumed {
                height,
                remaining: scratch.ops.len() + scratch.removals.len(),
            });
        }

        let versioned: Vec<(Vec<u8>, Vec<u8>)> = self
            .store
            .scan_prefix(&version_prefix(height))
            .collect::<Result<_, _>>()?;

        let mut batch = WriteBatch::new();
        let mut reinstated = Vec::with_capacity(versioned.len());
        for (key, bytes) in versioned {
            let address = record_key_address(&key)
                .ok_or_else(|| StorageError::Corrupted(format!("unreadable record key {}", hex::encode(&key))))?;
            let stored: AddressRecord = decode_value("address record", &key, &bytes)?;
            let previous = match stored.last_recorded_height {
                Some(previous_height) => {
                    let previous_key = record_key(previous_height as i64, &address);
                    let previous_bytes = self.store.get(&previous_key)?.ok_or_else(|| {
                        StorageError::Corrupted(format!(
                            "version {previous_height} of {address} linked from {height} is missing"
                        ))
                    })?;
                    Some(RecordVersion {
                        height: previous_height,
                        record: decode_value("address record", &previous_key, &previous_bytes)?,
                    })
                }
                None => None,
            };

            let working = self.working(&address);
            let expected = previous
                .as_ref()
                .map(|version| version.record.clone())
                .unwrap_or_default();
            if !working.same_state(&expected) {
                warn!(
                    address = %address,
                    height,
                    working = ?working,
                    reinstated = ?expected,
                    "undo left a record that differs from its previous version"
                );
            }

            batch.delete(key);
            match &previous {
                Some(version) => batch.put(snapshot_key(&address), encode_value("snapshot marker", version)?),
                None => batch.delete(snapshot_key(&address)),
            }
            reinstated.push((address, previous));
        }

        let reinstated_addresses: HashSet<&Address> = reinstated.iter().map(|(address, _)| address).collect();
        for address in self.pending.keys() {
            if !reinstated_addresses.contains(address) {
                warn!(address = %address, height, "undo touched an address with no version at this height");
            }
        }

        self.stage_rosters(&mut batch)?;
        batch.delete(journal_key(height));
        let new_height = height.checked_sub(1);
        match new_height {
            Some(new_height) => {
                batch.put(ledger_height_key(), encode_value("ledger height", &new_height)?);
                batch.put(roster_height_key(), encode_value("roster height", &new_height)?);
            }
            None => {
                batch.delete(ledger_height_key());
                batch.delete(roster_height_key());
            }
        }
        batch.extend(extra);

        self.write(batch, height, true)?;

        for (address, previous) in &reinstated {
            match previous {
                Some(version) => {
                    self.latest.insert(address.clone(), version.clone());
                }
                None => {
                    self.latest.remove(address);
                }
            }
        }
        self.history
            .invalidate(reinstated.iter().map(|(address, _)| address).chain(self.pending.keys()));
        self.pending.clear();
        self.undo = None;
        self.rosters.apply_staged(new_height);
        self.history.set_committed_height(new_height);

        info!(height, records = reinstated.len(), "ledger height undone");
        Ok(())
    }

    /// Commit height 0 with every address in `roots` as a root of weight 1
    pub fn seed_genesis(&mut self, roots: &[Address]) -> Result<(), LedgerError> {
        if self.committed_height().is_some() || !self.pending.is_empty() {
            return Err(LedgerError::AlreadySeeded);
        }
        self.begin(0)?;
        for root in roots {
            if self.working(root).is_blank() {
                let op = self.apply_credit(root, None)?;
                self.journal.push(op);
            }
        }
        self.commit(0, false)?;
        info!(roots = roots.len(), "genesis roots seeded");
        Ok(())
    }

    /// Drop everything done since the last commit
    pub fn discard_pending(&mut self) {
        if !self.pending.is_empty() || self.undo.is_some() {
            debug!(records = self.pending.len(), "discarding uncommitted ledger changes");
        }
        self.pending.clear();
        self.journal.clear();
        self.pending_height = None;
        self.undo = None;
        self.rosters.discard_staged();
    }
}

fn read_height(store: &dyn KvStore, key: &[u8]) -> Result<Option<u64>, StorageError> {
    store
        .get(key)?
        .map(|bytes| decode_value("height marker", key, &bytes))
        .transpose()
}

/// Address of the highest-value coin `tx` spends; the first one wins ties
pub fn best_father(tx: &Transaction, coins: &dyn CoinView) -> Result<Option<Address>, LedgerError> {
    let mut best: Option<(u64, Address)> = None;
    for input in tx.coin_inputs() {
        let outpoint = input.outpoint();
        let coin = coins.coin(&outpoint).ok_or(LedgerError::MissingCoin(outpoint))?;
        if best.as_ref().map_or(true, |(amount, _)| coin.amount > *amount) {
            best = Some((coin.amount, coin.address));
        }
    }
    Ok(best.map(|(_, address)| address))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash_bytes, PrivateKey};
    use crate::error::ErrorKind;
    use crate::storage::{Coin, MemoryStore, UtxoSet};
    use crate::validation::{OutPoint, TxInput, TxOutput};

    fn addr(s: &str) -> Address {
        Address::from(s)
    }

    fn seeded(roots: &[&str]) -> (Arc<MemoryStore>, AddressLedger) {
        let store = Arc::new(MemoryStore::new());
        let mut ledger = AddressLedger::open(store.clone(), 64).unwrap();
        let roots: Vec<Address> = roots.iter().map(|r| addr(r)).collect();
        ledger.seed_genesis(&roots).unwrap();
        (store, ledger)
    }

    /// A coin owned by `owner` plus a transaction spending it into `outputs`
    fn spend_from(coins: &mut UtxoSet, owner: &str, tag: &str, outputs: Vec<TxOutput>) -> Transaction {
        let outpoint = OutPoint { tx_hash: hash_bytes(tag.as_bytes()), index: 0 };
        coins.add(outpoint, Coin { amount: 50, address: addr(owner), height: 0 });
        Transaction::new(vec![TxInput::spend(outpoint.tx_hash, 0)], outputs)
    }

    fn weight(ledger: &AddressLedger, address: &str) -> u64 {
        ledger.member_entry(&addr(address)).map(|e| e.weight).unwrap_or_default()
    }

    fn power(ledger: &AddressLedger, address: &str) -> u64 {
        let height = ledger.committed_height().unwrap();
        ledger.get_harvest_power(&addr(address), height + 1).unwrap()
    }

    #[test]
    fn test_seed_genesis_creates_roots() {
        let (_, ledger) = seeded(&["A", "B"]);
        assert_eq!(ledger.committed_height(), Some(0));
        for root in ["A", "B"] {
            let record = ledger.get_record(&addr(root), 0).unwrap();
            assert!(record.is_root());
            assert_eq!(record.total_harvest_power, 1);
            assert_eq!(weight(&ledger, root), 1);
        }
        assert!(ledger.get_record(&addr("C"), 0).unwrap().is_blank());
    }

    #[test]
    fn test_seed_genesis_twice_is_rejected() {
        let (_, mut ledger) = seeded(&["A"]);
        let err = ledger.seed_genesis(&[addr("B")]).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_entrust_scenario_and_undo() {
        let (_, mut ledger) = seeded(&["A", "B"]);
        let mut coins = UtxoSet::new();

        // Block 1: A receives a value-bearing output
        let tx1 = spend_from(&mut coins, "A", "c1", vec![TxOutput::new(10, "A")]);
        ledger.apply_transaction(&tx1, &coins, 1).unwrap();
        ledger.commit(1, false).unwrap();
        assert_eq!(weight(&ledger, "A"), 2);
        assert_eq!(ledger.get_harvest_power(&addr("A"), 1).unwrap(), 2);

        // Block 2: A entrusts to B
        let tx2 = spend_from(&mut coins, "A", "c2", vec![TxOutput::new(0, "B")]);
        ledger.apply_transaction(&tx2, &coins, 2).unwrap();
        ledger.commit(2, false).unwrap();
        let a = ledger.get_record(&addr("A"), 2).unwrap();
        assert_eq!(a.father, Link::To(addr("B")));
        assert_eq!(a.miner, Link::To(addr("B")));
        assert_eq!(ledger.get_harvest_power(&addr("B"), 2).unwrap(), 3);
        assert_eq!(ledger.get_harvest_power(&addr("A"), 2).unwrap(), 0);

        // History still answers for block 1
        assert_eq!(ledger.get_harvest_power(&addr("A"), 1).unwrap(), 2);
        assert_eq!(ledger.get_harvest_power(&addr("B"), 1).unwrap(), 1);

        // Undo block 2
        ledger.undo_transaction(&tx2, &coins, 2).unwrap();
        ledger.undo_club_members(2).unwrap();
        ledger.commit(2, true).unwrap();
        assert_eq!(ledger.committed_height(), Some(1));
        assert!(ledger.get_record(&addr("A"), 1).unwrap().is_root());
        assert_eq!(ledger.get_harvest_power(&addr("A"), 1).unwrap(), 2);
        assert_eq!(ledger.get_harvest_power(&addr("B"), 1).unwrap(), 1);
        assert_eq!(weight(&ledger, "A"), 2);
    }

    #[test]
    fn test_entrust_no_op_cases() {
        let (_, mut ledger) = seeded(&["A", "B"]);
        // Unseen target or source
        assert!(!ledger.entrust(&addr("A"), &addr("ghost"), 1).unwrap());
        assert!(!ledger.entrust(&addr("ghost"), &addr("A"), 1).unwrap());
        // Root entrusting itself
        assert!(!ledger.entrust(&addr("A"), &addr("A"), 1).unwrap());

        assert!(ledger.entrust(&addr("A"), &addr("B"), 1).unwrap());
        // Already in B's roster
        assert!(!ledger.entrust(&addr("A"), &addr("B"), 1).unwrap());
        // B into its own subtree would make a cycle
        assert!(!ledger.entrust(&addr("B"), &addr("A"), 1).unwrap());
        assert_eq!(power(&ledger, "B"), 2);
    }

    #[test]
    fn test_undelegate_makes_new_root() {
        let (_, mut ledger) = seeded(&["A", "B"]);
        ledger.entrust(&addr("A"), &addr("B"), 1).unwrap();
        ledger.credit_activity(&addr("C"), 1, Some(&addr("A"))).unwrap();
        assert_eq!(power(&ledger, "B"), 3);
        assert_eq!(ledger.get_record(&addr("C"), 1).unwrap().miner, Link::To(addr("B")));

        assert!(ledger.entrust(&addr("A"), &addr("A"), 1).unwrap());
        let a = ledger.get_record(&addr("A"), 1).unwrap();
        assert!(a.is_root());
        assert_eq!(a.total_harvest_power, 2);
        assert_eq!(power(&ledger, "B"), 1);
        assert_eq!(ledger.get_record(&addr("C"), 1).unwrap().miner, Link::To(addr("A")));
    }

    #[test]
    fn test_credit_new_address_without_recruiter_is_root() {
        let (_, mut ledger) = seeded(&["A"]);
        ledger.credit_activity(&addr("N"), 1, Some(&addr("ghost"))).unwrap();
        let n = ledger.get_record(&addr("N"), 1).unwrap();
        assert!(n.is_root());
        assert_eq!(n.total_harvest_power, 1);
    }

    #[test]
    fn test_reads_at_committed_height_ignore_pending() {
        let (_, mut ledger) = seeded(&["A"]);
        ledger.credit_activity(&addr("A"), 1, None).unwrap();
        assert_eq!(ledger.get_harvest_power(&addr("A"), 0).unwrap(), 1);
        assert_eq!(ledger.get_harvest_power(&addr("A"), 1).unwrap(), 2);
        ledger.discard_pending();
        assert_eq!(ledger.get_harvest_power(&addr("A"), 1).unwrap(), 1);
    }

    #[test]
    fn test_wrong_height_is_rejected() {
        let (_, mut ledger) = seeded(&["A"]);
        let err = ledger.credit_activity(&addr("A"), 5, None).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
        let err = ledger.undo_club_members(3).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    #[test]
    fn test_undo_removes_new_members() {
        let (_, mut ledger) = seeded(&["A"]);
        let mut coins = UtxoSet::new();
        let tx = spend_from(&mut coins, "A", "c1", vec![TxOutput::new(5, "M1"), TxOutput::new(5, "M2")]);
        ledger.apply_transaction(&tx, &coins, 1).unwrap();
        ledger.commit(1, false).unwrap();
        assert_eq!(ledger.get_harvest_power(&addr("A"), 1).unwrap(), 3);
        assert_eq!(ledger.rosters().roster(&addr("A")).unwrap().len(), 3);

        ledger.undo_transaction(&tx, &coins, 1).unwrap();
        ledger.undo_club_members(1).unwrap();
        ledger.commit(1, true).unwrap();
        assert!(ledger.get_record(&addr("M1"), 0).unwrap().is_blank());
        assert!(ledger.get_record(&addr("M2"), 0).unwrap().is_blank());
        assert_eq!(ledger.rosters().roster(&addr("A")).unwrap().len(), 1);
        assert_eq!(ledger.get_harvest_power(&addr("A"), 0).unwrap(), 1);
    }

    #[test]
    fn test_undo_with_mismatched_transaction_fails() {
        let (_, mut ledger) = seeded(&["A"]);
        let mut coins = UtxoSet::new();
        let tx = spend_from(&mut coins, "A", "c1", vec![TxOutput::new(5, "M1")]);
        ledger.apply_transaction(&tx, &coins, 1).unwrap();
        ledger.commit(1, false).unwrap();

        let other = spend_from(&mut coins, "A", "c2", vec![TxOutput::new(5, "M9")]);
        let err = ledger.undo_transaction(&other, &coins, 1).unwrap_err();
        assert!(matches!(err, LedgerError::JournalMismatch { .. }));
        ledger.discard_pending();
    }

    #[test]
    fn test_missing_coin_is_reported() {
        let (_, mut ledger) = seeded(&["A"]);
        let tx = Transaction::new(
            vec![TxInput::spend(hash_bytes(b"unknown"), 0)],
            vec![TxOutput::new(5, "A")],
        );
        let err = ledger.apply_transaction(&tx, &UtxoSet::new(), 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::RecordNotFound);
    }

    #[test]
    fn test_coinbase_distribution_conserves_reward() {
        let (_, mut ledger) = seeded(&["A"]);
        let mut coins = UtxoSet::new();
        let tx = spend_from(
            &mut coins,
            "A",
            "c1",
            vec![TxOutput::new(5, "M1"), TxOutput::new(5, "M2"), TxOutput::new(5, "M1")],
        );
        ledger.apply_transaction(&tx, &coins, 1).unwrap();
        ledger.commit(1, false).unwrap();

        let reward = 1_000_000_007;
        let coinbase = Transaction::coinbase(reward, "M2", 2);
        let split = ledger.apply_transaction(&coinbase, &coins, 2).unwrap().unwrap();
        assert_eq!(split.root, addr("A"));
        assert_eq!(split.harvest_power, 4);

        let total: u64 = ["A", "M1", "M2"]
            .iter()
            .map(|a| ledger.member_entry(&addr(a)).unwrap().reward)
            .sum();
        assert_eq!(total, reward);
        ledger.commit(2, false).unwrap();

        ledger.undo_transaction(&coinbase, &coins, 2).unwrap();
        ledger.undo_club_members(2).unwrap();
        for a in ["A", "M1", "M2"] {
            assert_eq!(ledger.member_entry(&addr(a)).unwrap().reward, 0);
        }
        ledger.commit(2, true).unwrap();
    }

    #[test]
    fn test_reward_claim_debits_and_undoes() {
        let key = PrivateKey::generate();
        let owner = Address::from_public_key(&key.public_key()).unwrap();
        let store = Arc::new(MemoryStore::new());
        let mut ledger = AddressLedger::open(store, 16).unwrap();
        ledger.seed_genesis(&[owner.clone()]).unwrap();

        let coins = UtxoSet::new();
        let coinbase = Transaction::coinbase(1_000, owner.clone(), 1);
        ledger.apply_transaction(&coinbase, &coins, 1).unwrap();
        ledger.commit(1, false).unwrap();
        assert_eq!(ledger.member_entry(&owner).unwrap().reward, 1_000);

        let claim = Transaction::new(vec![TxInput::claim(key.public_key(), 400)], vec![]);
        ledger.apply_transaction(&claim, &coins, 2).unwrap();
        assert_eq!(ledger.member_entry(&owner).unwrap().reward, 600);
        ledger.commit(2, false).unwrap();

        ledger.undo_transaction(&claim, &coins, 2).unwrap();
        ledger.undo_club_members(2).unwrap();
        ledger.commit(2, true).unwrap();
        assert_eq!(ledger.member_entry(&owner).unwrap().reward, 1_000);

        let greedy = Transaction::new(vec![TxInput::claim(key.public_key(), 5_000)], vec![]);
        let err = ledger.apply_transaction(&greedy, &coins, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArithmeticOverflow);
    }

    #[test]
    fn test_failed_commit_keeps_committed_state() {
        let (store, mut ledger) = seeded(&["A"]);
        ledger.credit_activity(&addr("A"), 1, None).unwrap();
        store.set_fail_writes(true);
        let err = ledger.commit(1, false).unwrap_err();
        assert!(err.kind().is_fatal());
        assert_eq!(ledger.committed_height(), Some(0));
        assert_eq!(ledger.get_harvest_power(&addr("A"), 0).unwrap(), 1);
    }

    #[test]
    fn test_extra_writes_share_the_commit_batch() {
        let (store, mut ledger) = seeded(&["A"]);
        let mut extra = WriteBatch::new();
        extra.put(b"side".to_vec(), b"one".to_vec());
        store.set_fail_writes(true);
        ledger.commit_with(1, false, extra.clone()).unwrap_err();
        store.set_fail_writes(false);
        assert_eq!(store.get(b"side").unwrap(), None);

        ledger.commit_with(1, false, extra).unwrap();
        assert_eq!(store.get(b"side").unwrap(), Some(b"one".to_vec()));

        let mut extra = WriteBatch::new();
        extra.delete(b"side".to_vec());
        ledger.undo_club_members(1).unwrap();
        ledger.commit_with(1, true, extra).unwrap();
        assert_eq!(store.get(b"side").unwrap(), None);
        assert_eq!(ledger.committed_height(), Some(0));
    }

    #[test]
    fn test_reopen_restores_state() {
        let (store, mut ledger) = seeded(&["A", "B"]);
        ledger.entrust(&addr("A"), &addr("B"), 1).unwrap();
        ledger.commit(1, false).unwrap();
        drop(ledger);

        let reopened = AddressLedger::open(store, 16).unwrap();
        assert_eq!(reopened.committed_height(), Some(1));
        assert_eq!(reopened.get_harvest_power(&addr("B"), 1).unwrap(), 2);
        assert_eq!(reopened.get_harvest_power(&addr("A"), 0).unwrap(), 1);
    }

    #[test]
    fn test_open_rejects_height_mismatch() {
        let (store, ledger) = seeded(&["A"]);
        drop(ledger);
        store
            .put(roster_height_key(), encode_value("roster height", &7u64).unwrap())
            .unwrap();
        let err = AddressLedger::open(store, 16).err().unwrap();
        assert!(matches!(err, LedgerError::HeightMismatch { .. }));
        assert!(err.kind().is_fatal());
    }

    #[test]
    fn test_best_father_prefers_largest_coin() {
        let mut coins = UtxoSet::new();
        let small = OutPoint { tx_hash: hash_bytes(b"s"), index: 0 };
        let large = OutPoint { tx_hash: hash_bytes(b"l"), index: 0 };
        let tie = OutPoint { tx_hash: hash_bytes(b"t"), index: 0 };
        coins.add(small, Coin { amount: 1, address: addr("small"), height: 0 });
        coins.add(large, Coin { amount: 9, address: addr("large"), height: 0 });
        coins.add(tie, Coin { amount: 9, address: addr("tie"), height: 0 });
        let tx = Transaction::new(
            vec![
                TxInput::spend(small.tx_hash, 0),
                TxInput::spend(large.tx_hash, 0),
                TxInput::spend(tie.tx_hash, 0),
            ],
            vec![],
        );
        assert_eq!(best_father(&tx, &coins).unwrap(), Some(addr("large")));
    }
}
