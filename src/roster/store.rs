//! Roster store
//!
//! Holds one [`Roster`] per owner. Rosters touched while a block is being
//! processed are staged copy-on-write; the committed set only changes once
//! the ledger's batch has reached disk.

use std::collections::{HashMap, HashSet};
use thiserror::Error;
use tracing::trace;

use super::{compute_member_reward, Roster, RosterEntry};
use crate::crypto::Address;
use crate::error::ErrorKind;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RosterError {
    #[error("no roster for {0}")]
    UnknownRoster(Address),
    #[error("roster of {owner} has no member at slot {index}")]
    UnknownSlot { owner: Address, index: usize },
    #[error("weight of slot {index} in roster of {owner} would go out of range")]
    WeightOutOfRange { owner: Address, index: usize },
    #[error("reward of slot {index} in roster of {owner} would go out of range")]
    RewardOutOfRange { owner: Address, index: usize },
}

impl RosterError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            RosterError::UnknownRoster(_) | RosterError::UnknownSlot { .. } => ErrorKind::RecordNotFound,
            RosterError::WeightOutOfRange { .. } | RosterError::RewardOutOfRange { .. } => {
                ErrorKind::ArithmeticOverflow
            }
        }
    }
}

/// Per-owner rosters with staged (uncommitted) changes
#[derive(Debug, Default, Clone)]
pub struct RosterStore {
    committed: HashMap<Address, Roster>,
    /// `None` marks a roster dropped by the block in progress
    staged: HashMap<Address, Option<Roster>>,
    committed_height: Option<u64>,
}

impl RosterStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Rebuild from a persisted snapshot
    pub fn from_snapshot(rosters: HashMap<Address, Roster>, committed_height: Option<u64>) -> Self {
        Self {
            committed: rosters,
            staged: HashMap::new(),
            committed_height,
        }
    }

    pub fn committed_height(&self) -> Option<u64> {
        self.committed_height
    }

    pub fn roster(&self, owner: &Address) -> Option<&Roster> {
        match self.staged.get(owner) {
            Some(staged) => staged.as_ref(),
            None => self.committed.get(owner),
        }
    }

    fn roster_mut(&mut self, owner: &Address) -> Result<&mut Roster, RosterError> {
        if !self.staged.contains_key(owner) {
            let copy = self
                .committed
                .get(owner)
                .cloned()
                .ok_or_else(|| RosterError::UnknownRoster(owner.clone()))?;
            self.staged.insert(owner.clone(), Some(copy));
        }
        self.staged
            .get_mut(owner)
            .and_then(Option::as_mut)
            .ok_or_else(|| RosterError::UnknownRoster(owner.clone()))
    }

    fn roster_mut_or_create(&mut self, owner: &Address) -> &mut Roster {
        if !self.staged.contains_key(owner) {
            let copy = self.committed.get(owner).cloned();
            self.staged.insert(owner.clone(), copy);
        }
        self.staged
            .entry(owner.clone())
            .or_insert(None)
            .get_or_insert_with(Roster::new)
    }

    fn drop_if_vacant(&mut self, owner: &Address) {
        let vacant = self.roster(owner).map(Roster::is_vacant).unwrap_or(false);
        if vacant {
            trace!(owner = %owner, "dropping vacant roster");
            self.staged.insert(owner.clone(), None);
        }
    }

    pub fn entry(&self, owner: &Address, index: usize) -> Result<&RosterEntry, RosterError> {
        self.roster(owner)
            .ok_or_else(|| RosterError::UnknownRoster(owner.clone()))?
            .get(index)
            .ok_or_else(|| RosterError::UnknownSlot {
                owner: owner.clone(),
                index,
            })
    }

    fn entry_mut(&mut self, owner: &Address, index: usize) -> Result<&mut RosterEntry, RosterError> {
        self.roster_mut(owner)?
            .get_mut(index)
            .ok_or_else(|| RosterError::UnknownSlot {
                owner: owner.clone(),
                index,
            })
    }

    /// Add `entry` to `owner`'s roster.
    ///
    /// The owner's own entry always lands in slot 0; anybody else is
    /// appended and gets the new last index.
    pub fn add_member(&mut self, owner: &Address, entry: RosterEntry) -> usize {
        let is_owner = entry.address == *owner;
        let roster = self.roster_mut_or_create(owner);
        if is_owner {
            roster.set_owner(entry);
            0
        } else {
            roster.push(entry)
        }
    }

    /// Remove the entry at `index`.
    ///
    /// Member slots use swap-with-last; the returned address (if any) moved
    /// into `index` and must have its record updated. Slot 0 is only ever
    /// vacated, never refilled by a member. A roster left vacant is dropped.
    pub fn remove_member(
        &mut self,
        owner: &Address,
        index: usize,
    ) -> Result<(RosterEntry, Option<Address>), RosterError> {
        let roster = self.roster_mut(owner)?;
        let unknown = || RosterError::UnknownSlot {
            owner: owner.clone(),
            index,
        };
        let result = if index == 0 {
            (roster.take_owner().ok_or_else(unknown)?, None)
        } else {
            roster.swap_remove(index).ok_or_else(unknown)?
        };
        self.drop_if_vacant(owner);
        Ok(result)
    }

    /// Put `entry` back at `index`, undoing a [`RosterStore::remove_member`].
    ///
    /// Returns the address displaced to the end of the roster.
    pub fn restore_member(
        &mut self,
        owner: &Address,
        index: usize,
        entry: RosterEntry,
    ) -> Result<Option<Address>, RosterError> {
        let roster = self.roster_mut_or_create(owner);
        if index == 0 {
            roster.set_owner(entry);
            return Ok(None);
        }
        roster.restore(index, entry).ok_or_else(|| RosterError::UnknownSlot {
            owner: owner.clone(),
            index,
        })
    }

    /// Apply a signed weight delta; `is_undo` flips its sign
    pub fn adjust_weight(
        &mut self,
        owner: &Address,
        index: usize,
        delta: i64,
        is_undo: bool,
    ) -> Result<u64, RosterError> {
        let is_add = (delta >= 0) != is_undo;
        self.update_weight_by_change(owner, index, false, delta.unsigned_abs(), is_add)
    }

    /// Add or subtract `amount` from a member's weight; `is_undo` inverts
    /// the direction. Results below zero are errors, never clamped.
    pub fn update_weight_by_change(
        &mut self,
        owner: &Address,
        index: usize,
        is_undo: bool,
        amount: u64,
        is_add: bool,
    ) -> Result<u64, RosterError> {
        let entry = self.entry_mut(owner, index)?;
        let updated = if is_add != is_undo {
            entry.weight.checked_add(amount)
        } else {
            entry.weight.checked_sub(amount)
        };
        entry.weight = updated.ok_or_else(|| RosterError::WeightOutOfRange {
            owner: owner.clone(),
            index,
        })?;
        Ok(entry.weight)
    }

    /// Reward counterpart of [`RosterStore::update_weight_by_change`]; reward
    /// claims debit through it
    pub fn update_reward_by_change(
        &mut self,
        owner: &Address,
        index: usize,
        is_undo: bool,
        amount: u64,
        is_add: bool,
    ) -> Result<u64, RosterError> {
        let entry = self.entry_mut(owner, index)?;
        let updated = if is_add != is_undo {
            entry.reward.checked_add(amount)
        } else {
            entry.reward.checked_sub(amount)
        };
        entry.reward = updated.ok_or_else(|| RosterError::RewardOutOfRange {
            owner: owner.clone(),
            index,
        })?;
        Ok(entry.reward)
    }

    /// Every address below `owner` (members of its roster, their rosters,
    /// and so on) with its weight. The owner itself is not included.
    pub fn subtree_members(&self, owner: &Address) -> Vec<(Address, u64)> {
        let mut found = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = vec![owner.clone()];
        while let Some(current) = stack.pop() {
            if !visited.insert(current.clone()) {
                continue;
            }
            if let Some(roster) = self.roster(&current) {
                for (_, entry) in roster.members() {
                    found.push((entry.address.clone(), entry.weight));
                    stack.push(entry.address.clone());
                }
            }
        }
        found
    }

    /// Credit (or on undo, debit) every member below `root` with its share
    /// of `total_reward`, weighted against `total_weight_excluding_root`.
    ///
    /// Each share is capped by what is still undistributed, so the returned
    /// sum never exceeds `total_reward`. The caller books
    /// `total_reward - distributed` on the root's own slot.
    pub fn distribute_reward(
        &mut self,
        root: &Address,
        total_reward: u64,
        total_weight_excluding_root: u64,
        is_undo: bool,
    ) -> Result<u64, RosterError> {
        if total_reward == 0 || total_weight_excluding_root == 0 {
            return Ok(0);
        }

        let mut distributed = 0u64;
        let mut visited = HashSet::new();
        let mut stack = vec![root.clone()];
        while let Some(owner) = stack.pop() {
            if !visited.insert(owner.clone()) {
                continue;
            }
            let members: Vec<(usize, Address, u64)> = match self.roster(&owner) {
                Some(roster) => roster
                    .members()
                    .map(|(index, entry)| (index, entry.address.clone(), entry.weight))
                    .collect(),
                None => continue,
            };
            for (index, address, weight) in members {
                let remaining = total_reward - distributed;
                let share = compute_member_reward(weight, total_weight_excluding_root, total_reward)
                    .min(remaining);
                if share > 0 {
                    self.update_reward_by_change(&owner, index, is_undo, share, true)?;
                    distributed += share;
                }
                if self.roster(&address).is_some() {
                    stack.push(address);
                }
            }
        }
        Ok(distributed)
    }

    /// Rosters changed by the block in progress (`None` = dropped)
    pub fn staged(&self) -> impl Iterator<Item = (&Address, Option<&Roster>)> {
        self.staged.iter().map(|(owner, roster)| (owner, roster.as_ref()))
    }

    pub fn has_staged(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Fold staged rosters into the committed set after they were persisted
    pub fn apply_staged(&mut self, height: Option<u64>) {
        for (owner, roster) in self.staged.drain() {
            match roster {
                Some(roster) => {
                    self.committed.insert(owner, roster);
                }
                None => {
                    self.committed.remove(&owner);
                }
            }
        }
        self.committed_height = height;
    }

    pub fn discard_staged(&mut self) {
        self.staged.clear();
    }

    /// Owners with a roster, staged view included
    pub fn owners(&self) -> Vec<Address> {
        let mut owners: HashSet<Address> = self.committed.keys().cloned().collect();
        for (owner, roster) in &self.staged {
            if roster.is_some() {
                owners.insert(owner.clone());
            } else {
                owners.remove(owner);
            }
        }
        let mut owners: Vec<_> = owners.into_iter().collect();
        owners.sort();
        owners
    }
}
