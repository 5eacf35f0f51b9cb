//! Roster entries and the slot arena

use serde::{Deserialize, Serialize};
use crate::crypto::Address;

/// One member's individual weight and accumulated reward
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RosterEntry {
    pub address: Address,
    /// Mining power, +1 per qualifying output received
    pub weight: u64,
    /// Accumulated club reward not yet claimed
    pub reward: u64,
}

impl RosterEntry {
    pub fn new(address: impl Into<Address>, weight: u64) -> Self {
        Self {
            address: address.into(),
            weight,
            reward: 0,
        }
    }
}

/// A roster position. Slot 0 stays `Reserved` while the owner's own entry
/// lives in another roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Slot {
    Reserved,
    Occupied(RosterEntry),
}

impl Slot {
    pub fn entry(&self) -> Option<&RosterEntry> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            Slot::Reserved => None,
        }
    }

    fn entry_mut(&mut self) -> Option<&mut RosterEntry> {
        match self {
            Slot::Occupied(entry) => Some(entry),
            Slot::Reserved => None,
        }
    }
}

/// Ordered members of one owner.
///
/// Removal swaps the last slot into the hole, so indices stay dense and the
/// caller is told which address changed slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Roster {
    slots: Vec<Slot>,
}

impl Default for Roster {
    fn default() -> Self {
        Self::new()
    }
}

impl Roster {
    /// Fresh roster with slot 0 reserved for the owner
    pub fn new() -> Self {
        Self {
            slots: vec![Slot::Reserved],
        }
    }

    pub fn len(&self) -> usize {
        self.slots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.slots.is_empty()
    }

    /// Nothing but the reserved owner slot is left
    pub fn is_vacant(&self) -> bool {
        self.slots.iter().all(|slot| matches!(slot, Slot::Reserved))
    }

    pub fn get(&self, index: usize) -> Option<&RosterEntry> {
        self.slots.get(index).and_then(Slot::entry)
    }

    pub fn get_mut(&mut self, index: usize) -> Option<&mut RosterEntry> {
        self.slots.get_mut(index).and_then(Slot::entry_mut)
    }

    pub fn owner_entry(&self) -> Option<&RosterEntry> {
        self.get(0)
    }

    /// Recruited members (slots 1..)
    pub fn members(&self) -> impl Iterator<Item = (usize, &RosterEntry)> {
        self.slots
            .iter()
            .enumerate()
            .skip(1)
            .filter_map(|(index, slot)| slot.entry().map(|entry| (index, entry)))
    }

    pub(crate) fn set_owner(&mut self, entry: RosterEntry) {
        if self.slots.is_empty() {
            self.slots.push(Slot::Reserved);
        }
        self.slots[0] = Slot::Occupied(entry);
    }

    pub(crate) fn take_owner(&mut self) -> Option<RosterEntry> {
        match self.slots.first_mut() {
            Some(slot) => match std::mem::replace(slot, Slot::Reserved) {
                Slot::Occupied(entry) => Some(entry),
                Slot::Reserved => None,
            },
            None => None,
        }
    }

    pub(crate) fn push(&mut self, entry: RosterEntry) -> usize {
        self.slots.push(Slot::Occupied(entry));
        self.slots.len() - 1
    }

    /// Swap-with-last removal of a member slot (index >= 1).
    ///
    /// Returns the removed entry and the address now sitting at `index`, if
    /// another member was moved there.
    pub(crate) fn swap_remove(&mut self, index: usize) -> Option<(RosterEntry, Option<Address>)> {
        if index == 0 || index >= self.slots.len() {
            return None;
        }
        let removed = match self.slots.swap_remove(index) {
            Slot::Occupied(entry) => entry,
            Slot::Reserved => return None,
        };
        let moved = self.get(index).map(|entry| entry.address.clone());
        Some((removed, moved))
    }

    /// Inverse of [`Roster::swap_remove`]: the current occupant of `index`
    /// (if any) goes back to the end and `entry` takes its place.
    ///
    /// Returns the displaced address.
    pub(crate) fn restore(&mut self, index: usize, entry: RosterEntry) -> Option<Option<Address>> {
        if index == 0 || index > self.slots.len() {
            return None;
        }
        if index == self.slots.len() {
            self.slots.push(Slot::Occupied(entry));
            return Some(None);
        }
        let displaced = std::mem::replace(&mut self.slots[index], Slot::Occupied(entry));
        let displaced_address = displaced.entry().map(|e| e.address.clone());
        self.slots.push(displaced);
        Some(displaced_address)
    }
}
