//! Address records
//!
//! Every address that has ever received weight has one record saying where
//! its roster entry lives and which root its weight rolls up to.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::crypto::Address;

/// A delegation pointer (`miner` or `father`)
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Link {
    /// Never seen (`" "`)
    Unset,
    /// Points at the record's own address (`"0"`)
    Itself,
    To(Address),
}

impl Link {
    pub fn target(&self) -> Option<&Address> {
        match self {
            Link::To(address) => Some(address),
            _ => None,
        }
    }
}

impl fmt::Display for Link {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Link::Unset => f.write_str(" "),
            Link::Itself => f.write_str("0"),
            Link::To(address) => write!(f, "{address}"),
        }
    }
}

/// Delegation state of one address
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddressRecord {
    /// Root whose harvest power includes this address's weight
    pub miner: Link,
    /// Owner of the roster holding this address's entry
    pub father: Link,
    /// Slot within the father's roster (0 for a root's own roster)
    pub index: usize,
    /// Weight of the whole subtree; only meaningful on a root
    pub total_harvest_power: u64,
    /// Height of the previous persisted version
    pub last_recorded_height: Option<u64>,
}

impl Default for AddressRecord {
    fn default() -> Self {
        Self::blank()
    }
}

impl AddressRecord {
    pub fn blank() -> Self {
        Self {
            miner: Link::Unset,
            father: Link::Unset,
            index: 0,
            total_harvest_power: 0,
            last_recorded_height: None,
        }
    }

    pub fn root(total_harvest_power: u64) -> Self {
        Self {
            miner: Link::Itself,
            father: Link::Itself,
            index: 0,
            total_harvest_power,
            last_recorded_height: None,
        }
    }

    pub fn delegated(miner: Address, father: Address, index: usize) -> Self {
        Self {
            miner: Link::To(miner),
            father: Link::To(father),
            index,
            total_harvest_power: 0,
            last_recorded_height: None,
        }
    }

    pub fn is_blank(&self) -> bool {
        self.miner == Link::Unset && self.father == Link::Unset
    }

    pub fn is_root(&self) -> bool {
        self.miner == Link::Itself && self.father == Link::Itself
    }

    pub fn is_delegated(&self) -> bool {
        matches!((&self.miner, &self.father), (Link::To(_), Link::To(_)))
    }

    /// Owner of the roster that holds `address`'s own entry
    pub fn roster_owner(&self, address: &Address) -> Option<Address> {
        match &self.father {
            Link::Itself => Some(address.clone()),
            Link::To(father) => Some(father.clone()),
            Link::Unset => None,
        }
    }

    /// Root that `address`'s weight rolls up to
    pub fn effective_root(&self, address: &Address) -> Option<Address> {
        match &self.miner {
            Link::Itself => Some(address.clone()),
            Link::To(miner) => Some(miner.clone()),
            Link::Unset => None,
        }
    }

    /// Same delegation state, ignoring the version back-link
    pub fn same_state(&self, other: &AddressRecord) -> bool {
        self.miner == other.miner
            && self.father == other.father
            && self.index == other.index
            && self.total_harvest_power == other.total_harvest_power
    }
}

/// A persisted version: the height it was recorded at plus its contents
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordVersion {
    pub height: u64,
    pub record: AddressRecord,
}
