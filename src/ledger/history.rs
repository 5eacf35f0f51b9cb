//! Historical reads
//!
//! Versions below the committed height never change, so they can be read
//! from the store without the ledger's mutation lock. Each address keeps a
//! memo of the newest part of its version chain; commits drop the memo of
//! every address they touch.

use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, trace};

use super::{AddressRecord, RecordVersion};
use crate::crypto::Address;
use crate::storage::keys::{decode_value, record_key, snapshot_key};
use crate::storage::{KvStore, StorageError};

/// A version may vanish between reading the snapshot marker and walking
/// down to it while a disconnect commits; walks are retried this many times.
const WALK_ATTEMPTS: usize = 3;

pub struct LedgerHistory {
    store: Arc<dyn KvStore>,
    /// -1 while nothing is committed
    committed: AtomicI64,
    /// Bumped by every invalidation so stale walks are not memoized
    epoch: AtomicU64,
    /// Newest-first contiguous version chains
    memo: RwLock<HashMap<Address, Vec<RecordVersion>>>,
    capacity: usize,
}

impl LedgerHistory {
    pub fn new(store: Arc<dyn KvStore>, committed: Option<u64>, capacity: usize) -> Self {
        Self {
            store,
            committed: AtomicI64::new(encode_committed(committed)),
            epoch: AtomicU64::new(0),
            memo: RwLock::new(HashMap::new()),
            capacity,
        }
    }

    pub fn committed_height(&self) -> Option<u64> {
        let raw = self.committed.load(Ordering::Acquire);
        (raw >= 0).then_some(raw as u64)
    }

    pub(crate) fn set_committed_height(&self, height: Option<u64>) {
        self.committed.store(encode_committed(height), Ordering::Release);
    }

    /// Whether `height` lies strictly below the committed height
    pub fn is_historical(&self, height: u64) -> bool {
        self.committed_height().map_or(false, |committed| height < committed)
    }

    /// Newest version of `address` recorded at or below `height`
    pub fn record_at(&self, address: &Address, height: u64) -> Result<AddressRecord, StorageError> {
        if let Some(record) = self.memoized(address, height) {
            return Ok(record);
        }

        for _ in 0..WALK_ATTEMPTS {
            let epoch = self.epoch.load(Ordering::Acquire);
            if let Some((record, chain)) = self.walk(address, height)? {
                self.remember(address, chain, epoch);
                return Ok(record);
            }
            debug!(address = %address, height, "version chain changed during walk, retrying");
        }
        Err(StorageError::Corrupted(format!(
            "version chain of {address} keeps changing below height {height}"
        )))
    }

    fn memoized(&self, address: &Address, height: u64) -> Option<AddressRecord> {
        let memo = self.memo.read();
        let chain = memo.get(address)?;
        if let Some(version) = chain.iter().find(|version| version.height <= height) {
            return Some(version.record.clone());
        }
        match chain.last() {
            Some(oldest) if oldest.record.last_recorded_height.is_none() => Some(AddressRecord::blank()),
            None => Some(AddressRecord::blank()),
            Some(_) => None,
        }
    }

    /// `None` when a linked version was missing
    fn walk(
        &self,
        address: &Address,
        height: u64,
    ) -> Result<Option<(AddressRecord, Vec<RecordVersion>)>, StorageError> {
        let key = snapshot_key(address);
        let mut current: RecordVersion = match self.store.get(&key)? {
            Some(bytes) => decode_value("snapshot marker", &key, &bytes)?,
            None => return Ok(Some((AddressRecord::blank(), Vec::new()))),
        };

        let mut chain = vec![current.clone()];
        loop {
            if current.height <= height {
                return Ok(Some((current.record, chain)));
            }
            let Some(previous) = current.record.last_recorded_height else {
                return Ok(Some((AddressRecord::blank(), chain)));
            };
            let key = record_key(previous as i64, address);
            let record: AddressRecord = match self.store.get(&key)? {
                Some(bytes) => decode_value("address record", &key, &bytes)?,
                None => return Ok(None),
            };
            trace!(address = %address, version = previous, "walked to older version");
            current = RecordVersion {
                height: previous,
                record,
            };
            chain.push(current.clone());
        }
    }

    fn remember(&self, address: &Address, chain: Vec<RecordVersion>, epoch: u64) {
        if self.capacity == 0 {
            return;
        }
        let mut memo = self.memo.write();
        if self.epoch.load(Ordering::Acquire) != epoch {
            return;
        }
        if memo.len() >= self.capacity && !memo.contains_key(address) {
            memo.clear();
        }
        memo.insert(address.clone(), chain);
    }

    /// Forget the chains of `addresses` after their versions changed
    pub(crate) fn invalidate<'a>(&self, addresses: impl IntoIterator<Item = &'a Address>) {
        let mut memo = self.memo.write();
        for address in addresses {
            memo.remove(address);
        }
        self.epoch.fetch_add(1, Ordering::AcqRel);
    }

    pub fn memoized_addresses(&self) -> usize {
        self.memo.read().len()
    }
}

fn encode_committed(height: Option<u64>) -> i64 {
    height.map_or(-1, |h| h as i64)
}
