//! Sled-backed ledger store
//!
//! Every batch is flushed before returning so a commit that reports success
//! survives a crash.

use sled::{Db, Tree};
use std::path::Path;

use super::kv::{BatchOp, KvStore, PrefixIter, WriteBatch};
use super::StorageError;

const LEDGER_TREE: &str = "pot_ledger";

/// Database wrapper
#[derive(Debug, Clone)]
pub struct SledStore {
    db: Db,
    tree: Tree,
}

impl SledStore {
    /// Open or create the database
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        let db = sled::open(path.as_ref())
            .map_err(|e| StorageError::backend("open", path.as_ref().to_string_lossy().as_bytes(), e))?;
        Self::from_db(db)
    }

    /// Throwaway database removed on drop
    pub fn temporary() -> Result<Self, StorageError> {
        let db = sled::Config::new()
            .temporary(true)
            .open()
            .map_err(|e| StorageError::backend("open", b"temporary", e))?;
        Self::from_db(db)
    }

    fn from_db(db: Db) -> Result<Self, StorageError> {
        let tree = db
            .open_tree(LEDGER_TREE)
            .map_err(|e| StorageError::backend("open_tree", LEDGER_TREE.as_bytes(), e))?;
        Ok(Self { db, tree })
    }
}

impl KvStore for SledStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError> {
        self.tree
            .get(key)
            .map(|value| value.map(|v| v.to_vec()))
            .map_err(|e| StorageError::backend("get", key, e))
    }

    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError> {
        let mut sled_batch = sled::Batch::default();
        let mut first_key: Vec<u8> = Vec::new();
        for op in batch.into_ops() {
            match op {
                BatchOp::Put(key, value) => {
                    if first_key.is_empty() {
                        first_key = key.clone();
                    }
                    sled_batch.insert(key, value);
                }
                BatchOp::Delete(key) => {
                    if first_key.is_empty() {
                        first_key = key.clone();
                    }
                    sled_batch.remove(key);
                }
            }
        }
        self.tree
            .apply_batch(sled_batch)
            .map_err(|e| StorageError::backend("write_batch", &first_key, e))?;
        self.db
            .flush()
            .map_err(|e| StorageError::backend("flush", &first_key, e))?;
        Ok(())
    }

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> PrefixIter<'a> {
        let owned_prefix = prefix.to_vec();
        Box::new(self.tree.scan_prefix(prefix).map(move |item| {
            item.map(|(k, v)| (k.to_vec(), v.to_vec()))
                .map_err(|e| StorageError::backend("scan_prefix", &owned_prefix, e))
        }))
    }
}
