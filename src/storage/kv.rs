//! Ordered key-value store abstraction
//!
//! The weight ledger needs exactly: point reads, atomic batched writes and a
//! forward scan from a key prefix. Sled backs the node; [`MemoryStore`]
//! backs tests.
//!
//! [`MemoryStore`]: super::MemoryStore

use super::StorageError;

/// One mutation inside a [`WriteBatch`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOp {
    Put(Vec<u8>, Vec<u8>),
    Delete(Vec<u8>),
}

/// Mutations applied atomically by [`KvStore::write_batch`]
#[derive(Debug, Clone, Default)]
pub struct WriteBatch {
    ops: Vec<BatchOp>,
}

impl WriteBatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn put(&mut self, key: Vec<u8>, value: Vec<u8>) {
        self.ops.push(BatchOp::Put(key, value));
    }

    pub fn delete(&mut self, key: Vec<u8>) {
        self.ops.push(BatchOp::Delete(key));
    }

    /// Append every mutation of `other` after the ones already queued
    pub fn extend(&mut self, other: WriteBatch) {
        self.ops.extend(other.ops);
    }

    pub fn len(&self) -> usize {
        self.ops.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    pub fn into_ops(self) -> Vec<BatchOp> {
        self.ops
    }
}

/// Forward iterator over `(key, value)` pairs sharing a prefix
pub type PrefixIter<'a> = Box<dyn Iterator<Item = Result<(Vec<u8>, Vec<u8>), StorageError>> + 'a>;

/// Storage collaborator of the weight ledger.
///
/// Implementations must be safe to read from several threads while one
/// thread writes batches.
pub trait KvStore: Send + Sync {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, StorageError>;

    /// Apply every operation of `batch` or none of them
    fn write_batch(&self, batch: WriteBatch) -> Result<(), StorageError>;

    fn scan_prefix<'a>(&'a self, prefix: &[u8]) -> PrefixIter<'a>;

    fn put(&self, key: Vec<u8>, value: Vec<u8>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.put(key, value);
        self.write_batch(batch)
    }

    fn delete(&self, key: Vec<u8>) -> Result<(), StorageError> {
        let mut batch = WriteBatch::new();
        batch.delete(key);
        self.write_batch(batch)
    }
}
