//! Block structure for the PoT chain
//!
//! A header carries everything the forging check needs: the parent's
//! generation signature chain, the base target, and the forger's compressed
//! key, signed by the forger over the rest of the header.

use serde::{Deserialize, Serialize};

use crate::crypto::{hash_bytes, Hash, PrivateKey, PublicKey, Signature};
use crate::validation::Transaction;

/// Block header containing all metadata
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockHeader {
    /// Protocol version
    pub version: u32,
    /// Hash of the previous block
    pub prev_hash: Hash,
    /// Commitment to the block's transactions
    pub payload_hash: Hash,
    /// Block timestamp (seconds since Unix epoch)
    pub timestamp: u64,
    pub height: u64,
    /// Base target this block was forged against
    pub base_target: u64,
    /// Hash-chained randomness seed
    pub generation_signature: Hash,
    /// Forger key, compressed SEC1
    pub forger_public_key: PublicKey,
    /// Forger's signature over every other field
    pub forger_signature: Signature,
}

impl BlockHeader {
    /// Serialize the header for hashing, signature excluded
    pub fn unsigned_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&self.version.to_le_bytes());
        bytes.extend_from_slice(&self.prev_hash.0);
        bytes.extend_from_slice(&self.payload_hash.0);
        bytes.extend_from_slice(&self.timestamp.to_le_bytes());
        bytes.extend_from_slice(&self.height.to_le_bytes());
        bytes.extend_from_slice(&self.base_target.to_le_bytes());
        bytes.extend_from_slice(&self.generation_signature.0);
        bytes.push(self.forger_public_key.as_bytes().len() as u8);
        bytes.extend_from_slice(self.forger_public_key.as_bytes());
        bytes
    }

    /// Hash signed by the forger
    pub fn signing_hash(&self) -> Hash {
        hash_bytes(&self.unsigned_bytes())
    }

    /// Calculate the hash of this header
    pub fn hash(&self) -> Hash {
        let mut bytes = self.unsigned_bytes();
        bytes.extend_from_slice(&self.forger_signature.0);
        hash_bytes(&bytes)
    }

    /// Set the forger key and sign the header with `key`
    pub fn sign(&mut self, key: &PrivateKey) {
        self.forger_public_key = key.public_key();
        self.forger_signature = key.sign(&self.signing_hash());
    }

    pub fn verify_signature(&self) -> bool {
        self.forger_public_key
            .verify(&self.signing_hash(), &self.forger_signature)
    }
}

/// Commitment to an ordered list of transactions
pub fn compute_payload_hash(transactions: &[Transaction]) -> Hash {
    if transactions.is_empty() {
        return Hash::zero();
    }
    let mut bytes = Vec::with_capacity(transactions.len() * 32);
    for tx in transactions {
        bytes.extend_from_slice(&tx.hash().0);
    }
    hash_bytes(&bytes)
}

/// A complete block containing header and transactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    pub header: BlockHeader,
    /// Coinbase first
    pub transactions: Vec<Transaction>,
}

impl Block {
    pub fn new(header: BlockHeader, transactions: Vec<Transaction>) -> Self {
        Self { header, transactions }
    }

    /// Get the block hash
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    pub fn height(&self) -> u64 {
        self.header.height
    }

    pub fn has_valid_payload(&self) -> bool {
        compute_payload_hash(&self.transactions) == self.header.payload_hash
    }

    /// Check if this is the genesis block
    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.prev_hash == Hash::zero()
    }
}
