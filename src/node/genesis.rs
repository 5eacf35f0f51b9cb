//! Genesis block
//!
//! The genesis header is fully determined by the genesis timestamp and base
//! target. Its generation signature is seeded from the chain name because a
//! zero signature is refused by the forging check of block 1.

use crate::consensus::{compute_payload_hash, Block, BlockHeader};
use crate::constants::CHAIN_NAME;
use crate::crypto::{sha256_concat, Hash, PublicKey, Signature};

/// Genesis block version
const GENESIS_VERSION: u32 = 1;

/// Generation signature every chain starts from
pub fn genesis_generation_signature() -> Hash {
    sha256_concat(&[CHAIN_NAME.as_bytes()])
}

/// Create the genesis block.
///
/// Carries no transactions and no forger; the initial roots are seeded
/// directly into the ledger.
pub fn create_genesis_block(timestamp: u64, base_target: u64) -> Block {
    let transactions = Vec::new();
    let header = BlockHeader {
        version: GENESIS_VERSION,
        prev_hash: Hash::zero(),
        payload_hash: compute_payload_hash(&transactions),
        timestamp,
        height: 0,
        base_target,
        generation_signature: genesis_generation_signature(),
        forger_public_key: PublicKey::default(),
        forger_signature: Signature([0u8; 64]),
    };
    Block::new(header, transactions)
}

/// Hash of the genesis block for the given parameters
pub fn genesis_hash(timestamp: u64, base_target: u64) -> Hash {
    create_genesis_block(timestamp, base_target).hash()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::constants::{GENESIS_BASE_TARGET, GENESIS_TIMESTAMP};

    #[test]
    fn test_genesis_is_deterministic() {
        let first = create_genesis_block(GENESIS_TIMESTAMP, GENESIS_BASE_TARGET);
        let second = create_genesis_block(GENESIS_TIMESTAMP, GENESIS_BASE_TARGET);
        assert_eq!(first.hash(), second.hash());
        assert_eq!(genesis_hash(GENESIS_TIMESTAMP, GENESIS_BASE_TARGET), first.hash());
        assert_ne!(genesis_hash(GENESIS_TIMESTAMP + 1, GENESIS_BASE_TARGET), first.hash());
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = create_genesis_block(GENESIS_TIMESTAMP, GENESIS_BASE_TARGET);
        assert!(genesis.is_genesis());
        assert!(genesis.has_valid_payload());
        assert_eq!(genesis.header.base_target, GENESIS_BASE_TARGET);
        assert!(!genesis.header.generation_signature.is_zero());
    }
}
