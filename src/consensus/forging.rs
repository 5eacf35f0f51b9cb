//! Forging right
//!
//! A forger may produce the next block when its harvest power, scaled by
//! the base target and the time since the previous block, exceeds the hit
//! derived from its generation signature.

use num_bigint::BigUint;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace};

use super::{compute_hit, ConsensusError};
use crate::constants::{GENESIS_BASE_TARGET, TARGET_SPACING};
use crate::crypto::{sha256_concat, Address, Hash, PublicKey};
use crate::ledger::LedgerError;

/// Tunable consensus parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ConsensusParams {
    /// Base target of the first blocks, before retargeting kicks in
    pub genesis_base_target: u64,
    /// Harvest power at or below this value never forges
    pub min_harvest_power: u64,
    /// Target block spacing in seconds
    pub target_spacing: u64,
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            genesis_base_target: GENESIS_BASE_TARGET,
            min_harvest_power: 0,
            target_spacing: TARGET_SPACING,
        }
    }
}

/// Next generation signature: `SHA-256(previous || uncompressed forger key)`
pub fn derive_generation_signature(previous: &Hash, forger: &PublicKey) -> Result<Hash, ConsensusError> {
    let full = forger.decompress()?;
    Ok(sha256_concat(&[previous.as_bytes(), full.as_bytes()]))
}

/// Recompute and compare a claimed generation signature
pub fn verify_generation_signature(claimed: &Hash, previous: &Hash, forger: &PublicKey) -> bool {
    derive_generation_signature(previous, forger)
        .map(|expected| expected == *claimed)
        .unwrap_or(false)
}

/// `base_target * elapsed * harvest_power > hit`, without overflow
pub fn verify_hit(hit: u64, base_target: u64, elapsed_seconds: u64, harvest_power: u64) -> bool {
    let target = BigUint::from(base_target) * BigUint::from(elapsed_seconds) * BigUint::from(harvest_power);
    target > BigUint::from(hit)
}

/// Decide whether `forger` may produce the block at `height`.
///
/// # Arguments
/// * `previous` - Generation signature of the previous block
/// * `forger` - Forger key as carried in the header (compressed or not)
/// * `height` - Height of the block being forged
/// * `elapsed_seconds` - Time since the previous block
/// * `base_target` - Base target in effect for this block
/// * `lookup` - Harvest power of an address at a height
///
/// # Returns
/// `Ok(false)` when the forger simply lost this round; errors for malformed
/// input or a forger below the weight floor.
pub fn check_forging_right<F>(
    previous: &Hash,
    forger: &PublicKey,
    height: u64,
    elapsed_seconds: i64,
    base_target: u64,
    params: &ConsensusParams,
    lookup: F,
) -> Result<bool, ConsensusError>
where
    F: FnOnce(&Address, u64) -> Result<u64, LedgerError>,
{
    if previous.is_zero() {
        return Err(ConsensusError::InvalidInput("empty previous generation signature"));
    }
    if forger.is_empty() {
        return Err(ConsensusError::InvalidInput("empty forger key"));
    }
    if height == 0 {
        return Err(ConsensusError::InvalidInput("height must be positive"));
    }
    if elapsed_seconds <= 0 {
        return Err(ConsensusError::InvalidInput("elapsed time must be positive"));
    }
    if base_target == 0 {
        return Err(ConsensusError::InvalidInput("base target must be positive"));
    }

    let full = forger.decompress()?;
    let address = Address::from_public_key(&full)?;
    let harvest_power = lookup(&address, height)?;
    if harvest_power <= params.min_harvest_power {
        debug!(address = %address, height, harvest_power, "forger below weight floor");
        return Err(ConsensusError::InsufficientWeight {
            address,
            power: harvest_power,
            floor: params.min_harvest_power,
        });
    }

    let signature = sha256_concat(&[previous.as_bytes(), full.as_bytes()]);
    let hit = compute_hit(&signature);
    let accepted = verify_hit(hit, base_target, elapsed_seconds as u64, harvest_power);
    trace!(address = %address, height, hit, base_target, elapsed_seconds, harvest_power, accepted, "forging check");
    Ok(accepted)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::error::ErrorKind;

    fn previous() -> Hash {
        sha256_concat(&[b"previous"])
    }

    #[test]
    fn test_generation_signature_uses_uncompressed_key() {
        let key = PrivateKey::generate().public_key();
        assert!(key.is_compressed());
        let full = key.decompress().unwrap();
        let derived = derive_generation_signature(&previous(), &key).unwrap();
        assert_eq!(derived, sha256_concat(&[previous().as_bytes(), full.as_bytes()]));
        assert!(verify_generation_signature(&derived, &previous(), &full));
        assert!(!verify_generation_signature(&previous(), &previous(), &key));
    }

    #[test]
    fn test_verify_hit_brackets_threshold() {
        let threshold = GENESIS_BASE_TARGET * 60 * 2;
        assert!(verify_hit(threshold - 1, GENESIS_BASE_TARGET, 60, 2));
        assert!(!verify_hit(threshold, GENESIS_BASE_TARGET, 60, 2));
    }

    #[test]
    fn test_verify_hit_does_not_overflow() {
        assert!(verify_hit(u64::MAX, u64::MAX, u64::MAX, 2));
    }

    #[test]
    fn test_malformed_inputs_are_rejected() {
        let key = PrivateKey::generate().public_key();
        let params = ConsensusParams::default();
        let lookup = |_: &Address, _: u64| Ok(10u64);
        let cases = [
            check_forging_right(&Hash::zero(), &key, 1, 60, 1, &params, lookup),
            check_forging_right(&previous(), &PublicKey::default(), 1, 60, 1, &params, lookup),
            check_forging_right(&previous(), &key, 0, 60, 1, &params, lookup),
            check_forging_right(&previous(), &key, 1, 0, 1, &params, lookup),
            check_forging_right(&previous(), &key, 1, -5, 1, &params, lookup),
            check_forging_right(&previous(), &key, 1, 60, 0, &params, lookup),
        ];
        for case in cases {
            assert_eq!(case.unwrap_err().kind(), ErrorKind::InvalidInput);
        }
    }

    #[test]
    fn test_weight_floor() {
        let key = PrivateKey::generate().public_key();
        let params = ConsensusParams {
            min_harvest_power: 5,
            ..ConsensusParams::default()
        };
        let err = check_forging_right(&previous(), &key, 1, 60, 1, &params, |_, _| Ok(5)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientWeight);

        let err = check_forging_right(&previous(), &key, 1, 60, 1, &ConsensusParams::default(), |_, _| Ok(0))
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InsufficientWeight);
    }

    #[test]
    fn test_lookup_sees_forger_address_and_height() {
        let private = PrivateKey::generate();
        let expected = Address::from_public_key(&private.public_key()).unwrap();
        let params = ConsensusParams::default();
        let result = check_forging_right(&previous(), &private.public_key(), 7, 60, 1, &params, |address, height| {
            assert_eq!(*address, expected);
            assert_eq!(height, 7);
            Ok(u64::MAX)
        });
        // Enormous power always wins
        assert!(result.unwrap());
    }

    #[test]
    fn test_default_target_is_a_lottery() {
        // 3600 s at this power puts the threshold near 0.6 * 2^64, so
        // roughly 45% of forgers win
        let params = ConsensusParams::default();
        let outcomes: Vec<bool> = (1u8..=64)
            .map(|seed| {
                let key = PrivateKey::from_bytes(&[seed; 32]).unwrap().public_key();
                check_forging_right(&previous(), &key, 1, 3600, GENESIS_BASE_TARGET, &params, |_, _| {
                    Ok(20_000_000)
                })
                .unwrap()
            })
            .collect();
        assert!(outcomes.iter().any(|won| *won));
        assert!(outcomes.iter().any(|won| !*won));

        // A single unit of power at one spacing practically never wins
        let lucky = (1u8..=64)
            .filter(|seed| {
                let key = PrivateKey::from_bytes(&[*seed; 32]).unwrap().public_key();
                check_forging_right(&previous(), &key, 1, 60, GENESIS_BASE_TARGET, &params, |_, _| Ok(1))
                    .unwrap()
            })
            .count();
        assert_eq!(lucky, 0);
    }

    #[test]
    fn test_tiny_power_loses() {
        let key = PrivateKey::generate().public_key();
        let params = ConsensusParams::default();
        let accepted = check_forging_right(&previous(), &key, 1, 1, 1, &params, |_, _| Ok(1)).unwrap();
        let signature = derive_generation_signature(&previous(), &key).unwrap();
        assert_eq!(accepted, compute_hit(&signature) < 1);
    }
}
