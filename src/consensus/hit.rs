//! Hit transforms
//!
//! The canonical hit maps a generation signature into the log domain. With
//! `u = (x + 1) / 2^256` the signature is a uniform draw from `(0, 1]`, and
//! the hit is its log depth `-ln(u)` scaled by 1000 and re-expanded by
//! `2^64 / 1000`. The result is exponentially distributed with mean `2^64`,
//! so `P(hit < T) = 1 - exp(-T / 2^64)`: a forger whose threshold is small
//! against `2^64` wins with probability close to `T / 2^64`, which is what
//! the genesis base target is sized for. Depths of one or more saturate at
//! `u64::MAX`.
//!
//! An older raw-bytes transform is still kept as [`compute_raw_hit`]. It is
//! not used for consensus; tests pin that the two disagree.

use num_bigint::BigUint;
use num_traits::{One, ToPrimitive};

use crate::crypto::Hash;

/// `ln(2^256)`, the logarithm of the largest signature plus one
const LN_SIGNATURE_RANGE: f64 = 256.0 * std::f64::consts::LN_2;

/// Resolution of the log depth
const HIT_SCALE: f64 = 1000.0;

/// `2^64 / 1000`
const HIT_EXPANSION: f64 = 18_446_744_073_709_551_616.0 / HIT_SCALE;

/// Log-domain hit of a generation signature
pub fn compute_hit(signature: &Hash) -> u64 {
    let value = BigUint::from_bytes_be(signature.as_bytes()) + BigUint::one();
    // Every 256-bit value fits in an f64 exponent; precision loss only
    // affects digits far below the hit resolution
    let ln = value.to_f64().unwrap_or(f64::MAX).ln();
    // ln(2^256) may round one ulp above the constant
    let depth = (LN_SIGNATURE_RANGE - ln).max(0.0);
    // `as` saturates at u64::MAX
    (depth * HIT_SCALE * HIT_EXPANSION) as u64
}

/// Legacy raw hit: the first eight signature bytes, little-endian
pub fn compute_raw_hit(signature: &Hash) -> u64 {
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&signature.as_bytes()[..8]);
    u64::from_le_bytes(bytes)
}
