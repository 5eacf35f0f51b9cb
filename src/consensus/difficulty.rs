//! Base target retargeting and cumulative difficulty
//!
//! The base target follows the average spacing of the last three blocks.
//! It eases by at most 67/60 per block and tightens by at most
//! `7 * 0.64 / 60`, so tightening reacts faster than easing.

use num_bigint::BigUint;
use num_traits::Zero;

/// Number of spacings averaged by the retarget
pub const RETARGET_WINDOW: u64 = 3;

/// Upper clamp on the averaged spacing
const MAX_SPACING: u64 = 67;

/// Lower clamp on the averaged spacing
const MIN_SPACING: u64 = 53;

/// Tightening damping, as a percentage
const TIGHTEN_PERCENT: u128 = 64;

/// What the retarget needs to know about one ancestor block
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AncestorInfo {
    pub height: u64,
    pub timestamp: u64,
    pub base_target: u64,
}

/// Calculate the base target of the block following `ancestors[0]`.
///
/// # Arguments
/// * `ancestors` - Chain tip first, then its parents
/// * `genesis_base_target` - Value used until enough history exists
/// * `target_spacing` - Desired seconds between blocks
///
/// # Returns
/// The new base target, never below 1
pub fn retarget_base_target(ancestors: &[AncestorInfo], genesis_base_target: u64, target_spacing: u64) -> u64 {
    let window = RETARGET_WINDOW as usize;
    let (Some(tip), Some(oldest)) = (ancestors.first(), ancestors.get(window)) else {
        return genesis_base_target;
    };
    if tip.height < RETARGET_WINDOW || target_spacing == 0 {
        return genesis_base_target;
    }

    let average_spacing = tip.timestamp.saturating_sub(oldest.timestamp) / RETARGET_WINDOW;
    let previous = tip.base_target as u128;
    let spacing = target_spacing as u128;

    let next = if average_spacing > target_spacing {
        // Blocks are slow: ease
        previous * average_spacing.min(MAX_SPACING) as u128 / spacing
    } else {
        // Blocks are fast: tighten
        let shortfall = spacing.saturating_sub(average_spacing.max(MIN_SPACING) as u128);
        previous - previous * shortfall * TIGHTEN_PERCENT / 100 / spacing
    };

    next.clamp(1, u64::MAX as u128) as u64
}

/// Add one block's work to the chain's cumulative difficulty.
///
/// Work is `2^64 / base_target`; a zero base target adds nothing.
pub fn accumulate_cumulative_difficulty(previous: &BigUint, base_target: u64) -> BigUint {
    if base_target == 0 {
        return previous.clone();
    }
    let work = (BigUint::from(1u8) << 64u32) / BigUint::from(base_target);
    previous + work
}

/// Cumulative difficulty of a chain made of `base_targets`
pub fn chain_cumulative_difficulty(base_targets: impl IntoIterator<Item = u64>) -> BigUint {
    base_targets
        .into_iter()
        .fold(BigUint::zero(), |total, base_target| accumulate_cumulative_difficulty(&total, base_target))
}
