//! Proportional reward arithmetic
//!
//! `weight / total_weight * total_reward` is evaluated tier by tier so no
//! intermediate `f64` exceeds about 2^41, where doubles are still exact to a
//! small fraction of a base unit. A single multiply of an amount near the
//! monetary maximum by a ratio would lose the low digits.

/// Magnitude of one tier
pub const REWARD_TIER_BASE: u64 = 1_000_000;

const TIER_HIGH: u64 = REWARD_TIER_BASE * REWARD_TIER_BASE;

/// `round(weight / total_weight * total_reward)`, clamped to `[0, total_reward]`
pub fn compute_member_reward(weight: u64, total_weight: u64, total_reward: u64) -> u64 {
    if weight == 0 || total_weight == 0 || total_reward == 0 {
        return 0;
    }
    if weight >= total_weight {
        return total_reward;
    }

    let ratio = weight as f64 / total_weight as f64;
    let base = REWARD_TIER_BASE as f64;

    let high_tier = total_reward / TIER_HIGH;
    let mid_tier = (total_reward / REWARD_TIER_BASE) % REWARD_TIER_BASE;
    let low_tier = total_reward % REWARD_TIER_BASE;

    // Fractions of the upper tiers carry down into the next one
    let high_part = high_tier as f64 * ratio;
    let high_whole = high_part.trunc();
    let mid_part = (high_part - high_whole) * base + mid_tier as f64 * ratio;
    let mid_whole = mid_part.trunc();
    let low_part = (mid_part - mid_whole) * base + low_tier as f64 * ratio;

    let reward = (high_whole as u128) * TIER_HIGH as u128
        + (mid_whole as u128) * REWARD_TIER_BASE as u128
        + low_part.round().max(0.0) as u128;

    reward.min(total_reward as u128) as u64
}
