//! Reward-rate samples
//!
//! For every coinbase that paid a club, records how the reward was split
//! between the root and the members below it. Samples live under their own
//! key prefix and never feed back into consensus.

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, trace};

use crate::crypto::Address;
use crate::ledger::RewardDistribution;
use crate::storage::keys::{decode_value, encode_value, rate_key, rate_prefix};
use crate::storage::{KvStore, StorageError, WriteBatch};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RewardRateSample {
    pub root: Address,
    pub reward: u64,
    pub root_share: u64,
    /// Paid to members below the root
    pub distributed: u64,
    pub harvest_power: u64,
}

impl RewardRateSample {
    /// Fraction of the reward that reached members
    pub fn member_rate(&self) -> f64 {
        if self.reward == 0 {
            return 0.0;
        }
        self.distributed as f64 / self.reward as f64
    }

    /// Reward per unit of harvest power
    pub fn reward_per_power(&self) -> f64 {
        if self.harvest_power == 0 {
            return 0.0;
        }
        self.reward as f64 / self.harvest_power as f64
    }
}

impl From<&RewardDistribution> for RewardRateSample {
    fn from(distribution: &RewardDistribution) -> Self {
        Self {
            root: distribution.root.clone(),
            reward: distribution.amount,
            root_share: distribution.root_share,
            distributed: distribution.distributed,
            harvest_power: distribution.harvest_power,
        }
    }
}

pub struct RewardRateRecorder {
    store: Arc<dyn KvStore>,
    enabled: bool,
}

impl RewardRateRecorder {
    pub fn new(store: Arc<dyn KvStore>, enabled: bool) -> Self {
        Self { store, enabled }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Queue the samples of the block at `height` into `batch`, in block
    /// order. Nothing is queued while the recorder is disabled.
    pub fn stage(
        &self,
        height: u64,
        distributions: &[RewardDistribution],
        batch: &mut WriteBatch,
    ) -> Result<usize, StorageError> {
        if !self.enabled {
            return Ok(0);
        }
        for (index, distribution) in distributions.iter().enumerate() {
            let sample = RewardRateSample::from(distribution);
            trace!(height, index, root = %sample.root, rate = sample.member_rate(), "reward rate sample");
            let index = u32::try_from(index)
                .map_err(|_| StorageError::Corrupted(format!("too many reward samples at height {height}")))?;
            batch.put(rate_key(height, index, &sample.root), encode_value("reward rate", &sample)?);
        }
        Ok(distributions.len())
    }

    /// Samples recorded at `height`, in block order
    pub fn samples_at(&self, height: u64) -> Result<Vec<RewardRateSample>, StorageError> {
        self.store
            .scan_prefix(&rate_prefix(height))
            .map(|item| {
                let (key, bytes) = item?;
                decode_value("reward rate", &key, &bytes)
            })
            .collect()
    }

    /// Queue the removal of every sample of a disconnected height
    pub fn stage_removal(&self, height: u64, batch: &mut WriteBatch) -> Result<usize, StorageError> {
        let mut removed = 0;
        for item in self.store.scan_prefix(&rate_prefix(height)) {
            let (key, _) = item?;
            batch.delete(key);
            removed += 1;
        }
        if removed > 0 {
            debug!(height, removed, "reward rate samples queued for removal");
        }
        Ok(removed)
    }
}
