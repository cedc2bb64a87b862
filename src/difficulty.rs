//! Depth-scaled mining difficulty.
//!
//! Deeper cells are smaller and more numerous, so rewriting a fine-grained
//! region of the fractal costs more work. Difficulty grows linearly with the
//! level and the acceptance threshold shrinks accordingly.

use crate::config::MinerConfig;
use crate::digest::{leading_u64, Digest};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DifficultyCurve {
    pub base_difficulty: u64,
    pub depth_multiplier: u64,
}

impl DifficultyCurve {
    /// Zero inputs are raised to 1 so the curve stays strictly increasing.
    pub fn new(base_difficulty: u64, depth_multiplier: u64) -> Self {
        Self {
            base_difficulty: base_difficulty.max(1),
            depth_multiplier: depth_multiplier.max(1),
        }
    }

    pub fn from_config(config: &MinerConfig) -> Self {
        Self::new(config.base_difficulty, config.depth_multiplier)
    }

    /// `base_difficulty * (1 + depth_multiplier * level)`, saturating.
    pub fn difficulty_target(&self, level: u32) -> u64 {
        let growth = self
            .depth_multiplier
            .saturating_mul(u64::from(level))
            .saturating_add(1);
        self.base_difficulty.saturating_mul(growth)
    }

    /// Work values strictly below this threshold are accepted.
    pub fn threshold(&self, level: u32) -> u64 {
        u64::MAX / self.difficulty_target(level)
    }

    pub fn meets_target(&self, digest: &Digest, level: u32) -> bool {
        leading_u64(digest) < self.threshold(level)
    }
}

impl Default for DifficultyCurve {
    fn default() -> Self {
        Self::from_config(&MinerConfig::default())
    }
}
