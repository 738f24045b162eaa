//! Challenge levels and mixed-radix addressing
//!
//! Level 0 is the block level. Every level below it refines one step of the
//! level above into `L_j` steps, and the last level is the small-step level
//! whose steps are single opcodes. A position inside a message is addressed
//! by the heights chosen at each enclosing level below the block level.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ProtocolError;
use crate::types::Height;

/// Granularity of a challenge
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChallengeType {
    /// Leaves are finished-machine hashes at rollup messages
    Block,
    /// Leaves are machine hashes a fixed number of opcodes apart
    BigStep,
    /// Leaves are machine hashes one opcode apart
    SmallStep,
}

impl fmt::Display for ChallengeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Block => write!(f, "block"),
            Self::BigStep => write!(f, "big-step"),
            Self::SmallStep => write!(f, "small-step"),
        }
    }
}

/// Ordered per-level maximum heights, outermost first
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeLevels {
    heights: Vec<Height>,
}

impl ChallengeLevels {
    /// At least a block level and a small-step level, every height non-zero
    pub fn new(heights: Vec<Height>) -> Result<Self, ProtocolError> {
        if heights.len() < 2 {
            return Err(ProtocolError::InvalidLevels(format!(
                "need at least 2 levels, got {}",
                heights.len()
            )));
        }
        if heights.iter().any(|h| *h == 0) {
            return Err(ProtocolError::InvalidLevels("level heights must be non-zero".to_string()));
        }
        let opcodes = heights[1..]
            .iter()
            .try_fold(1u64, |acc, h| acc.checked_mul(*h));
        if opcodes.is_none() {
            return Err(ProtocolError::InvalidLevels("opcode range overflows u64".to_string()));
        }
        Ok(Self { heights })
    }

    /// Number of levels
    pub fn count(&self) -> usize {
        self.heights.len()
    }

    /// Per-level maximum heights
    pub fn heights(&self) -> &[Height] {
        &self.heights
    }

    /// Maximum leaf height at `level`
    pub fn max_height(&self, level: usize) -> Option<Height> {
        self.heights.get(level).copied()
    }

    /// Leaves committed by a full history at `level`
    pub fn leaf_count(&self, level: usize) -> Option<u64> {
        self.max_height(level).map(|h| h + 1)
    }

    /// Index of the smallest granularity
    pub fn smallest(&self) -> usize {
        self.heights.len() - 1
    }

    /// Whether `level` is the small-step level
    pub fn is_smallest(&self, level: usize) -> bool {
        level == self.smallest()
    }

    /// Granularity of `level`
    pub fn challenge_type(&self, level: usize) -> ChallengeType {
        if level == 0 {
            ChallengeType::Block
        } else if level >= self.smallest() {
            ChallengeType::SmallStep
        } else {
            ChallengeType::BigStep
        }
    }

    /// Opcodes between consecutive leaves at `level` (sub-levels only)
    pub fn step_size(&self, level: usize) -> u64 {
        self.heights.iter().skip(level + 1).product()
    }

    /// Opcodes executed by one rollup message
    pub fn opcodes_per_message(&self) -> u64 {
        self.step_size(0)
    }

    /// First opcode addressed by a sub-challenge.
    ///
    /// `origin_heights[0]` is the block-level height and selects the message;
    /// every following height `h_i` contributes `h_i * step_size(i)`.
    pub fn opcode_start(&self, origin_heights: &[Height]) -> u64 {
        origin_heights
            .iter()
            .enumerate()
            .skip(1)
            .map(|(level, h)| h.saturating_mul(self.step_size(level)))
            .fold(0u64, u64::saturating_add)
    }
}

impl Default for ChallengeLevels {
    fn default() -> Self {
        Self {
            heights: vec![32, 32, 32],
        }
    }
}

impl FromStr for ChallengeLevels {
    type Err = ProtocolError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let heights = s
            .split(',')
            .map(|part| part.trim().parse::<Height>())
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| ProtocolError::InvalidLevels(format!("{}: {}", s, e)))?;
        Self::new(heights)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_types() {
        let levels = ChallengeLevels::new(vec![32, 16, 8, 4]).unwrap();
        assert_eq!(levels.challenge_type(0), ChallengeType::Block);
        assert_eq!(levels.challenge_type(1), ChallengeType::BigStep);
        assert_eq!(levels.challenge_type(2), ChallengeType::BigStep);
        assert_eq!(levels.challenge_type(3), ChallengeType::SmallStep);
        assert!(levels.is_smallest(3));
    }

    #[test]
    fn test_mixed_radix_addressing() {
        let levels = ChallengeLevels::new(vec![32, 16, 8, 4]).unwrap();
        assert_eq!(levels.step_size(1), 32);
        assert_eq!(levels.step_size(2), 4);
        assert_eq!(levels.step_size(3), 1);
        assert_eq!(levels.opcodes_per_message(), 512);
        // message 7, big-step heights 3 then 5: 3 * 32 + 5 * 4
        assert_eq!(levels.opcode_start(&[7, 3, 5]), 116);
        assert_eq!(levels.opcode_start(&[7]), 0);
    }

    #[test]
    fn test_parse_levels() {
        let levels: ChallengeLevels = "8, 4,2".parse().unwrap();
        assert_eq!(levels.heights(), &[8, 4, 2]);
        assert_eq!(levels.leaf_count(1), Some(5));
        assert!("8".parse::<ChallengeLevels>().is_err());
        assert!("8,0".parse::<ChallengeLevels>().is_err());
        assert!("8,x".parse::<ChallengeLevels>().is_err());
    }
}
