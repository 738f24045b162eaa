//! Merkle expansions
//!
//! An expansion is the compact multi-root form of an append-only Merkle tree:
//! entry `i` holds the root of a complete subtree of `2^i` leaves, or zero when
//! the tree size has no such subtree. The tree size is therefore the sum of
//! `2^i` over the non-zero entries.

use serde::{Deserialize, Serialize};

use crate::hasher::Keccak256Hasher;
use crate::{Hash, MerkleError, MAX_LEVEL, ZERO_HASH};

/// Index of the most significant set bit
pub fn most_significant_bit(x: u64) -> Result<u32, MerkleError> {
    if x == 0 {
        return Err(MerkleError::ZeroHasNoSignificantBit);
    }
    Ok(63 - x.leading_zeros())
}

/// Index of the least significant set bit
pub fn least_significant_bit(x: u64) -> Result<u32, MerkleError> {
    if x == 0 {
        return Err(MerkleError::ZeroHasNoSignificantBit);
    }
    Ok(x.trailing_zeros())
}

/// Largest complete subtree level that can be appended to a tree of
/// `start` leaves without growing it past `end` leaves.
pub fn maximum_append_between(start: u64, end: u64) -> Result<u32, MerkleError> {
    if start >= end {
        return Err(MerkleError::StartNotLessThanEnd { start, end });
    }
    let msb = most_significant_bit(start ^ end)?;
    let mask = if msb >= 63 {
        u64::MAX
    } else {
        (1u64 << (msb + 1)) - 1
    };
    let y = start & mask;
    let z = end & mask;
    if y != 0 {
        return least_significant_bit(y);
    }
    most_significant_bit(z)
}

/// Append-only Merkle expansion
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MerkleExpansion {
    levels: Vec<Hash>,
}

impl MerkleExpansion {
    /// Create an empty expansion
    pub const fn new() -> Self {
        Self { levels: Vec::new() }
    }

    /// Build the expansion of a leaf sequence
    pub fn from_leaves(leaves: &[Hash]) -> Result<Self, MerkleError> {
        let mut expansion = Self::new();
        for leaf in leaves {
            expansion.append_leaf(leaf)?;
        }
        Ok(expansion)
    }

    /// Wrap raw level entries, zeros included
    pub fn from_levels(levels: Vec<Hash>) -> Result<Self, MerkleError> {
        if levels.len() > MAX_LEVEL {
            return Err(MerkleError::LevelTooHigh(levels.len()));
        }
        Ok(Self { levels })
    }

    /// Rebuild an expansion from its compact form and the tree size it describes
    pub fn from_compact(compact: &[Hash], size: u64) -> Result<Self, MerkleError> {
        if compact.len() != size.count_ones() as usize {
            return Err(MerkleError::CompactLengthMismatch {
                expected: size.count_ones() as usize,
                actual: compact.len(),
            });
        }
        if size == 0 {
            return Ok(Self::new());
        }
        let top = most_significant_bit(size)? as usize;
        let mut levels = vec![ZERO_HASH; top + 1];
        let mut entries = compact.iter();
        for (level, slot) in levels.iter_mut().enumerate() {
            if size & (1u64 << level) != 0 {
                match entries.next() {
                    Some(entry) if *entry != ZERO_HASH => *slot = *entry,
                    _ => return Err(MerkleError::ZeroSubtreeRoot),
                }
            }
        }
        Ok(Self { levels })
    }

    /// Raw level entries, zeros included
    pub fn levels(&self) -> &[Hash] {
        &self.levels
    }

    /// Non-zero entries only, lowest level first
    pub fn compact(&self) -> Vec<Hash> {
        self.levels.iter().filter(|h| **h != ZERO_HASH).copied().collect()
    }

    /// Number of leaves in the tree
    pub fn size(&self) -> u64 {
        self.levels
            .iter()
            .enumerate()
            .filter(|(_, h)| **h != ZERO_HASH)
            .fold(0u64, |acc, (level, _)| acc.saturating_add(1u64 << level))
    }

    /// Whether no leaf has been appended yet
    pub fn is_empty(&self) -> bool {
        self.levels.iter().all(|h| *h == ZERO_HASH)
    }

    /// Append one leaf
    pub fn append_leaf(&mut self, leaf: &Hash) -> Result<(), MerkleError> {
        self.append_complete_subtree(0, Keccak256Hasher::hash_leaf(leaf))
    }

    /// Append the root of a complete subtree of `2^level` leaves.
    ///
    /// The current size must be a multiple of `2^level`.
    pub fn append_complete_subtree(&mut self, level: usize, subtree_root: Hash) -> Result<(), MerkleError> {
        if level >= MAX_LEVEL {
            return Err(MerkleError::LevelTooHigh(level));
        }
        if subtree_root == ZERO_HASH {
            return Err(MerkleError::ZeroSubtreeRoot);
        }
        if self.levels.iter().take(level).any(|h| *h != ZERO_HASH) {
            return Err(MerkleError::AppendAboveLeastSignificantBit { level });
        }
        if self.levels.len() <= level {
            self.levels.resize(level + 1, ZERO_HASH);
        }

        let mut accum = subtree_root;
        for slot in self.levels.iter_mut().skip(level) {
            if accum == ZERO_HASH {
                break;
            }
            if *slot == ZERO_HASH {
                *slot = accum;
                accum = ZERO_HASH;
            } else {
                accum = Keccak256Hasher::hash_pair(slot, &accum);
                *slot = ZERO_HASH;
            }
        }
        if accum != ZERO_HASH {
            if self.levels.len() >= MAX_LEVEL {
                return Err(MerkleError::LevelTooHigh(self.levels.len()));
            }
            self.levels.push(accum);
        }
        Ok(())
    }

    /// Root of the zero-padded tree the expansion describes
    pub fn root(&self) -> Result<Hash, MerkleError> {
        if self.is_empty() {
            return Err(MerkleError::EmptyExpansion);
        }
        let last = self.levels.len() - 1;
        let mut accum = ZERO_HASH;
        for (i, val) in self.levels.iter().enumerate() {
            if accum == ZERO_HASH {
                if *val != ZERO_HASH {
                    accum = *val;
                    if i != last {
                        accum = Keccak256Hasher::hash_pair(&accum, &ZERO_HASH);
                    }
                }
            } else if *val != ZERO_HASH {
                accum = Keccak256Hasher::hash_pair(val, &accum);
            } else {
                accum = Keccak256Hasher::hash_pair(&accum, &ZERO_HASH);
            }
        }
        Ok(accum)
    }
}
