//! History commitments over ordered state-hash leaves

use serde::{Deserialize, Serialize};

use crate::expansion::MerkleExpansion;
use crate::proof::InclusionProof;
use crate::{Hash, MerkleError};

/// Merkle commitment to an ordered sequence of state hashes.
///
/// `height` is the number of leaves minus one, so a commitment at height `h`
/// covers heights `0..=h`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryCommitment {
    /// Leaf count minus one
    pub height: u64,
    /// Root of the leaf expansion
    pub merkle: Hash,
    /// Leaf at height 0
    pub first_leaf: Hash,
    /// Leaf at `height`
    pub last_leaf: Hash,
    /// Inclusion proof of the first leaf
    pub first_leaf_proof: InclusionProof,
    /// Inclusion proof of the last leaf
    pub last_leaf_proof: InclusionProof,
}

impl HistoryCommitment {
    /// Commit to `leaves`
    pub fn new(leaves: &[Hash]) -> Result<Self, MerkleError> {
        let (first_leaf, last_leaf) = match (leaves.first(), leaves.last()) {
            (Some(first), Some(last)) => (*first, *last),
            _ => return Err(MerkleError::EmptyLeaves),
        };
        let height = leaves.len() as u64 - 1;
        let merkle = MerkleExpansion::from_leaves(leaves)?.root()?;
        Ok(Self {
            height,
            merkle,
            first_leaf,
            last_leaf,
            first_leaf_proof: InclusionProof::generate(leaves, 0)?,
            last_leaf_proof: InclusionProof::generate(leaves, height)?,
        })
    }

    /// Number of committed leaves
    pub const fn size(&self) -> u64 {
        self.height + 1
    }
}
