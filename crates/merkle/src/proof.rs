//! Inclusion and prefix proof generation and verification

use serde::{Deserialize, Serialize};

use crate::expansion::{maximum_append_between, MerkleExpansion};
use crate::hasher::Keccak256Hasher;
use crate::{Hash, MerkleError, ZERO_HASH};

/// Proof that a leaf sits at an index of a history tree.
///
/// Siblings are listed from the leaf level up to the root.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InclusionProof {
    /// Index of the proven leaf
    pub index: u64,
    /// Sibling hashes from leaf to root
    pub siblings: Vec<Hash>,
}

impl InclusionProof {
    /// Generate the proof for `leaves[index]`
    pub fn generate(leaves: &[Hash], index: u64) -> Result<Self, MerkleError> {
        if leaves.is_empty() {
            return Err(MerkleError::EmptyLeaves);
        }
        let len = leaves.len() as u64;
        if index >= len {
            return Err(MerkleError::IndexOutOfRange { index, len });
        }

        let mut layer: Vec<Hash> = leaves.iter().map(Keccak256Hasher::hash_leaf).collect();
        layer.resize(layer.len().next_power_of_two(), ZERO_HASH);

        let mut siblings = Vec::new();
        let mut position = index as usize;
        while layer.len() > 1 {
            siblings.push(layer[position ^ 1]);
            layer = layer
                .chunks(2)
                .map(|pair| Keccak256Hasher::hash_node(&pair[0], &pair[1]))
                .collect();
            position /= 2;
        }

        Ok(Self { index, siblings })
    }

    /// Root implied by the proof for `leaf`
    pub fn compute_root(&self, leaf: &Hash) -> Result<Hash, MerkleError> {
        if self.siblings.len() < 64 && self.index >> self.siblings.len() != 0 {
            return Err(MerkleError::IndexOutOfRange {
                index: self.index,
                len: 1u64 << self.siblings.len(),
            });
        }
        let mut current = Keccak256Hasher::hash_leaf(leaf);
        for (depth, sibling) in self.siblings.iter().enumerate() {
            let is_right = (self.index >> depth) & 1 == 1;
            current = if is_right {
                Keccak256Hasher::hash_node(sibling, &current)
            } else {
                Keccak256Hasher::hash_node(&current, sibling)
            };
        }
        Ok(current)
    }

    /// Verify the proof against a root
    pub fn verify(&self, root: &Hash, leaf: &Hash) -> bool {
        matches!(self.compute_root(leaf), Ok(computed) if computed == *root)
    }
}

/// Generate the raw proof that extends `expansion` (of `prefix_size` leaves) by `leaves`.
///
/// The result starts with the compact form of `expansion`, followed by the
/// complete subtree roots appended on the way to the full size.
pub fn generate_prefix_proof(
    prefix_size: u64,
    expansion: &MerkleExpansion,
    leaves: &[Hash],
) -> Result<Vec<Hash>, MerkleError> {
    if prefix_size == 0 {
        return Err(MerkleError::InvalidPrefixSizes { pre: 0, post: leaves.len() as u64 });
    }
    if leaves.is_empty() {
        return Err(MerkleError::EmptyLeaves);
    }
    if expansion.size() != prefix_size {
        return Err(MerkleError::PrefixSizeMismatch {
            expected: prefix_size,
            actual: expansion.size(),
        });
    }

    let post_size = prefix_size + leaves.len() as u64;
    let mut proof = expansion.compact();
    let mut size = prefix_size;
    while size < post_size {
        let level = maximum_append_between(size, post_size)?;
        let count = 1u64 << level;
        let start = (size - prefix_size) as usize;
        let end = start + count as usize;
        let subtree = MerkleExpansion::from_leaves(&leaves[start..end])?;
        proof.push(subtree.root()?);
        size += count;
    }
    Ok(proof)
}

/// Verify that a tree of `pre_size` leaves with root `pre_root` is a prefix of
/// the tree of `post_size` leaves with root `post_root`.
pub fn verify_prefix_proof(
    pre_root: &Hash,
    pre_size: u64,
    post_root: &Hash,
    post_size: u64,
    pre_expansion: &[Hash],
    proof: &[Hash],
) -> Result<(), MerkleError> {
    if pre_size == 0 || pre_size >= post_size {
        return Err(MerkleError::InvalidPrefixSizes { pre: pre_size, post: post_size });
    }
    let mut expansion = MerkleExpansion::from_levels(pre_expansion.to_vec())?;
    if expansion.root()? != *pre_root {
        return Err(MerkleError::PreRootMismatch);
    }
    if expansion.size() != pre_size {
        return Err(MerkleError::PrefixSizeMismatch {
            expected: pre_size,
            actual: expansion.size(),
        });
    }

    let mut size = pre_size;
    let mut proof_index = 0usize;
    while size < post_size {
        let level = maximum_append_between(size, post_size)?;
        let subtree_root = proof.get(proof_index).ok_or(MerkleError::ProofTooShort)?;
        expansion.append_complete_subtree(level as usize, *subtree_root)?;
        size += 1u64 << level;
        proof_index += 1;
    }

    if proof_index != proof.len() {
        return Err(MerkleError::ProofTooLong);
    }
    if expansion.root()? != *post_root {
        return Err(MerkleError::PostRootMismatch);
    }
    Ok(())
}

/// Prefix proof between two sizes of one leaf sequence, ready for submission
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrefixProof {
    /// Full expansion (zeros included) of the first `lo_size` leaves
    pub prefix_expansion: Vec<Hash>,
    /// Complete subtree roots extending the prefix to `hi_size` leaves
    pub proof: Vec<Hash>,
}

impl PrefixProof {
    /// Prove that `leaves[..lo_size]` is a prefix of `leaves[..hi_size]`
    pub fn generate(leaves: &[Hash], lo_size: u64, hi_size: u64) -> Result<Self, MerkleError> {
        if lo_size == 0 || lo_size >= hi_size {
            return Err(MerkleError::InvalidPrefixSizes { pre: lo_size, post: hi_size });
        }
        if hi_size > leaves.len() as u64 {
            return Err(MerkleError::IndexOutOfRange {
                index: hi_size - 1,
                len: leaves.len() as u64,
            });
        }
        let lo = lo_size as usize;
        let hi = hi_size as usize;
        let expansion = MerkleExpansion::from_leaves(&leaves[..lo])?;
        let raw = generate_prefix_proof(lo_size, &expansion, &leaves[lo..hi])?;
        let compact_len = lo_size.count_ones() as usize;
        Ok(Self {
            prefix_expansion: expansion.levels().to_vec(),
            proof: raw[compact_len..].to_vec(),
        })
    }

    /// Verify against both roots
    pub fn verify(
        &self,
        pre_root: &Hash,
        pre_size: u64,
        post_root: &Hash,
        post_size: u64,
    ) -> Result<(), MerkleError> {
        verify_prefix_proof(
            pre_root,
            pre_size,
            post_root,
            post_size,
            &self.prefix_expansion,
            &self.proof,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::Rng;

    fn random_leaves(n: usize) -> Vec<Hash> {
        let mut rng = rand::thread_rng();
        (0..n).map(|_| rng.gen::<[u8; 32]>()).collect()
    }

    fn root_of(leaves: &[Hash]) -> Hash {
        MerkleExpansion::from_leaves(leaves).unwrap().root().unwrap()
    }

    #[test]
    fn test_inclusion_proof_every_index() {
        for n in [1usize, 2, 3, 5, 8, 13] {
            let leaves = random_leaves(n);
            let root = root_of(&leaves);
            for (i, leaf) in leaves.iter().enumerate() {
                let proof = InclusionProof::generate(&leaves, i as u64).unwrap();
                assert!(proof.verify(&root, leaf), "n={} i={}", n, i);
                assert!(!proof.verify(&root, &[0xAB; 32]));
            }
        }
    }

    #[test]
    fn test_inclusion_proof_out_of_range() {
        let leaves = random_leaves(4);
        assert!(matches!(
            InclusionProof::generate(&leaves, 4),
            Err(MerkleError::IndexOutOfRange { index: 4, len: 4 })
        ));
    }

    #[test]
    fn test_prefix_proof_verifies_against_both_roots() {
        let leaves = random_leaves(17);
        for (lo, hi) in [(1u64, 2u64), (1, 17), (4, 7), (5, 8), (8, 16), (9, 17), (16, 17)] {
            let proof = PrefixProof::generate(&leaves, lo, hi).unwrap();
            let pre_root = root_of(&leaves[..lo as usize]);
            let post_root = root_of(&leaves[..hi as usize]);
            proof.verify(&pre_root, lo, &post_root, hi).unwrap();
        }
    }

    #[test]
    fn test_prefix_proof_rejects_other_history() {
        let leaves = random_leaves(8);
        let mut other = leaves.clone();
        other[6] = [0x11; 32];
        let proof = PrefixProof::generate(&leaves, 4, 8).unwrap();
        let pre_root = root_of(&leaves[..4]);
        let other_root = root_of(&other);
        assert!(matches!(
            proof.verify(&pre_root, 4, &other_root, 8),
            Err(MerkleError::PostRootMismatch)
        ));
        let wrong_pre = root_of(&other[..5]);
        assert!(proof.verify(&wrong_pre, 5, &other_root, 8).is_err());
    }

    #[test]
    fn test_prefix_proof_strips_compact_prefix() {
        let leaves = random_leaves(7);
        let expansion = MerkleExpansion::from_leaves(&leaves[..3]).unwrap();
        let raw = generate_prefix_proof(3, &expansion, &leaves[3..7]).unwrap();
        let proof = PrefixProof::generate(&leaves, 3, 7).unwrap();
        assert_eq!(raw.len(), proof.proof.len() + 2);
        assert_eq!(&raw[2..], proof.proof.as_slice());
    }

    #[test]
    fn test_prefix_proof_invalid_sizes() {
        let leaves = random_leaves(4);
        assert!(PrefixProof::generate(&leaves, 0, 2).is_err());
        assert!(PrefixProof::generate(&leaves, 3, 3).is_err());
        assert!(PrefixProof::generate(&leaves, 2, 5).is_err());
    }
}
