//! Append-only Merkle history trees for the challenge protocol
//!
//! This crate provides the commitment scheme both parties of a dispute use:
//! - Expansions: compact multi-root form of an append-only tree
//! - Prefix proofs: one history is a prefix of another
//! - Inclusion proofs: a leaf sits at an index of a history
//! - History commitments: root and endpoints of an ordered leaf sequence

mod expansion;
mod hasher;
mod history;
mod proof;

pub use expansion::{least_significant_bit, maximum_append_between, most_significant_bit, MerkleExpansion};
pub use hasher::Keccak256Hasher;
pub use history::HistoryCommitment;
pub use proof::{generate_prefix_proof, verify_prefix_proof, InclusionProof, PrefixProof};

/// 32-byte hash type
pub type Hash = [u8; 32];

/// Empty subtree marker
pub const ZERO_HASH: Hash = [0u8; 32];

/// Maximum number of levels in an expansion
pub const MAX_LEVEL: usize = 64;

/// Merkle errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MerkleError {
    /// No leaves to commit to
    #[error("empty leaf sequence")]
    EmptyLeaves,
    /// Root of an empty expansion was requested
    #[error("empty merkle expansion")]
    EmptyExpansion,
    /// Expansion level out of bounds
    #[error("level {0} exceeds the maximum expansion level")]
    LevelTooHigh(usize),
    /// Subtree roots are never zero
    #[error("subtree root cannot be zero")]
    ZeroSubtreeRoot,
    /// Appended subtree is not aligned with the current size
    #[error("cannot append at level {level}: lower levels are occupied")]
    AppendAboveLeastSignificantBit {
        /// Requested level
        level: usize,
    },
    /// Bit helpers called with zero
    #[error("zero has no significant bit")]
    ZeroHasNoSignificantBit,
    /// Append window is empty
    #[error("start {start} not less than end {end}")]
    StartNotLessThanEnd {
        /// Start size
        start: u64,
        /// End size
        end: u64,
    },
    /// Compact form does not match the tree size
    #[error("compact expansion has {actual} entries, size requires {expected}")]
    CompactLengthMismatch {
        /// Entries required by the size
        expected: usize,
        /// Entries given
        actual: usize,
    },
    /// Leaf index out of range
    #[error("index {index} out of range for {len} leaves")]
    IndexOutOfRange {
        /// Requested index
        index: u64,
        /// Number of leaves
        len: u64,
    },
    /// Prefix sizes must satisfy `0 < pre < post`
    #[error("invalid prefix sizes: pre {pre}, post {post}")]
    InvalidPrefixSizes {
        /// Prefix size
        pre: u64,
        /// Full size
        post: u64,
    },
    /// Expansion size does not match the claimed prefix size
    #[error("expansion holds {actual} leaves, expected {expected}")]
    PrefixSizeMismatch {
        /// Claimed size
        expected: u64,
        /// Actual size
        actual: u64,
    },
    /// Prefix expansion does not hash to the prefix root
    #[error("prefix expansion does not match the prefix root")]
    PreRootMismatch,
    /// Extended expansion does not hash to the full root
    #[error("extended expansion does not match the full root")]
    PostRootMismatch,
    /// Proof ran out of subtree roots
    #[error("prefix proof too short")]
    ProofTooShort,
    /// Proof has unused subtree roots
    #[error("prefix proof too long")]
    ProofTooLong,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_expansion_root_matches_padded_tree() {
        for n in 1u8..=17 {
            let leaves: Vec<Hash> = (0..n).map(|i| [i + 1; 32]).collect();
            let root = MerkleExpansion::from_leaves(&leaves).unwrap().root().unwrap();
            let last = leaves.len() as u64 - 1;
            let proof = InclusionProof::generate(&leaves, last).unwrap();
            assert_eq!(proof.compute_root(&leaves[last as usize]).unwrap(), root, "n={}", n);
        }
    }

    #[test]
    fn test_commitment_prefix_consistency() {
        let leaves: Vec<Hash> = (0u8..12).map(|i| [i + 1; 32]).collect();
        let full = HistoryCommitment::new(&leaves).unwrap();
        let prefix = HistoryCommitment::new(&leaves[..7]).unwrap();
        let proof = PrefixProof::generate(&leaves, 7, 12).unwrap();
        proof.verify(&prefix.merkle, prefix.size(), &full.merkle, full.size()).unwrap();
    }
}
