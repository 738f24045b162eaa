//! Keccak256 hasher for history trees

use tiny_keccak::{Hasher, Keccak};

use crate::{Hash, ZERO_HASH};

/// Keccak256 hasher
#[derive(Debug, Clone, Copy)]
pub struct Keccak256Hasher;

impl Keccak256Hasher {
    /// Hash two 32-byte values together
    pub fn hash_pair(left: &Hash, right: &Hash) -> Hash {
        let mut hasher = Keccak::v256();
        hasher.update(left);
        hasher.update(right);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }

    /// Hash a single value
    pub fn hash(data: &[u8]) -> Hash {
        let mut hasher = Keccak::v256();
        hasher.update(data);
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }

    /// Hash the concatenation of several byte slices
    pub fn hash_parts(parts: &[&[u8]]) -> Hash {
        let mut hasher = Keccak::v256();
        for part in parts {
            hasher.update(part);
        }
        let mut output = [0u8; 32];
        hasher.finalize(&mut output);
        output
    }

    /// Hash a history leaf into its level-0 tree node
    pub fn hash_leaf(leaf: &Hash) -> Hash {
        Self::hash(leaf)
    }

    /// Parent of two nodes in a zero-padded tree. Two empty children stay empty.
    pub fn hash_node(left: &Hash, right: &Hash) -> Hash {
        if *left == ZERO_HASH && *right == ZERO_HASH {
            return ZERO_HASH;
        }
        Self::hash_pair(left, right)
    }
}
