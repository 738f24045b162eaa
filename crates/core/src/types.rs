//! Common types

use std::fmt;

use serde::{Deserialize, Serialize};
use xlayer_merkle::Keccak256Hasher;

/// 32-byte hash type
pub type Hash = [u8; 32];

/// Height within a history (block number or step count)
pub type Height = u64;

/// Staker address
pub type Address = [u8; 20];

/// `0x`-prefixed first four bytes, for log lines
pub fn short_hex(hash: &Hash) -> String {
    format!("0x{}", hex::encode(&hash[..4]))
}

/// Parse a `0x`-prefixed or bare hex string into a fixed-size array
pub fn parse_hex_array<const N: usize>(s: &str) -> Result<[u8; N], String> {
    let bytes = hex::decode(s.trim_start_matches("0x")).map_err(|e| e.to_string())?;
    bytes
        .try_into()
        .map_err(|b: Vec<u8>| format!("expected {} bytes, got {}", N, b.len()))
}

/// Serde helpers rendering fixed-size byte arrays as `0x` hex
pub mod hex_array {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `0x` hex
    pub fn serialize<S: Serializer, const N: usize>(bytes: &[u8; N], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    /// Deserialize from `0x` hex
    pub fn deserialize<'de, D: Deserializer<'de>, const N: usize>(d: D) -> Result<[u8; N], D::Error> {
        let s = String::deserialize(d)?;
        super::parse_hex_array(&s).map_err(serde::de::Error::custom)
    }
}

/// Serde helpers rendering hash lists as `0x` hex strings
pub mod hex_hashes {
    use serde::{Deserialize, Deserializer, Serializer};

    use super::Hash;

    /// Serialize as a list of `0x` hex strings
    pub fn serialize<S: Serializer>(hashes: &[Hash], s: S) -> Result<S::Ok, S::Error> {
        s.collect_seq(hashes.iter().map(|h| format!("0x{}", hex::encode(h))))
    }

    /// Deserialize from a list of `0x` hex strings
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<Hash>, D::Error> {
        let raw = Vec::<String>::deserialize(d)?;
        raw.iter()
            .map(|s| super::parse_hex_array(s).map_err(serde::de::Error::custom))
            .collect()
    }
}

/// Serde helpers rendering byte strings as `0x` hex
pub mod hex_bytes {
    use serde::{Deserialize, Deserializer, Serializer};

    /// Serialize as `0x` hex
    pub fn serialize<S: Serializer>(bytes: &[u8], s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&format!("0x{}", hex::encode(bytes)))
    }

    /// Deserialize from `0x` hex
    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Vec<u8>, D::Error> {
        let s = String::deserialize(d)?;
        hex::decode(s.trim_start_matches("0x")).map_err(serde::de::Error::custom)
    }
}

macro_rules! hash_id {
    ($(#[$doc:meta])* $name:ident) => {
        $(#[$doc])*
        #[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
        pub struct $name(#[serde(with = "crate::types::hex_array")] pub Hash);

        impl $name {
            /// Raw bytes
            pub const fn as_bytes(&self) -> &Hash {
                &self.0
            }

            /// Shortened form for log lines
            pub fn short(&self) -> String {
                short_hex(&self.0)
            }
        }

        impl From<Hash> for $name {
            fn from(hash: Hash) -> Self {
                Self(hash)
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "0x{}", hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self.short())
            }
        }
    };
}

hash_id!(
    /// Assertion id: keccak(prev id, height, state hash)
    AssertionId
);
hash_id!(
    /// Challenge id: keccak(parent id, level)
    ChallengeId
);
hash_id!(
    /// Vertex id: keccak(challenge id, merkle root, height)
    VertexId
);
hash_id!(
    /// Id of the claim a leaf vertex stands for: an assertion at the block
    /// level, a vertex of the enclosing challenge below it
    ClaimId
);

impl AssertionId {
    /// Compute the id of an assertion
    pub fn compute(prev: Option<&Self>, height: Height, state_hash: &Hash) -> Self {
        let height = height.to_be_bytes();
        let id = match prev {
            Some(prev) => Keccak256Hasher::hash_parts(&[&[1u8], &prev.0, &height, state_hash]),
            None => Keccak256Hasher::hash_parts(&[&[0u8], &height, state_hash]),
        };
        Self(id)
    }
}

impl ChallengeId {
    /// Compute the id of a challenge from its parent (assertion or vertex) and level
    pub fn compute(parent: &Hash, level: usize) -> Self {
        Self(Keccak256Hasher::hash_parts(&[parent, &(level as u64).to_be_bytes()]))
    }
}

impl VertexId {
    /// Compute the id of a vertex from its challenge and history commitment
    pub fn compute(challenge: &ChallengeId, merkle: &Hash, height: Height) -> Self {
        Self(Keccak256Hasher::hash_parts(&[&challenge.0, merkle, &height.to_be_bytes()]))
    }
}

impl From<AssertionId> for ClaimId {
    fn from(id: AssertionId) -> Self {
        Self(id.0)
    }
}

impl From<VertexId> for ClaimId {
    fn from(id: VertexId) -> Self {
        Self(id.0)
    }
}
