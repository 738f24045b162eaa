//! Challenges and challenge vertices

use serde::{Deserialize, Serialize};

use crate::levels::ChallengeType;
use crate::types::{hex_array, short_hex, Address, AssertionId, ChallengeId, ClaimId, Hash, Height, VertexId};

/// Vertex status
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum VertexStatus {
    /// Not yet confirmed
    Pending,
    /// Confirmed
    Confirmed,
}

/// Height and Merkle root of a vertex history
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct VertexCommitment {
    /// Leaf count minus one
    pub height: Height,
    /// Merkle root of the leaves
    #[serde(with = "hex_array")]
    pub merkle: Hash,
}

impl VertexCommitment {
    /// Shortened root for log lines
    pub fn short_merkle(&self) -> String {
        short_hex(&self.merkle)
    }
}

/// Node of a challenge's bisection tree
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChallengeVertex {
    /// Vertex id
    pub id: VertexId,
    /// Enclosing challenge
    pub challenge_id: ChallengeId,
    /// History commitment
    pub commitment: VertexCommitment,
    /// Predecessor, none for the challenge root
    pub prev: Option<VertexId>,
    /// Claim the vertex stands for, leaves only
    pub claim_id: Option<ClaimId>,
    /// Staker that created the vertex
    #[serde(with = "hex_array")]
    pub staker: Address,
    /// Status
    pub status: VertexStatus,
    /// Current presumptive successor among the children
    pub ps_id: Option<VertexId>,
    /// Ledger time the presumptive successor last changed
    pub ps_last_updated: u64,
    /// Presumptive-successor time accumulated before the last change
    pub flushed_ps_time: u64,
    /// Succession challenge opened at this vertex
    pub sub_challenge: Option<ChallengeId>,
}

impl ChallengeVertex {
    /// Whether the vertex is a leaf (stands for a claim)
    pub const fn is_leaf(&self) -> bool {
        self.claim_id.is_some()
    }

    /// Whether the vertex is the challenge root
    pub const fn is_root(&self) -> bool {
        self.prev.is_none()
    }

    /// Whether the vertex is confirmed
    pub fn is_confirmed(&self) -> bool {
        self.status == VertexStatus::Confirmed
    }

    /// Vertex height
    pub const fn height(&self) -> Height {
        self.commitment.height
    }
}

/// What a challenge disputes
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ChallengeParent {
    /// Block challenge over the children of an assertion
    Assertion {
        /// Parent assertion id
        id: AssertionId,
        /// Parent assertion sequence number
        seq: u64,
    },
    /// Succession challenge over the children of a one-step fork
    Vertex(VertexId),
}

impl ChallengeParent {
    /// Raw parent id the challenge id is derived from
    pub const fn id_bytes(&self) -> &Hash {
        match self {
            Self::Assertion { id, .. } => id.as_bytes(),
            Self::Vertex(id) => id.as_bytes(),
        }
    }
}

/// Open or completed dispute
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Challenge {
    /// Challenge id
    pub id: ChallengeId,
    /// Level index, 0 is the block level
    pub level: usize,
    /// Granularity
    pub challenge_type: ChallengeType,
    /// What is disputed
    pub parent: ChallengeParent,
    /// Root vertex, confirmed at creation
    pub root_vertex: VertexId,
    /// State every leaf history must start from, when the ledger knows it
    #[serde(default, with = "option_hash")]
    pub root_state: Option<Hash>,
    /// Height of the root state at the block level
    pub root_height: Height,
    /// Winning claim once completed
    pub winning_claim: Option<ClaimId>,
    /// Staker that opened the challenge
    #[serde(with = "hex_array")]
    pub challenger: Address,
    /// Ledger time of creation, in seconds
    pub created_at: u64,
}

impl Challenge {
    /// Whether a winner has been declared
    pub const fn completed(&self) -> bool {
        self.winning_claim.is_some()
    }
}

mod option_hash {
    use serde::{Deserialize, Deserializer, Serializer};

    use crate::types::{parse_hex_array, Hash};

    pub(super) fn serialize<S: Serializer>(hash: &Option<Hash>, s: S) -> Result<S::Ok, S::Error> {
        match hash {
            Some(h) => s.serialize_some(&format!("0x{}", hex::encode(h))),
            None => s.serialize_none(),
        }
    }

    pub(super) fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Option<Hash>, D::Error> {
        Option::<String>::deserialize(d)?
            .map(|s| parse_hex_array(&s).map_err(serde::de::Error::custom))
            .transpose()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_challenge_json_round_trip() {
        let challenge = Challenge {
            id: ChallengeId([1u8; 32]),
            level: 1,
            challenge_type: ChallengeType::BigStep,
            parent: ChallengeParent::Vertex(VertexId([2u8; 32])),
            root_vertex: VertexId([3u8; 32]),
            root_state: None,
            root_height: 12,
            winning_claim: None,
            challenger: [4u8; 20],
            created_at: 99,
        };
        let json = serde_json::to_string(&challenge).unwrap();
        let back: Challenge = serde_json::from_str(&json).unwrap();
        assert_eq!(back, challenge);
        assert!(!back.completed());

        let with_state = Challenge {
            root_state: Some([5u8; 32]),
            ..challenge
        };
        let json = serde_json::to_string(&with_state).unwrap();
        let back: Challenge = serde_json::from_str(&json).unwrap();
        assert_eq!(back.root_state, Some([5u8; 32]));
    }
}
