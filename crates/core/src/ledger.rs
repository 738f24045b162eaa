//! Ledger interface
//!
//! The ledger stores assertions, challenges and vertices and enforces the
//! rules of the game. Every write is a submission: callers read the outcome
//! back through the query surface instead of assuming finality.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::assertion::Assertion;
use crate::challenge::{Challenge, ChallengeParent, ChallengeVertex};
use crate::error::LedgerResult;
use crate::levels::ChallengeLevels;
use crate::types::{hex_array, hex_bytes, hex_hashes, Address, AssertionId, ChallengeId, ClaimId, Hash, Height, VertexId};

/// Leaf submission into a challenge
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddLeafArgs {
    /// Challenge the leaf joins
    pub challenge_id: ChallengeId,
    /// Claim the leaf stands for
    pub claim_id: ClaimId,
    /// Leaf height
    pub height: Height,
    /// Merkle root of the leaf history
    #[serde(with = "hex_array")]
    pub history_root: Hash,
    /// Leaf at height 0
    #[serde(with = "hex_array")]
    pub first_state: Hash,
    /// Inclusion proof of `first_state` at index 0
    #[serde(with = "hex_hashes")]
    pub first_state_proof: Vec<Hash>,
    /// Leaf at `height`
    #[serde(with = "hex_array")]
    pub last_state: Hash,
    /// Inclusion proof of `last_state` at index `height`
    #[serde(with = "hex_hashes")]
    pub last_state_proof: Vec<Hash>,
}

/// One-step proof submission for a small-step fork
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct OneStepData {
    /// Machine hash before the step
    #[serde(with = "hex_array")]
    pub before_state: Hash,
    /// Inclusion proof of `before_state` in the vertex history
    #[serde(with = "hex_hashes")]
    pub before_state_proof: Vec<Hash>,
    /// Machine hash after the step
    #[serde(with = "hex_array")]
    pub after_state: Hash,
    /// Inclusion proof of `after_state` in the vertex history
    #[serde(with = "hex_hashes")]
    pub after_state_proof: Vec<Hash>,
    /// Machine proof consumed by the verifier
    #[serde(with = "hex_bytes")]
    pub proof: Vec<u8>,
}

/// Append-only event log entries
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ProtocolEvent {
    /// New assertion
    AssertionCreated {
        /// Sequence number
        seq: u64,
        /// Assertion id
        id: AssertionId,
        /// Predecessor sequence number
        prev_seq: Option<u64>,
        /// Claimed height
        height: Height,
        /// Claimed state
        #[serde(with = "hex_array")]
        state_hash: Hash,
        /// Creator
        #[serde(with = "hex_array")]
        staker: Address,
    },
    /// New challenge
    ChallengeStarted {
        /// Challenge id
        challenge_id: ChallengeId,
        /// Level index
        level: usize,
        /// What is disputed
        parent: ChallengeParent,
        /// Creator
        #[serde(with = "hex_array")]
        challenger: Address,
    },
    /// New vertex from a leaf, bisection or merge target
    VertexAdded {
        /// Enclosing challenge
        challenge_id: ChallengeId,
        /// Vertex id
        vertex_id: VertexId,
        /// Vertex height
        height: Height,
        /// Creator
        #[serde(with = "hex_array")]
        staker: Address,
    },
    /// Vertex confirmed
    VertexConfirmed {
        /// Enclosing challenge
        challenge_id: ChallengeId,
        /// Vertex id
        vertex_id: VertexId,
    },
    /// One-step proof accepted for a small-step vertex
    OneStepProven {
        /// Enclosing challenge
        challenge_id: ChallengeId,
        /// Vertex confirmed by the proof
        vertex_id: VertexId,
    },
    /// Challenge won
    ChallengeCompleted {
        /// Challenge id
        challenge_id: ChallengeId,
        /// Winning claim
        winner: ClaimId,
    },
}

/// Ledger interface consumed by the challenge engine
#[async_trait]
pub trait Ledger: Send + Sync {
    /// Address moves are submitted from
    fn staker(&self) -> Address;

    /// Level layout the ledger enforces
    async fn levels(&self) -> LedgerResult<ChallengeLevels>;

    /// Presumptive-successor time needed for confirmation
    async fn challenge_period_seconds(&self) -> LedgerResult<u64>;

    /// Events with index `cursor` and above
    async fn events_since(&self, cursor: u64) -> LedgerResult<Vec<ProtocolEvent>>;

    /// Latest confirmed assertion
    async fn latest_confirmed(&self) -> LedgerResult<Assertion>;

    /// Number of assertions, genesis included
    async fn num_assertions(&self) -> LedgerResult<u64>;

    /// Assertion by sequence number
    async fn get_assertion(&self, seq: u64) -> LedgerResult<Option<Assertion>>;

    /// Create an assertion on top of `prev_seq`
    async fn create_assertion(&self, prev_seq: u64, height: Height, state_hash: Hash) -> LedgerResult<Assertion>;

    /// Open the block challenge over the children of `parent_seq`
    async fn create_succession_challenge(&self, parent_seq: u64) -> LedgerResult<Challenge>;

    /// Open a finer challenge at a one-step fork `vertex`
    async fn create_sub_challenge(&self, vertex: VertexId) -> LedgerResult<Challenge>;

    /// Challenge by id
    async fn get_challenge(&self, id: ChallengeId) -> LedgerResult<Option<Challenge>>;

    /// Vertex by id
    async fn get_vertex(&self, id: VertexId) -> LedgerResult<Option<ChallengeVertex>>;

    /// Id a vertex with this history would get in `challenge`
    async fn calculate_challenge_vertex_id(
        &self,
        challenge: ChallengeId,
        height: Height,
        merkle: Hash,
    ) -> LedgerResult<VertexId> {
        Ok(VertexId::compute(&challenge, &merkle, height))
    }

    /// Add a leaf for a claim
    async fn add_leaf(&self, args: AddLeafArgs) -> LedgerResult<VertexId>;

    /// Bisect `vertex` to the history prefix `prefix_history_root`
    async fn bisect(&self, vertex: VertexId, prefix_history_root: Hash, prefix_proof: Vec<u8>) -> LedgerResult<VertexId>;

    /// Merge `vertex` into the existing vertex with history prefix `prefix_history_root`
    async fn merge(&self, vertex: VertexId, prefix_history_root: Hash, prefix_proof: Vec<u8>) -> LedgerResult<VertexId>;

    /// Whether the children of `vertex` are all one step above it
    async fn children_are_at_one_step_fork(&self, vertex: VertexId) -> LedgerResult<bool>;

    /// Whether `vertex` is the presumptive successor of its predecessor
    async fn is_presumptive_successor(&self, vertex: VertexId) -> LedgerResult<bool>;

    /// Whether another child of the predecessor of `vertex` is confirmed
    async fn has_confirmed_sibling(&self, vertex: VertexId) -> LedgerResult<bool>;

    /// Presumptive-successor time accumulated by `vertex`
    async fn ps_timer(&self, vertex: VertexId) -> LedgerResult<u64>;

    /// Confirm `vertex` by its presumptive-successor timer
    async fn confirm_for_ps_timer(&self, vertex: VertexId) -> LedgerResult<()>;

    /// Confirm `vertex` after it won the succession challenge at its predecessor
    async fn confirm_for_succession_challenge_win(&self, vertex: VertexId) -> LedgerResult<()>;

    /// Settle a small-step fork by executing one step
    async fn execute_one_step(&self, vertex: VertexId, data: OneStepData) -> LedgerResult<()>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_tagging() {
        let event = ProtocolEvent::VertexConfirmed {
            challenge_id: ChallengeId([1u8; 32]),
            vertex_id: VertexId([2u8; 32]),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "VertexConfirmed");
        let back: ProtocolEvent = serde_json::from_value(json).unwrap();
        assert_eq!(back, event);
    }
}
