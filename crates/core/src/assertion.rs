//! Assertions

use serde::{Deserialize, Serialize};

use crate::types::{hex_array, Address, AssertionId, Hash, Height};

/// Assertion status on the ledger
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssertionStatus {
    /// Awaiting confirmation
    Pending,
    /// Confirmed, either unchallenged or by winning a block challenge
    Confirmed,
}

/// Claimed state after executing up to `height` messages
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Assertion {
    /// Creation order on the ledger, genesis is 0
    pub seq: u64,
    /// Content id
    pub id: AssertionId,
    /// Predecessor sequence number, none for genesis
    pub prev_seq: Option<u64>,
    /// Message count the state is claimed at
    pub height: Height,
    /// Block-level leaf at `height`
    #[serde(with = "hex_array")]
    pub state_hash: Hash,
    /// Creator
    #[serde(with = "hex_array")]
    pub staker: Address,
    /// Ledger status
    pub status: AssertionStatus,
    /// Ledger time of creation, in seconds
    pub created_at: u64,
}

impl Assertion {
    /// Whether this is the genesis assertion
    pub const fn is_genesis(&self) -> bool {
        self.prev_seq.is_none()
    }

    /// Height and state hash
    pub const fn commitment(&self) -> StateCommitment {
        StateCommitment {
            height: self.height,
            state_hash: self.state_hash,
        }
    }
}

/// Height and state hash of a claimed state
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateCommitment {
    /// Message count
    pub height: Height,
    /// Block-level leaf at `height`
    #[serde(with = "hex_array")]
    pub state_hash: Hash,
}
