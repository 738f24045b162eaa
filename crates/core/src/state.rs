//! Rollup global state and block-level leaves

use serde::{Deserialize, Serialize};
use xlayer_merkle::Keccak256Hasher;

use crate::types::{hex_array, Hash};

/// Global state of the rollup after executing some number of messages
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GlobalState {
    /// L2 block hash
    #[serde(with = "hex_array")]
    pub block_hash: Hash,
    /// Outbox send root
    #[serde(with = "hex_array")]
    pub send_root: Hash,
    /// Inbox batch being read
    pub batch: u64,
    /// Position within the batch
    pub pos_in_batch: u64,
}

impl GlobalState {
    /// Hash of the global state
    pub fn hash(&self) -> Hash {
        Keccak256Hasher::hash_parts(&[
            b"Global state:",
            &self.block_hash,
            &self.send_root,
            &self.batch.to_be_bytes(),
            &self.pos_in_batch.to_be_bytes(),
        ])
    }

    /// Block-level history leaf for this state
    pub fn machine_finished_hash(&self) -> Hash {
        machine_finished_hash(&self.hash())
    }
}

/// Hash of a finished machine whose global state hashes to `global_state_hash`
pub fn machine_finished_hash(global_state_hash: &Hash) -> Hash {
    Keccak256Hasher::hash_parts(&[b"Machine finished:", global_state_hash])
}
