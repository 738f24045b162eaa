//! Ledger bindings
//!
//! Interface types for talking to the ledger, defined manually:
//! - ABI encoding of the prefix-proof tuple consumed by bisect and merge
//! - The JSON-RPC method surface of the ledger node

pub mod abi;
pub mod rpc;

use serde::{Deserialize, Serialize};
use xlayer_core::Hash;

pub use abi::AbiError;

/// Prefix proof arguments: `(bytes32[] prefixExpansion, bytes32[] prefixProof)`
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProofArgs {
    /// Expansion of the prefix history, zero entries included
    pub prefix_expansion: Vec<Hash>,
    /// Complete subtree roots extending the prefix
    pub prefix_proof: Vec<Hash>,
}

impl ProofArgs {
    /// ABI-encode the tuple
    pub fn encode(&self) -> Vec<u8> {
        abi::encode_hash_arrays(&[self.prefix_expansion.as_slice(), self.prefix_proof.as_slice()])
    }

    /// Decode an ABI-encoded tuple
    pub fn decode(data: &[u8]) -> Result<Self, AbiError> {
        let mut arrays = abi::decode_hash_arrays(data, 2)?.into_iter();
        let prefix_expansion = arrays.next().unwrap_or_default();
        let prefix_proof = arrays.next().unwrap_or_default();
        Ok(Self {
            prefix_expansion,
            prefix_proof,
        })
    }
}
