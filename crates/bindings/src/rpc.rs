//! JSON-RPC surface of the ledger node
//!
//! Method names and parameter records shared by the node router and the
//! RPC ledger client. Protocol errors travel inside the JSON-RPC error
//! object so the client can rebuild the exact variant.

use serde::{Deserialize, Serialize};
use xlayer_core::{hex_array, hex_bytes, AddLeafArgs, Address, ChallengeId, Hash, Height, OneStepData, ProtocolError, VertexId};

/// Method names
pub mod methods {
    /// Level layout
    pub const LEVELS: &str = "bold_levels";
    /// Challenge period in seconds
    pub const CHALLENGE_PERIOD_SECONDS: &str = "bold_challengePeriodSeconds";
    /// Events from a cursor
    pub const EVENTS_SINCE: &str = "bold_eventsSince";
    /// Latest confirmed assertion
    pub const LATEST_CONFIRMED: &str = "bold_latestConfirmed";
    /// Number of assertions
    pub const NUM_ASSERTIONS: &str = "bold_numAssertions";
    /// Assertion by sequence number
    pub const GET_ASSERTION: &str = "bold_getAssertion";
    /// New assertion
    pub const CREATE_ASSERTION: &str = "bold_createAssertion";
    /// New block challenge
    pub const CREATE_SUCCESSION_CHALLENGE: &str = "bold_createSuccessionChallenge";
    /// New sub-challenge
    pub const CREATE_SUB_CHALLENGE: &str = "bold_createSubChallenge";
    /// Challenge by id
    pub const GET_CHALLENGE: &str = "bold_getChallenge";
    /// Vertex by id
    pub const GET_VERTEX: &str = "bold_getVertex";
    /// New leaf
    pub const ADD_LEAF: &str = "bold_addLeaf";
    /// Bisection move
    pub const BISECT: &str = "bold_bisect";
    /// Merge move
    pub const MERGE: &str = "bold_merge";
    /// One-step fork query
    pub const CHILDREN_ARE_AT_ONE_STEP_FORK: &str = "bold_childrenAreAtOneStepFork";
    /// Presumptive successor query
    pub const IS_PRESUMPTIVE_SUCCESSOR: &str = "bold_isPresumptiveSuccessor";
    /// Confirmed sibling query
    pub const HAS_CONFIRMED_SIBLING: &str = "bold_hasConfirmedSibling";
    /// Presumptive successor timer
    pub const PS_TIMER: &str = "bold_psTimer";
    /// Confirmation by timer
    pub const CONFIRM_FOR_PS_TIMER: &str = "bold_confirmForPsTimer";
    /// Confirmation by sub-challenge win
    pub const CONFIRM_FOR_SUCCESSION_CHALLENGE_WIN: &str = "bold_confirmForSuccessionChallengeWin";
    /// One-step proof
    pub const EXECUTE_ONE_STEP: &str = "bold_executeOneStep";
}

/// JSON-RPC error code for protocol rule violations
pub const PROTOCOL_ERROR_CODE: i64 = -32000;
/// JSON-RPC error code for unknown methods
pub const METHOD_NOT_FOUND_CODE: i64 = -32601;
/// JSON-RPC error code for malformed parameters
pub const INVALID_PARAMS_CODE: i64 = -32602;
/// JSON-RPC error code for results that fail to encode
pub const INTERNAL_ERROR_CODE: i64 = -32603;

/// JSON-RPC request
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcRequest {
    /// Protocol version
    #[serde(default)]
    pub jsonrpc: String,
    /// Method name
    pub method: String,
    /// Parameters
    #[serde(default)]
    pub params: serde_json::Value,
    /// Request id
    #[serde(default)]
    pub id: serde_json::Value,
}

impl RpcRequest {
    /// Build a request
    pub fn new(method: &str, params: serde_json::Value, id: u64) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            method: method.to_string(),
            params,
            id: serde_json::json!(id),
        }
    }
}

/// JSON-RPC error object
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcError {
    /// Error code
    pub code: i64,
    /// Message
    pub message: String,
    /// Protocol error, when the ledger rejected the call
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<ProtocolError>,
}

impl RpcError {
    /// Wrap a protocol error
    pub fn protocol(err: ProtocolError) -> Self {
        Self {
            code: PROTOCOL_ERROR_CODE,
            message: err.to_string(),
            data: Some(err),
        }
    }

    /// Protocol error carried by this response, or a transport error
    pub fn into_protocol_error(self) -> ProtocolError {
        match self.data {
            Some(err) => err,
            None => ProtocolError::Transport(format!("rpc error {}: {}", self.code, self.message)),
        }
    }
}

/// JSON-RPC response
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RpcResponse {
    /// Protocol version
    pub jsonrpc: String,
    /// Result on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<serde_json::Value>,
    /// Error on failure
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<RpcError>,
    /// Request id
    #[serde(default)]
    pub id: serde_json::Value,
}

impl RpcResponse {
    /// Successful response
    pub fn success(id: serde_json::Value, result: serde_json::Value) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: Some(result),
            error: None,
            id,
        }
    }

    /// Failed response
    pub fn failure(id: serde_json::Value, error: RpcError) -> Self {
        Self {
            jsonrpc: "2.0".to_string(),
            result: None,
            error: Some(error),
            id,
        }
    }
}

/// `{ cursor }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CursorParams {
    /// First event index
    pub cursor: u64,
}

/// `{ seq }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SeqParams {
    /// Assertion sequence number
    pub seq: u64,
}

/// `{ id }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChallengeParams {
    /// Challenge id
    pub id: ChallengeId,
}

/// `{ vertex }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct VertexParams {
    /// Vertex id
    pub vertex: VertexId,
}

/// `{ from, vertex }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderVertexParams {
    /// Submitting staker
    #[serde(with = "hex_array")]
    pub from: Address,
    /// Vertex id
    pub vertex: VertexId,
}

/// `{ from, seq }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SenderSeqParams {
    /// Submitting staker
    #[serde(with = "hex_array")]
    pub from: Address,
    /// Assertion sequence number
    pub seq: u64,
}

/// `{ from, prev_seq, height, state_hash }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CreateAssertionParams {
    /// Submitting staker
    #[serde(with = "hex_array")]
    pub from: Address,
    /// Predecessor sequence number
    pub prev_seq: u64,
    /// Claimed height
    pub height: Height,
    /// Claimed state
    #[serde(with = "hex_array")]
    pub state_hash: Hash,
}

/// `{ from, args }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct AddLeafParams {
    /// Submitting staker
    #[serde(with = "hex_array")]
    pub from: Address,
    /// Leaf
    pub args: AddLeafArgs,
}

/// `{ from, vertex, prefix_history_root, prefix_proof }` for bisect and merge
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PrefixMoveParams {
    /// Submitting staker
    #[serde(with = "hex_array")]
    pub from: Address,
    /// Moving vertex
    pub vertex: VertexId,
    /// Root of the prefix history
    #[serde(with = "hex_array")]
    pub prefix_history_root: Hash,
    /// ABI-encoded prefix proof
    #[serde(with = "hex_bytes")]
    pub prefix_proof: Vec<u8>,
}

/// `{ from, vertex, data }`
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct OneStepParams {
    /// Submitting staker
    #[serde(with = "hex_array")]
    pub from: Address,
    /// Vertex at the small-step fork
    pub vertex: VertexId,
    /// Proof data
    pub data: OneStepData,
}
