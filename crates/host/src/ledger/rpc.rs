//! Ledger client over JSON-RPC

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use xlayer_bindings::rpc::{
    methods, AddLeafParams, ChallengeParams, CreateAssertionParams, CursorParams, OneStepParams, PrefixMoveParams,
    RpcRequest, RpcResponse, SenderSeqParams, SenderVertexParams, SeqParams, VertexParams,
};
use xlayer_core::{
    AddLeafArgs, Address, Assertion, Challenge, ChallengeId, ChallengeLevels, ChallengeVertex, Hash, Height, Ledger,
    LedgerResult, OneStepData, ProtocolError, ProtocolEvent, VertexId,
};

fn transport(e: impl std::fmt::Display) -> ProtocolError {
    ProtocolError::Transport(e.to_string())
}

/// Ledger reached through a node's JSON-RPC endpoint
#[derive(Debug)]
pub struct RpcLedger {
    url: String,
    staker: Address,
    http_client: reqwest::Client,
    next_id: AtomicU64,
}

impl RpcLedger {
    /// Client for the node at `url`, submitting as `staker`
    pub fn new(url: impl Into<String>, staker: Address) -> Self {
        Self {
            url: url.into(),
            staker,
            http_client: reqwest::Client::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Call RPC
    async fn call<P: Serialize + Send, R: DeserializeOwned>(&self, method: &str, params: P) -> LedgerResult<R> {
        let params = serde_json::to_value(params).map_err(transport)?;
        let request = RpcRequest::new(method, params, self.next_id.fetch_add(1, Ordering::Relaxed));

        let response = self
            .http_client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(transport)?
            .json::<RpcResponse>()
            .await
            .map_err(transport)?;

        if let Some(error) = response.error {
            return Err(error.into_protocol_error());
        }
        serde_json::from_value(response.result.unwrap_or_default()).map_err(transport)
    }

    fn vertex_params(&self, vertex: VertexId) -> SenderVertexParams {
        SenderVertexParams {
            from: self.staker,
            vertex,
        }
    }
}

#[async_trait]
impl Ledger for RpcLedger {
    fn staker(&self) -> Address {
        self.staker
    }

    async fn levels(&self) -> LedgerResult<ChallengeLevels> {
        self.call(methods::LEVELS, json!({})).await
    }

    async fn challenge_period_seconds(&self) -> LedgerResult<u64> {
        self.call(methods::CHALLENGE_PERIOD_SECONDS, json!({})).await
    }

    async fn events_since(&self, cursor: u64) -> LedgerResult<Vec<ProtocolEvent>> {
        self.call(methods::EVENTS_SINCE, CursorParams { cursor }).await
    }

    async fn latest_confirmed(&self) -> LedgerResult<Assertion> {
        self.call(methods::LATEST_CONFIRMED, json!({})).await
    }

    async fn num_assertions(&self) -> LedgerResult<u64> {
        self.call(methods::NUM_ASSERTIONS, json!({})).await
    }

    async fn get_assertion(&self, seq: u64) -> LedgerResult<Option<Assertion>> {
        self.call(methods::GET_ASSERTION, SeqParams { seq }).await
    }

    async fn create_assertion(&self, prev_seq: u64, height: Height, state_hash: Hash) -> LedgerResult<Assertion> {
        let params = CreateAssertionParams {
            from: self.staker,
            prev_seq,
            height,
            state_hash,
        };
        self.call(methods::CREATE_ASSERTION, params).await
    }

    async fn create_succession_challenge(&self, parent_seq: u64) -> LedgerResult<Challenge> {
        let params = SenderSeqParams {
            from: self.staker,
            seq: parent_seq,
        };
        self.call(methods::CREATE_SUCCESSION_CHALLENGE, params).await
    }

    async fn create_sub_challenge(&self, vertex: VertexId) -> LedgerResult<Challenge> {
        self.call(methods::CREATE_SUB_CHALLENGE, self.vertex_params(vertex)).await
    }

    async fn get_challenge(&self, id: ChallengeId) -> LedgerResult<Option<Challenge>> {
        self.call(methods::GET_CHALLENGE, ChallengeParams { id }).await
    }

    async fn get_vertex(&self, id: VertexId) -> LedgerResult<Option<ChallengeVertex>> {
        self.call(methods::GET_VERTEX, VertexParams { vertex: id }).await
    }

    async fn add_leaf(&self, args: AddLeafArgs) -> LedgerResult<VertexId> {
        let params = AddLeafParams {
            from: self.staker,
            args,
        };
        self.call(methods::ADD_LEAF, params).await
    }

    async fn bisect(&self, vertex: VertexId, prefix_history_root: Hash, prefix_proof: Vec<u8>) -> LedgerResult<VertexId> {
        let params = PrefixMoveParams {
            from: self.staker,
            vertex,
            prefix_history_root,
            prefix_proof,
        };
        self.call(methods::BISECT, params).await
    }

    async fn merge(&self, vertex: VertexId, prefix_history_root: Hash, prefix_proof: Vec<u8>) -> LedgerResult<VertexId> {
        let params = PrefixMoveParams {
            from: self.staker,
            vertex,
            prefix_history_root,
            prefix_proof,
        };
        self.call(methods::MERGE, params).await
    }

    async fn children_are_at_one_step_fork(&self, vertex: VertexId) -> LedgerResult<bool> {
        self.call(methods::CHILDREN_ARE_AT_ONE_STEP_FORK, VertexParams { vertex }).await
    }

    async fn is_presumptive_successor(&self, vertex: VertexId) -> LedgerResult<bool> {
        self.call(methods::IS_PRESUMPTIVE_SUCCESSOR, VertexParams { vertex }).await
    }

    async fn has_confirmed_sibling(&self, vertex: VertexId) -> LedgerResult<bool> {
        self.call(methods::HAS_CONFIRMED_SIBLING, VertexParams { vertex }).await
    }

    async fn ps_timer(&self, vertex: VertexId) -> LedgerResult<u64> {
        self.call(methods::PS_TIMER, VertexParams { vertex }).await
    }

    async fn confirm_for_ps_timer(&self, vertex: VertexId) -> LedgerResult<()> {
        self.call(methods::CONFIRM_FOR_PS_TIMER, self.vertex_params(vertex)).await
    }

    async fn confirm_for_succession_challenge_win(&self, vertex: VertexId) -> LedgerResult<()> {
        self.call(methods::CONFIRM_FOR_SUCCESSION_CHALLENGE_WIN, self.vertex_params(vertex))
            .await
    }

    async fn execute_one_step(&self, vertex: VertexId, data: OneStepData) -> LedgerResult<()> {
        let params = OneStepParams {
            from: self.staker,
            vertex,
            data,
        };
        self.call(methods::EXECUTE_ONE_STEP, params).await
    }
}
