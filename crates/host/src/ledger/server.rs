//! JSON-RPC front end of the in-memory ledger

use axum::{
    extract::State as AxumState,
    routing::{get, post},
    Json, Router,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;
use tracing::debug;
use xlayer_bindings::rpc::{
    methods, AddLeafParams, ChallengeParams, CreateAssertionParams, CursorParams, OneStepParams, PrefixMoveParams,
    RpcError, RpcRequest, RpcResponse, SenderSeqParams, SenderVertexParams, SeqParams, VertexParams,
    INTERNAL_ERROR_CODE, INVALID_PARAMS_CODE, METHOD_NOT_FOUND_CODE,
};
use xlayer_core::{Ledger, LedgerResult};

use super::InMemoryLedger;

/// Router serving `ledger` on `POST /` and `GET /health`
pub fn router(ledger: InMemoryLedger) -> Router {
    Router::new()
        .route("/", post(rpc_handler))
        .route("/health", get(health))
        .with_state(ledger)
}

async fn health() -> &'static str {
    "OK"
}

async fn rpc_handler(AxumState(ledger): AxumState<InMemoryLedger>, Json(req): Json<RpcRequest>) -> Json<RpcResponse> {
    let id = req.id.clone();
    debug!("RPC {}", req.method);
    match dispatch(&ledger, req).await {
        Ok(result) => Json(RpcResponse::success(id, result)),
        Err(error) => Json(RpcResponse::failure(id, error)),
    }
}

fn params<T: DeserializeOwned>(value: Value) -> Result<T, RpcError> {
    serde_json::from_value(value).map_err(|e| RpcError {
        code: INVALID_PARAMS_CODE,
        message: format!("invalid params: {}", e),
        data: None,
    })
}

fn reply<T: Serialize>(result: LedgerResult<T>) -> Result<Value, RpcError> {
    let value = result.map_err(RpcError::protocol)?;
    serde_json::to_value(value).map_err(|e| RpcError {
        code: INTERNAL_ERROR_CODE,
        message: format!("unencodable result: {}", e),
        data: None,
    })
}

async fn dispatch(ledger: &InMemoryLedger, req: RpcRequest) -> Result<Value, RpcError> {
    match req.method.as_str() {
        methods::LEVELS => reply(ledger.levels().await),
        methods::CHALLENGE_PERIOD_SECONDS => reply(ledger.challenge_period_seconds().await),
        methods::EVENTS_SINCE => {
            let p: CursorParams = params(req.params)?;
            reply(ledger.events_since(p.cursor).await)
        }
        methods::LATEST_CONFIRMED => reply(ledger.latest_confirmed().await),
        methods::NUM_ASSERTIONS => reply(ledger.num_assertions().await),
        methods::GET_ASSERTION => {
            let p: SeqParams = params(req.params)?;
            reply(ledger.get_assertion(p.seq).await)
        }
        methods::CREATE_ASSERTION => {
            let p: CreateAssertionParams = params(req.params)?;
            reply(
                ledger
                    .with_staker(p.from)
                    .create_assertion(p.prev_seq, p.height, p.state_hash)
                    .await,
            )
        }
        methods::CREATE_SUCCESSION_CHALLENGE => {
            let p: SenderSeqParams = params(req.params)?;
            reply(ledger.with_staker(p.from).create_succession_challenge(p.seq).await)
        }
        methods::CREATE_SUB_CHALLENGE => {
            let p: SenderVertexParams = params(req.params)?;
            reply(ledger.with_staker(p.from).create_sub_challenge(p.vertex).await)
        }
        methods::GET_CHALLENGE => {
            let p: ChallengeParams = params(req.params)?;
            reply(ledger.get_challenge(p.id).await)
        }
        methods::GET_VERTEX => {
            let p: VertexParams = params(req.params)?;
            reply(ledger.get_vertex(p.vertex).await)
        }
        methods::ADD_LEAF => {
            let p: AddLeafParams = params(req.params)?;
            reply(ledger.with_staker(p.from).add_leaf(p.args).await)
        }
        methods::BISECT => {
            let p: PrefixMoveParams = params(req.params)?;
            reply(
                ledger
                    .with_staker(p.from)
                    .bisect(p.vertex, p.prefix_history_root, p.prefix_proof)
                    .await,
            )
        }
        methods::MERGE => {
            let p: PrefixMoveParams = params(req.params)?;
            reply(
                ledger
                    .with_staker(p.from)
                    .merge(p.vertex, p.prefix_history_root, p.prefix_proof)
                    .await,
            )
        }
        methods::CHILDREN_ARE_AT_ONE_STEP_FORK => {
            let p: VertexParams = params(req.params)?;
            reply(ledger.children_are_at_one_step_fork(p.vertex).await)
        }
        methods::IS_PRESUMPTIVE_SUCCESSOR => {
            let p: VertexParams = params(req.params)?;
            reply(ledger.is_presumptive_successor(p.vertex).await)
        }
        methods::HAS_CONFIRMED_SIBLING => {
            let p: VertexParams = params(req.params)?;
            reply(ledger.has_confirmed_sibling(p.vertex).await)
        }
        methods::PS_TIMER => {
            let p: VertexParams = params(req.params)?;
            reply(ledger.ps_timer(p.vertex).await)
        }
        methods::CONFIRM_FOR_PS_TIMER => {
            let p: SenderVertexParams = params(req.params)?;
            reply(ledger.with_staker(p.from).confirm_for_ps_timer(p.vertex).await)
        }
        methods::CONFIRM_FOR_SUCCESSION_CHALLENGE_WIN => {
            let p: SenderVertexParams = params(req.params)?;
            reply(
                ledger
                    .with_staker(p.from)
                    .confirm_for_succession_challenge_win(p.vertex)
                    .await,
            )
        }
        methods::EXECUTE_ONE_STEP => {
            let p: OneStepParams = params(req.params)?;
            reply(ledger.with_staker(p.from).execute_one_step(p.vertex, p.data).await)
        }
        other => Err(RpcError {
            code: METHOD_NOT_FOUND_CODE,
            message: format!("method not found: {}", other),
            data: None,
        }),
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;
    use std::sync::Arc;

    use serde_json::json;
    use xlayer_bindings::rpc::PROTOCOL_ERROR_CODE;
    use xlayer_core::{ChallengeLevels, ProtocolError};

    use super::*;
    use crate::simulated::SimulatedVerifier;

    fn ledger() -> InMemoryLedger {
        let levels = ChallengeLevels::new(vec![8, 4]).unwrap();
        InMemoryLedger::new(levels, 30, [1u8; 32], Arc::new(SimulatedVerifier))
    }

    #[test]
    fn test_unencodable_result_is_internal_error() {
        let result: LedgerResult<HashMap<(u8, u8), u8>> = Ok(HashMap::from([((1, 2), 3)]));
        let err = reply(result).unwrap_err();
        assert_eq!(err.code, INTERNAL_ERROR_CODE);
        assert!(err.data.is_none());
    }

    #[tokio::test]
    async fn test_dispatch_error_codes() {
        let ledger = ledger();

        let err = dispatch(&ledger, RpcRequest::new("bold_unknown", json!({}), 1))
            .await
            .unwrap_err();
        assert_eq!(err.code, METHOD_NOT_FOUND_CODE);

        let err = dispatch(&ledger, RpcRequest::new(methods::GET_ASSERTION, json!({ "seq": "one" }), 2))
            .await
            .unwrap_err();
        assert_eq!(err.code, INVALID_PARAMS_CODE);

        let challenge = SenderSeqParams {
            from: [7u8; 20],
            seq: 0,
        };
        let request = RpcRequest::new(
            methods::CREATE_SUCCESSION_CHALLENGE,
            serde_json::to_value(challenge).unwrap(),
            3,
        );
        let err = dispatch(&ledger, request).await.unwrap_err();
        assert_eq!(err.code, PROTOCOL_ERROR_CODE);
        assert!(matches!(err.data, Some(ProtocolError::InvalidChildren(_))));

        let levels = dispatch(&ledger, RpcRequest::new(methods::LEVELS, json!({}), 4))
            .await
            .unwrap();
        let levels: ChallengeLevels = serde_json::from_value(levels).unwrap();
        assert_eq!(levels.heights(), &[8, 4]);
    }
}
