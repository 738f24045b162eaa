//! Block challenge moves played through the JSON-RPC node front end

use std::net::SocketAddr;
use std::sync::Arc;

use serde_json::json;
use xlayer_bindings::rpc::{RpcRequest, RpcResponse, INVALID_PARAMS_CODE, METHOD_NOT_FOUND_CODE};
use xlayer_core::{Address, ChallengeLevels, ChallengeType, Ledger, ProtocolError, ProtocolEvent};
use xlayer_host::{
    moves, router, Divergence, HistoryAddress, HistoryCache, InMemoryLedger, RpcLedger, SimulatedExecution,
    SimulatedMachine, SimulatedVerifier, StateProvider,
};

const HONEST: Address = [0xAA; 20];
const EVIL: Address = [0xEE; 20];

fn levels() -> ChallengeLevels {
    ChallengeLevels::new(vec![8, 4]).unwrap()
}

async fn serve(ledger: InMemoryLedger) -> SocketAddr {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router(ledger)).await.unwrap();
    });
    addr
}

fn provider(divergence: Option<Divergence>, cache: &std::path::Path) -> StateProvider {
    let execution = SimulatedExecution::new(&levels(), 8, divergence);
    StateProvider::new(Arc::new(execution), HistoryCache::new(cache), levels())
}

async fn raw_call(addr: SocketAddr, request: serde_json::Value) -> RpcResponse {
    reqwest::Client::new()
        .post(format!("http://{}", addr))
        .json(&request)
        .send()
        .await
        .unwrap()
        .json::<RpcResponse>()
        .await
        .unwrap()
}

#[tokio::test]
async fn test_block_challenge_over_rpc() {
    let dir = tempfile::tempdir().unwrap();
    let genesis = SimulatedMachine::genesis().machine_finished_hash();
    let addr = serve(InMemoryLedger::new(levels(), 30, genesis, Arc::new(SimulatedVerifier))).await;
    let url = format!("http://{}", addr);
    let honest = RpcLedger::new(url.clone(), HONEST);
    let evil = RpcLedger::new(url, EVIL);
    let honest_provider = provider(None, &dir.path().join("honest"));
    let evil_provider = provider(Some(Divergence { message: 5, opcode: 1 }), &dir.path().join("evil"));

    assert_eq!(honest.levels().await.unwrap(), levels());
    assert_eq!(honest.challenge_period_seconds().await.unwrap(), 30);

    let good = honest
        .create_assertion(0, 8, honest_provider.state_hash_at(8).await.unwrap())
        .await
        .unwrap();
    let bad = evil
        .create_assertion(0, 8, evil_provider.state_hash_at(8).await.unwrap())
        .await
        .unwrap();
    assert_ne!(good.state_hash, bad.state_hash);
    assert_eq!(honest.num_assertions().await.unwrap(), 3);

    let challenge = evil.create_succession_challenge(0).await.unwrap();
    assert_eq!(challenge.challenge_type, ChallengeType::Block);
    let err = honest.create_succession_challenge(0).await.unwrap_err();
    assert!(err.is_already_exists());
    assert_eq!(honest.get_challenge(challenge.id).await.unwrap(), Some(challenge.clone()));

    let address = HistoryAddress::block(0);
    let honest_leaf = moves::add_leaf(&honest, &honest_provider, &challenge, good.id.into(), &address, Some(8))
        .await
        .unwrap();
    let evil_leaf = moves::add_leaf(&evil, &evil_provider, &challenge, bad.id.into(), &address, Some(8))
        .await
        .unwrap();
    assert_ne!(honest_leaf, evil_leaf);

    // rival leaves at the same height leave the root without a presumptive successor
    assert!(!honest.is_presumptive_successor(honest_leaf).await.unwrap());
    assert!(!honest.has_confirmed_sibling(honest_leaf).await.unwrap());
    assert!(!honest.children_are_at_one_step_fork(challenge.root_vertex).await.unwrap());

    // histories agree up to height 5, so the evil leaf merges into the honest bisection
    let root = honest.get_vertex(challenge.root_vertex).await.unwrap().unwrap();
    let vertex = honest.get_vertex(honest_leaf).await.unwrap().unwrap();
    let mid = moves::bisect(&honest, &honest_provider, &vertex, &root, &address)
        .await
        .unwrap();
    let rival = evil.get_vertex(evil_leaf).await.unwrap().unwrap();
    let merged = moves::merge(&evil, &evil_provider, &rival, &root, &address)
        .await
        .unwrap();
    assert_eq!(merged, mid);

    let mid_vertex = honest.get_vertex(mid).await.unwrap().unwrap();
    assert_eq!(mid_vertex.height(), 4);
    assert!(honest.is_presumptive_successor(mid).await.unwrap());
    let err = honest.confirm_for_ps_timer(mid).await.unwrap_err();
    assert!(matches!(err, ProtocolError::PsTimerNotElapsed(_)));

    let events = honest.events_since(0).await.unwrap();
    assert!(events
        .iter()
        .any(|event| matches!(event, ProtocolEvent::ChallengeStarted { level: 0, challenger, .. } if *challenger == EVIL)));
    let added = events
        .iter()
        .filter(|event| matches!(event, ProtocolEvent::VertexAdded { .. }))
        .count();
    assert_eq!(added, 3);
}

#[tokio::test]
async fn test_malformed_requests_are_rejected() {
    let addr = serve(InMemoryLedger::new(levels(), 30, [1u8; 32], Arc::new(SimulatedVerifier))).await;

    let response = raw_call(addr, json!({ "jsonrpc": "2.0", "method": "bold_unknown", "params": {}, "id": 7 })).await;
    let error = response.error.unwrap();
    assert_eq!(error.code, METHOD_NOT_FOUND_CODE);
    assert_eq!(response.id, json!(7));

    let request = RpcRequest::new("bold_getAssertion", json!({ "seq": "first" }), 8);
    let response = raw_call(addr, serde_json::to_value(request).unwrap()).await;
    assert_eq!(response.error.unwrap().code, INVALID_PARAMS_CODE);

    let client = RpcLedger::new(format!("http://{}", addr), HONEST);
    assert!(client.get_assertion(0).await.unwrap().is_some());
    let health = reqwest::get(format!("http://{}/health", addr))
        .await
        .unwrap()
        .text()
        .await
        .unwrap();
    assert_eq!(health, "OK");
}
