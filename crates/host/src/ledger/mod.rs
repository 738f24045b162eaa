//! Ledger implementations
//!
//! - [`InMemoryLedger`]: the rules of the game over shared process memory
//! - [`router`]: JSON-RPC front end serving an in-memory ledger
//! - [`RpcLedger`]: client for that front end

mod memory;
mod rpc;
mod server;

pub use memory::{InMemoryLedger, GENESIS_STAKER};
pub use rpc::RpcLedger;
pub use server::router;

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use xlayer_core::{ChallengeLevels, Ledger, ProtocolError, VertexId};

    use super::*;
    use crate::simulated::SimulatedVerifier;

    #[tokio::test]
    async fn test_rpc_round_trip() {
        let levels = ChallengeLevels::new(vec![8, 4]).unwrap();
        let ledger = InMemoryLedger::new(levels.clone(), 30, [1u8; 32], Arc::new(SimulatedVerifier));
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router(ledger)).await.unwrap();
        });

        let client = RpcLedger::new(format!("http://{}", addr), [7u8; 20]);
        assert_eq!(client.levels().await.unwrap(), levels);
        assert_eq!(client.challenge_period_seconds().await.unwrap(), 30);

        let assertion = client.create_assertion(0, 4, [2u8; 32]).await.unwrap();
        assert_eq!(assertion.staker, [7u8; 20]);
        assert_eq!(client.get_assertion(1).await.unwrap(), Some(assertion));
        assert_eq!(client.get_assertion(5).await.unwrap(), None);

        // protocol errors keep their variant across the wire
        let err = client.create_assertion(0, 4, [2u8; 32]).await.unwrap_err();
        assert!(err.is_already_exists());
        let err = client.create_succession_challenge(0).await.unwrap_err();
        assert!(matches!(err, ProtocolError::InvalidChildren(_)));
        let err = client.is_presumptive_successor(VertexId([9u8; 32])).await.unwrap_err();
        assert!(matches!(err, ProtocolError::NotFound(_)));

        let events = client.events_since(0).await.unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(client.latest_confirmed().await.unwrap().seq, 0);
    }

    #[tokio::test]
    async fn test_unreachable_node_is_transport_error() {
        let client = RpcLedger::new("http://127.0.0.1:9", [7u8; 20]);
        assert!(matches!(client.num_assertions().await, Err(ProtocolError::Transport(_))));
    }
}
