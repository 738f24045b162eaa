//! Ledger node
//!
//! Serves an in-memory challenge ledger over JSON-RPC. Validators connect
//! with `LEDGER_RPC` pointing here.

use std::sync::Arc;

use anyhow::Result;
use tracing::info;
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use xlayer_host::{router, InMemoryLedger, NodeConfig, SimulatedMachine, SimulatedVerifier};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("Starting challenge ledger node...");

    let config = NodeConfig::from_env();
    let levels = config.levels()?;
    info!("  Levels: {:?}", levels.heights());
    info!("  Challenge period: {}s", config.challenge_period_secs);

    let genesis = SimulatedMachine::genesis().machine_finished_hash();
    let ledger = InMemoryLedger::new(levels, config.challenge_period_secs, genesis, Arc::new(SimulatedVerifier));

    let listener = tokio::net::TcpListener::bind(&config.rpc_addr).await?;
    info!("RPC server listening on {}", config.rpc_addr);
    axum::serve(listener, router(ledger)).await?;
    Ok(())
}
