//! Validator binary

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{EnvFilter, FmtSubscriber};
use xlayer_core::Ledger;
use xlayer_host::{Config, HistoryCache, RpcLedger, SimulatedExecution, StateProvider, Validator, ValidatorOptions};

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let subscriber = FmtSubscriber::builder().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    info!("╔═══════════════════════════════════════════════╗");
    info!("║      xlayer Bisection Challenge Validator     ║");
    info!("╚═══════════════════════════════════════════════╝");

    let config = Config::from_env();
    let ledger = Arc::new(RpcLedger::new(config.ledger_rpc.clone(), config.staker()?));
    let levels = ledger.levels().await?;

    info!("");
    info!("Configuration:");
    info!("  Name:             {}", config.name);
    info!("  Ledger RPC:       {}", config.ledger_rpc);
    info!("  Cache dir:        {}", config.cache_dir);
    info!("  Messages:         {}", config.simulation.messages);
    if let Some(divergence) = config.simulation.divergence() {
        warn!(
            "  Divergence:       message {} opcode {}",
            divergence.message, divergence.opcode
        );
    }
    info!("");

    let execution = SimulatedExecution::new(&levels, config.simulation.messages, config.simulation.divergence());
    let provider = StateProvider::new(Arc::new(execution), HistoryCache::new(config.cache_path()), levels);
    let validator = Validator::new(ValidatorOptions::from(&config), ledger, Arc::new(provider));

    let cancel = CancellationToken::new();
    let shutdown = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("Received Ctrl-C, shutting down");
        }
        shutdown.cancel();
    });

    let status = validator.run(cancel).await?;
    info!(
        "Validator stopped: {} trackers finished, {} panicked",
        status.finished.len(),
        status.panicked
    );
    Ok(())
}
