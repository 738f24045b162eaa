//! Host-side challenge engine
//!
//! - [`StateProvider`]: history commitments and proofs from local execution
//! - [`VertexTracker`]: per-vertex state machine driving bisection to confirmation
//! - [`Validator`]: event watcher, assertion poster and tracker supervisor
//! - [`ledger`]: in-memory ledger, its JSON-RPC front end and client

pub mod cache;
pub mod config;
pub mod fsm;
pub mod ledger;
pub mod moves;
pub mod registry;
pub mod simulated;
pub mod state_provider;
pub mod tracker;
pub mod validator;

pub use cache::{CacheError, CacheKey, HistoryCache};
pub use config::{Config, NodeConfig, SimulationConfig};
pub use fsm::{Effect, Fsm, FsmError, TrackerState, Trigger};
pub use ledger::{router, InMemoryLedger, RpcLedger, GENESIS_STAKER};
pub use registry::{RegistryHandle, RegistryStatus, TrackerOutcome, TrackerRegistry, TrackerSpawner};
pub use simulated::{Divergence, SimulatedExecution, SimulatedMachine, SimulatedVerifier};
pub use state_provider::{HistoryAddress, ProviderError, StateProvider};
pub use tracker::{TrackerContext, TrackerExit, TrackerSpec, VertexTracker};
pub use validator::{Validator, ValidatorOptions};
