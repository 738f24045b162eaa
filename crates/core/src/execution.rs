//! Execution interface
//!
//! Replaying rollup messages is delegated to an execution provider. A run
//! replays one message and exposes machine hashes at opcode positions.

use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::state::GlobalState;
use crate::types::{hex_array, Hash, Height};

/// Execution errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ExecutionError {
    /// Requested message not yet processed locally; retry later
    #[error("message {requested} not yet available (local head {available})")]
    NotYetAvailable {
        /// Requested height
        requested: Height,
        /// Highest height available locally
        available: Height,
    },
    /// Request outside what the machine can answer
    #[error("out of range: {0}")]
    OutOfRange(String),
    /// Anything else
    #[error("execution failed: {0}")]
    Other(String),
}

impl ExecutionError {
    /// Whether waiting may make the request succeed
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::NotYetAvailable { .. })
    }
}

/// Machine state at one opcode position of a run
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct StepInfo {
    /// Opcode position
    pub position: u64,
    /// Machine hash at `position`
    #[serde(with = "hex_array")]
    pub hash: Hash,
    /// Whether the machine has finished at `position`
    pub finished: bool,
}

/// Replay of a single rollup message
#[async_trait]
pub trait ExecutionRun: Send + Sync {
    /// `count` machine hashes starting at opcode `start`, `step_size` opcodes apart
    async fn leaves_with_step_size(&self, start: u64, step_size: u64, count: u64) -> Result<Vec<Hash>, ExecutionError>;

    /// Machine hashes at `from, from + step_size, ..` up to and including `to`
    async fn leaves_in_range_with_step_size(&self, from: u64, to: u64, step_size: u64) -> Result<Vec<Hash>, ExecutionError>;

    /// Machine proof for executing the opcode at `position`
    async fn proof_at(&self, position: u64) -> Result<Vec<u8>, ExecutionError>;

    /// Machine state at `position`
    async fn step_at(&self, position: u64) -> Result<StepInfo, ExecutionError>;
}

/// Local execution of the rollup
#[async_trait]
pub trait ExecutionProvider: Send + Sync {
    /// Identity of the machine binary
    fn module_root(&self) -> Hash;

    /// Highest message count with a locally computed state
    async fn head(&self) -> Result<Height, ExecutionError>;

    /// Global state after `height` messages
    async fn global_state_at(&self, height: Height) -> Result<GlobalState, ExecutionError>;

    /// Block-level leaf after `height` messages
    async fn state_hash_at(&self, height: Height) -> Result<Hash, ExecutionError> {
        Ok(self.global_state_at(height).await?.machine_finished_hash())
    }

    /// Start replaying `message` (the transition from height `message` to `message + 1`)
    async fn create_execution_run(&self, module_root: Hash, message: u64) -> Result<Arc<dyn ExecutionRun>, ExecutionError>;
}

/// Checks one machine step for the ledger
pub trait OneStepVerifier: Send + Sync {
    /// Machine hash after executing one step from `before` with `proof`
    fn verify_one_step(&self, before: &Hash, proof: &[u8]) -> Result<Hash, String>;
}
