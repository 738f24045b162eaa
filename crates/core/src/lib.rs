//! Challenge protocol core
//!
//! This crate contains the data model and interfaces shared by:
//! - The host (validator, trackers, history provider)
//! - The ledger implementations (in-memory and RPC)

pub mod assertion;
pub mod bisection;
pub mod challenge;
pub mod error;
pub mod execution;
pub mod ledger;
pub mod levels;
pub mod state;
pub mod types;

pub use assertion::{Assertion, AssertionStatus, StateCommitment};
pub use bisection::{bisection_point, is_one_step_fork, BisectionError};
pub use challenge::{Challenge, ChallengeParent, ChallengeVertex, VertexCommitment, VertexStatus};
pub use error::{LedgerResult, ProtocolError};
pub use execution::{ExecutionError, ExecutionProvider, ExecutionRun, OneStepVerifier, StepInfo};
pub use ledger::{AddLeafArgs, Ledger, OneStepData, ProtocolEvent};
pub use levels::{ChallengeLevels, ChallengeType};
pub use state::{machine_finished_hash, GlobalState};
pub use types::*;
