//! Protocol errors
//!
//! Rule violations reported by the ledger. The enum is serializable so a
//! remote ledger can hand back the exact variant its local rules produced.

use serde::{Deserialize, Serialize};

/// Ledger rule violations and transport failures
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", content = "detail")]
pub enum ProtocolError {
    /// Item already exists on-chain
    #[error("item already exists on-chain: {0}")]
    AlreadyExists(String),
    /// Item not found on-chain
    #[error("item not found on-chain: {0}")]
    NotFound(String),
    /// Height does not fit the rules
    #[error("invalid height: {0}")]
    InvalidHeight(String),
    /// First leaf is not the challenge root state
    #[error("first state is not the challenge root: {0}")]
    FirstStateMismatch(String),
    /// Last leaf is not the claimed state
    #[error("last state is not the claim state: {0}")]
    LastStateMismatch(String),
    /// Children layout does not allow the move
    #[error("invalid children: {0}")]
    InvalidChildren(String),
    /// Presumptive successors cannot be bisected
    #[error("cannot bisect presumptive successor: {0}")]
    CannotBisectPresumptive(String),
    /// The current presumptive successor can already be confirmed
    #[error("cannot set lower ps: {0}")]
    PresumptiveSuccessorConfirmable(String),
    /// Prefix proof does not verify
    #[error("invalid prefix history: {0}")]
    InvalidPrefix(String),
    /// Inclusion proof does not verify
    #[error("invalid inclusion proof: {0}")]
    InvalidInclusionProof(String),
    /// Challenge already has a winner
    #[error("challenge already completed: {0}")]
    ChallengeCompleted(String),
    /// Vertex already confirmed
    #[error("vertex is not pending: {0}")]
    NotPending(String),
    /// Predecessor must be confirmed first
    #[error("predecessor not confirmed: {0}")]
    PredecessorNotConfirmed(String),
    /// Presumptive successor timer below the challenge period
    #[error("presumptive successor timer not elapsed: {0}")]
    PsTimerNotElapsed(String),
    /// Succession challenge not won by this vertex
    #[error("succession challenge not won: {0}")]
    NoSubchallengeWin(String),
    /// Move requires a one-step fork
    #[error("not at one-step fork: {0}")]
    NotAtOneStepFork(String),
    /// One-step proof rejected
    #[error("one-step proof failed: {0}")]
    OneStepProofFailed(String),
    /// Level configuration rejected
    #[error("invalid challenge levels: {0}")]
    InvalidLevels(String),
    /// Request never reached the ledger or the reply was unreadable
    #[error("ledger transport error: {0}")]
    Transport(String),
}

impl ProtocolError {
    /// Whether this is the recoverable "already exists" race
    pub const fn is_already_exists(&self) -> bool {
        matches!(self, Self::AlreadyExists(_))
    }
}

/// Result of a ledger call
pub type LedgerResult<T> = Result<T, ProtocolError>;
