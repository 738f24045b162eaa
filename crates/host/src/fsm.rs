//! Vertex tracker state machine
//!
//! A pure transition table. The tracker computes a trigger from ledger
//! reads, fires it, and performs the returned effect; nothing here touches
//! the ledger.

use std::fmt;

use xlayer_core::{ChallengeId, VertexId};

/// Tracker states
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TrackerState {
    /// Evaluate the vertex against its predecessor
    Started,
    /// The predecessor's children are one step above it
    AtOneStepFork,
    /// Settle the fork with a one-step proof
    AtOneStepProof,
    /// Open the sub-challenge at the fork
    OpeningSubchallenge,
    /// Add our leaf to the sub-challenge
    AddingSubchallengeLeaf,
    /// Wait for the sub-challenge winner
    AwaitingSubchallengeResolution,
    /// Bisect the vertex
    Bisecting,
    /// Merge into the existing bisection target
    Merging,
    /// Vertex is the presumptive successor; wait for its timer
    Presumptive,
    /// Submit a confirmation
    Confirming,
}

impl fmt::Display for TrackerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Events driving the tracker state machine
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Trigger {
    /// Predecessor `fork_point` has all children one step above it
    ActOneStepFork {
        /// Vertex below the fork
        fork_point: VertexId,
    },
    /// Vertex is the presumptive successor
    MarkPresumptive,
    /// Vertex must be bisected
    Bisect,
    /// Fork is at the small-step level
    ActOneStepProof,
    /// Fork is above the small-step level
    OpenSubchallenge,
    /// Sub-challenge exists
    SubchallengeOpened {
        /// Sub-challenge id
        challenge: ChallengeId,
    },
    /// Our leaf is in the sub-challenge
    SubchallengeLeafAdded {
        /// Sub-challenge id
        challenge: ChallengeId,
        /// Our leaf vertex
        leaf: VertexId,
    },
    /// Bisection produced `vertex`
    Bisected {
        /// Vertex at the bisection point
        vertex: VertexId,
    },
    /// Bisection target already exists
    BisectionExists,
    /// Vertex now hangs below `vertex`
    Merged {
        /// Existing bisection target
        vertex: VertexId,
    },
    /// A move failed; evaluate again
    Reevaluate,
    /// Another vertex became presumptive successor
    LostPresumptive,
    /// Presumptive-successor timer reached the challenge period
    PsTimerElapsed,
    /// Our leaf won the sub-challenge
    SubchallengeWon,
    /// One-step proof accepted
    OneStepProven,
    /// Confirmation accepted
    Confirmed,
}

impl Trigger {
    /// Short name for log lines
    pub const fn name(&self) -> &'static str {
        match self {
            Self::ActOneStepFork { .. } => "act_one_step_fork",
            Self::MarkPresumptive => "mark_presumptive",
            Self::Bisect => "bisect",
            Self::ActOneStepProof => "act_one_step_proof",
            Self::OpenSubchallenge => "open_subchallenge",
            Self::SubchallengeOpened { .. } => "subchallenge_opened",
            Self::SubchallengeLeafAdded { .. } => "subchallenge_leaf_added",
            Self::Bisected { .. } => "bisected",
            Self::BisectionExists => "bisection_exists",
            Self::Merged { .. } => "merged",
            Self::Reevaluate => "reevaluate",
            Self::LostPresumptive => "lost_presumptive",
            Self::PsTimerElapsed => "ps_timer_elapsed",
            Self::SubchallengeWon => "subchallenge_won",
            Self::OneStepProven => "one_step_proven",
            Self::Confirmed => "confirmed",
        }
    }
}

/// Work the tracker performs after a transition
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Effect {
    /// Nothing
    None,
    /// Start tracking `vertex` in the same challenge
    TrackVertex(VertexId),
    /// Start tracking our leaf `leaf` in sub-challenge `challenge`
    TrackSubchallengeLeaf {
        /// Sub-challenge id
        challenge: ChallengeId,
        /// Our leaf vertex
        leaf: VertexId,
    },
}

/// Transition not in the table
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid transition from {state} on {trigger}")]
pub struct FsmError {
    /// State the trigger fired in
    pub state: TrackerState,
    /// Trigger name
    pub trigger: &'static str,
}

/// Next state and effect for `trigger` fired in `state`
pub fn transition(state: TrackerState, trigger: &Trigger) -> Result<(TrackerState, Effect), FsmError> {
    use TrackerState as S;

    let next = match (state, trigger) {
        (S::Started, Trigger::ActOneStepFork { .. }) => (S::AtOneStepFork, Effect::None),
        (S::Started, Trigger::MarkPresumptive) => (S::Presumptive, Effect::None),
        (S::Started, Trigger::Bisect) => (S::Bisecting, Effect::None),

        (S::AtOneStepFork, Trigger::ActOneStepProof) => (S::AtOneStepProof, Effect::None),
        (S::AtOneStepFork, Trigger::OpenSubchallenge) => (S::OpeningSubchallenge, Effect::None),
        (S::AtOneStepProof, Trigger::OneStepProven) => (S::AtOneStepProof, Effect::None),

        (S::OpeningSubchallenge, Trigger::SubchallengeOpened { .. }) => (S::AddingSubchallengeLeaf, Effect::None),
        (S::AddingSubchallengeLeaf, Trigger::SubchallengeLeafAdded { challenge, leaf }) => (
            S::AwaitingSubchallengeResolution,
            Effect::TrackSubchallengeLeaf {
                challenge: *challenge,
                leaf: *leaf,
            },
        ),
        (S::AwaitingSubchallengeResolution, Trigger::SubchallengeWon) => (S::Confirming, Effect::None),

        (S::Bisecting, Trigger::Bisected { vertex }) | (S::Merging, Trigger::Merged { vertex }) => {
            (S::Started, Effect::TrackVertex(*vertex))
        }
        (S::Bisecting, Trigger::BisectionExists) => (S::Merging, Effect::None),
        (S::Bisecting | S::Merging | S::Confirming | S::AtOneStepFork, Trigger::Reevaluate) => {
            (S::Started, Effect::None)
        }

        (S::Presumptive | S::Confirming, Trigger::LostPresumptive) => (S::Started, Effect::None),
        (S::Presumptive, Trigger::PsTimerElapsed) => (S::Confirming, Effect::None),
        (S::Confirming, Trigger::Confirmed) => (S::Confirming, Effect::None),

        _ => {
            return Err(FsmError {
                state,
                trigger: trigger.name(),
            })
        }
    };
    Ok(next)
}

/// Current state plus the trigger that led to it
#[derive(Clone, Debug)]
pub struct Fsm {
    state: TrackerState,
    source: Option<Trigger>,
}

impl Default for Fsm {
    fn default() -> Self {
        Self::new()
    }
}

impl Fsm {
    /// Machine in [`TrackerState::Started`]
    pub const fn new() -> Self {
        Self {
            state: TrackerState::Started,
            source: None,
        }
    }

    /// Current state
    pub const fn state(&self) -> TrackerState {
        self.state
    }

    /// Trigger that entered the current state
    pub const fn source(&self) -> Option<&Trigger> {
        self.source.as_ref()
    }

    /// Fire `trigger`, moving to the next state
    pub fn fire(&mut self, trigger: Trigger) -> Result<Effect, FsmError> {
        let (next, effect) = transition(self.state, &trigger)?;
        // self-loops keep the entering trigger
        if next != self.state {
            self.source = Some(trigger);
        }
        self.state = next;
        Ok(effect)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sub_challenge_path() {
        let challenge = ChallengeId([1u8; 32]);
        let leaf = VertexId([2u8; 32]);
        let mut fsm = Fsm::new();
        fsm.fire(Trigger::ActOneStepFork {
            fork_point: VertexId([3u8; 32]),
        })
        .unwrap();
        fsm.fire(Trigger::OpenSubchallenge).unwrap();
        fsm.fire(Trigger::SubchallengeOpened { challenge }).unwrap();
        assert_eq!(fsm.state(), TrackerState::AddingSubchallengeLeaf);
        assert_eq!(fsm.source(), Some(&Trigger::SubchallengeOpened { challenge }));

        let effect = fsm.fire(Trigger::SubchallengeLeafAdded { challenge, leaf }).unwrap();
        assert_eq!(effect, Effect::TrackSubchallengeLeaf { challenge, leaf });
        assert_eq!(fsm.state(), TrackerState::AwaitingSubchallengeResolution);

        fsm.fire(Trigger::SubchallengeWon).unwrap();
        fsm.fire(Trigger::Confirmed).unwrap();
        assert_eq!(fsm.state(), TrackerState::Confirming);
        assert_eq!(fsm.source(), Some(&Trigger::SubchallengeWon));
    }

    #[test]
    fn test_bisection_hands_off_and_restarts() {
        let target = VertexId([4u8; 32]);
        let mut fsm = Fsm::new();
        fsm.fire(Trigger::Bisect).unwrap();
        assert_eq!(fsm.fire(Trigger::Bisected { vertex: target }).unwrap(), Effect::TrackVertex(target));
        assert_eq!(fsm.state(), TrackerState::Started);

        fsm.fire(Trigger::Bisect).unwrap();
        fsm.fire(Trigger::BisectionExists).unwrap();
        assert_eq!(fsm.state(), TrackerState::Merging);
        assert_eq!(fsm.fire(Trigger::Merged { vertex: target }).unwrap(), Effect::TrackVertex(target));
        assert_eq!(fsm.state(), TrackerState::Started);
    }

    #[test]
    fn test_presumptive_round_trip() {
        let mut fsm = Fsm::new();
        fsm.fire(Trigger::MarkPresumptive).unwrap();
        fsm.fire(Trigger::LostPresumptive).unwrap();
        assert_eq!(fsm.state(), TrackerState::Started);
        fsm.fire(Trigger::MarkPresumptive).unwrap();
        fsm.fire(Trigger::PsTimerElapsed).unwrap();
        assert_eq!(fsm.state(), TrackerState::Confirming);
        assert_eq!(fsm.source(), Some(&Trigger::PsTimerElapsed));
    }

    #[test]
    fn test_one_step_proof_path() {
        let mut fsm = Fsm::new();
        fsm.fire(Trigger::ActOneStepFork {
            fork_point: VertexId([3u8; 32]),
        })
        .unwrap();
        fsm.fire(Trigger::ActOneStepProof).unwrap();
        assert_eq!(fsm.fire(Trigger::OneStepProven).unwrap(), Effect::None);
        assert_eq!(fsm.state(), TrackerState::AtOneStepProof);
    }

    #[test]
    fn test_invalid_transitions() {
        let err = transition(TrackerState::Started, &Trigger::SubchallengeWon).unwrap_err();
        assert_eq!(err.state, TrackerState::Started);
        assert_eq!(err.trigger, "subchallenge_won");
        assert!(transition(TrackerState::Presumptive, &Trigger::Bisect).is_err());
        assert!(transition(TrackerState::AwaitingSubchallengeResolution, &Trigger::Reevaluate).is_err());
        assert!(transition(TrackerState::Merging, &Trigger::BisectionExists).is_err());
    }
}
