//! In-memory ledger
//!
//! Reference implementation of the ledger rules. State lives behind a shared
//! mutex; handles bound to different stakers share it, so several validators
//! in one process see the same assertions, challenges and vertices.
//!
//! Time is measured in whole seconds of the tokio clock since the ledger was
//! created, which lets tests drive presumptive-successor timers with a
//! paused runtime.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::time::Instant;
use tracing::info;
use xlayer_bindings::ProofArgs;
use xlayer_core::{
    bisection_point, AddLeafArgs, Address, Assertion, AssertionId, AssertionStatus, Challenge, ChallengeId,
    ChallengeLevels, ChallengeParent, ChallengeVertex, ClaimId, Hash, Height, Ledger, LedgerResult, OneStepData,
    OneStepVerifier, ProtocolError, ProtocolEvent, VertexCommitment, VertexId, VertexStatus,
};
use xlayer_merkle::{verify_prefix_proof, InclusionProof, Keccak256Hasher};

/// Staker recorded for genesis and for handles without an owner
pub const GENESIS_STAKER: Address = [0u8; 20];

struct LedgerState {
    levels: ChallengeLevels,
    challenge_period: u64,
    assertions: Vec<Assertion>,
    assertion_seqs: HashMap<AssertionId, u64>,
    latest_confirmed: u64,
    challenges: HashMap<ChallengeId, Challenge>,
    vertices: HashMap<VertexId, ChallengeVertex>,
    children: HashMap<VertexId, Vec<VertexId>>,
    events: Vec<ProtocolEvent>,
}

/// Unique lowest-height child, none on a tie
fn presumptive_of(children: &[(VertexId, Height)]) -> Option<VertexId> {
    let lowest = children.iter().map(|(_, h)| *h).min()?;
    let mut at_lowest = children.iter().filter(|(_, h)| *h == lowest);
    let first = at_lowest.next()?;
    if at_lowest.next().is_some() {
        return None;
    }
    Some(first.0)
}

fn verify_inclusion(root: &Hash, leaf: &Hash, index: Height, siblings: &[Hash], what: &str) -> LedgerResult<()> {
    let proof = InclusionProof {
        index,
        siblings: siblings.to_vec(),
    };
    if proof.verify(root, leaf) {
        Ok(())
    } else {
        Err(ProtocolError::InvalidInclusionProof(format!("{} at index {}", what, index)))
    }
}

fn root_merkle(challenge: &ChallengeId) -> Hash {
    Keccak256Hasher::hash_parts(&[b"challenge root", challenge.as_bytes()])
}

impl LedgerState {
    fn assertion(&self, seq: u64) -> LedgerResult<&Assertion> {
        self.assertions
            .get(seq as usize)
            .ok_or_else(|| ProtocolError::NotFound(format!("assertion {}", seq)))
    }

    fn challenge(&self, id: &ChallengeId) -> LedgerResult<&Challenge> {
        self.challenges
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("challenge {:?}", id)))
    }

    fn vertex(&self, id: &VertexId) -> LedgerResult<&ChallengeVertex> {
        self.vertices
            .get(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("vertex {:?}", id)))
    }

    fn vertex_mut(&mut self, id: &VertexId) -> LedgerResult<&mut ChallengeVertex> {
        self.vertices
            .get_mut(id)
            .ok_or_else(|| ProtocolError::NotFound(format!("vertex {:?}", id)))
    }

    fn open_challenge(&self, id: &ChallengeId) -> LedgerResult<&Challenge> {
        let challenge = self.challenge(id)?;
        if challenge.completed() {
            return Err(ProtocolError::ChallengeCompleted(format!("{:?}", id)));
        }
        Ok(challenge)
    }

    fn prev_of(&self, vertex: &ChallengeVertex) -> LedgerResult<&ChallengeVertex> {
        let prev = vertex
            .prev
            .ok_or_else(|| ProtocolError::InvalidChildren(format!("{:?} is a challenge root", vertex.id)))?;
        self.vertex(&prev)
    }

    fn child_heights(&self, parent: &VertexId) -> Vec<(VertexId, Height)> {
        self.children
            .get(parent)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| self.vertices.get(id).map(|v| (*id, v.height())))
                    .collect()
            })
            .unwrap_or_default()
    }

    fn ps_timer(&self, vertex: &ChallengeVertex, now: u64) -> u64 {
        let running = vertex
            .prev
            .and_then(|prev| self.vertices.get(&prev))
            .filter(|prev| prev.ps_id == Some(vertex.id))
            .map(|prev| now.saturating_sub(prev.ps_last_updated))
            .unwrap_or(0);
        vertex.flushed_ps_time + running
    }

    /// Reject a change of presumptive successor at `parent` once the current
    /// one has accumulated a full challenge period
    fn guard_ps_change(&self, parent: &VertexId, children: &[(VertexId, Height)], now: u64) -> LedgerResult<()> {
        let parent = self.vertex(parent)?;
        let Some(current) = parent.ps_id else {
            return Ok(());
        };
        if presumptive_of(children) == Some(current) {
            return Ok(());
        }
        let current = self.vertex(&current)?;
        if self.ps_timer(current, now) >= self.challenge_period {
            return Err(ProtocolError::PresumptiveSuccessorConfirmable(format!(
                "{:?} already has ps timer {}",
                current.id,
                self.ps_timer(current, now)
            )));
        }
        Ok(())
    }

    fn refresh_ps(&mut self, parent: &VertexId, now: u64) -> LedgerResult<()> {
        let next = presumptive_of(&self.child_heights(parent));
        let (current, last_updated) = {
            let parent = self.vertex(parent)?;
            (parent.ps_id, parent.ps_last_updated)
        };
        if next == current {
            return Ok(());
        }
        if let Some(old) = current {
            let old = self.vertex_mut(&old)?;
            old.flushed_ps_time += now.saturating_sub(last_updated);
        }
        let parent = self.vertex_mut(parent)?;
        parent.ps_id = next;
        parent.ps_last_updated = now;
        Ok(())
    }

    fn connect(&mut self, parent: VertexId, child: VertexId) -> LedgerResult<()> {
        self.vertex_mut(&child)?.prev = Some(parent);
        self.children.entry(parent).or_default().push(child);
        Ok(())
    }

    fn disconnect(&mut self, parent: &VertexId, child: &VertexId) {
        if let Some(ids) = self.children.get_mut(parent) {
            ids.retain(|id| id != child);
        }
    }

    fn one_step_fork_below(&self, vertex: &ChallengeVertex) -> bool {
        let children = self.child_heights(&vertex.id);
        children.len() >= 2 && children.iter().all(|(_, h)| *h == vertex.height() + 1)
    }

    fn insert_vertex(
        &mut self,
        challenge_id: ChallengeId,
        commitment: VertexCommitment,
        claim_id: Option<ClaimId>,
        staker: Address,
        status: VertexStatus,
    ) -> VertexId {
        let id = VertexId::compute(&challenge_id, &commitment.merkle, commitment.height);
        self.vertices.insert(
            id,
            ChallengeVertex {
                id,
                challenge_id,
                commitment,
                prev: None,
                claim_id,
                staker,
                status,
                ps_id: None,
                ps_last_updated: 0,
                flushed_ps_time: 0,
                sub_challenge: None,
            },
        );
        if status == VertexStatus::Pending {
            self.events.push(ProtocolEvent::VertexAdded {
                challenge_id,
                vertex_id: id,
                height: commitment.height,
                staker,
            });
        }
        id
    }

    fn insert_challenge(
        &mut self,
        id: ChallengeId,
        level: usize,
        parent: ChallengeParent,
        root_state: Option<Hash>,
        root_height: Height,
        challenger: Address,
        now: u64,
    ) -> Challenge {
        let commitment = VertexCommitment {
            height: 0,
            merkle: root_merkle(&id),
        };
        let root_vertex = self.insert_vertex(id, commitment, None, challenger, VertexStatus::Confirmed);
        let challenge = Challenge {
            id,
            level,
            challenge_type: self.levels.challenge_type(level),
            parent,
            root_vertex,
            root_state,
            root_height,
            winning_claim: None,
            challenger,
            created_at: now,
        };
        self.challenges.insert(id, challenge.clone());
        self.events.push(ProtocolEvent::ChallengeStarted {
            challenge_id: id,
            level,
            parent,
            challenger,
        });
        challenge
    }

    fn create_assertion(
        &mut self,
        prev_seq: u64,
        height: Height,
        state_hash: Hash,
        staker: Address,
        now: u64,
    ) -> LedgerResult<Assertion> {
        let prev = self.assertion(prev_seq)?;
        if height <= prev.height {
            return Err(ProtocolError::InvalidHeight(format!(
                "height {} not above predecessor height {}",
                height, prev.height
            )));
        }
        let id = AssertionId::compute(Some(&prev.id), height, &state_hash);
        if self.assertion_seqs.contains_key(&id) {
            return Err(ProtocolError::AlreadyExists(format!("assertion {:?}", id)));
        }
        let assertion = Assertion {
            seq: self.assertions.len() as u64,
            id,
            prev_seq: Some(prev_seq),
            height,
            state_hash,
            staker,
            status: AssertionStatus::Pending,
            created_at: now,
        };
        self.assertion_seqs.insert(id, assertion.seq);
        self.assertions.push(assertion.clone());
        self.events.push(ProtocolEvent::AssertionCreated {
            seq: assertion.seq,
            id,
            prev_seq: assertion.prev_seq,
            height,
            state_hash,
            staker,
        });
        Ok(assertion)
    }

    fn create_succession_challenge(&mut self, parent_seq: u64, staker: Address, now: u64) -> LedgerResult<Challenge> {
        let parent = self.assertion(parent_seq)?.clone();
        let children = self
            .assertions
            .iter()
            .filter(|a| a.prev_seq == Some(parent_seq))
            .count();
        if children < 2 {
            return Err(ProtocolError::InvalidChildren(format!(
                "assertion {} has {} children, at least two required",
                parent_seq, children
            )));
        }
        let id = ChallengeId::compute(parent.id.as_bytes(), 0);
        if self.challenges.contains_key(&id) {
            return Err(ProtocolError::AlreadyExists(format!("challenge {:?}", id)));
        }
        Ok(self.insert_challenge(
            id,
            0,
            ChallengeParent::Assertion {
                id: parent.id,
                seq: parent_seq,
            },
            Some(parent.state_hash),
            parent.height,
            staker,
            now,
        ))
    }

    fn create_sub_challenge(&mut self, vertex_id: VertexId, staker: Address, now: u64) -> LedgerResult<Challenge> {
        let vertex = self.vertex(&vertex_id)?.clone();
        let parent = self.open_challenge(&vertex.challenge_id)?.clone();
        let level = parent.level + 1;
        if level >= self.levels.count() {
            return Err(ProtocolError::InvalidChildren(format!(
                "no level below {} challenge",
                parent.challenge_type
            )));
        }
        if !self.one_step_fork_below(&vertex) {
            return Err(ProtocolError::NotAtOneStepFork(format!("{:?}", vertex_id)));
        }
        if vertex.sub_challenge.is_some() {
            return Err(ProtocolError::AlreadyExists(format!("sub-challenge at {:?}", vertex_id)));
        }
        let id = ChallengeId::compute(vertex_id.as_bytes(), level);
        // the first leaf is only known when the fork sits at the parent root
        let root_state = if vertex.is_root() { parent.root_state } else { None };
        let challenge = self.insert_challenge(
            id,
            level,
            ChallengeParent::Vertex(vertex_id),
            root_state,
            parent.root_height,
            staker,
            now,
        );
        self.vertex_mut(&vertex_id)?.sub_challenge = Some(id);
        Ok(challenge)
    }

    fn add_leaf(&mut self, args: &AddLeafArgs, staker: Address, now: u64) -> LedgerResult<VertexId> {
        let challenge = self.open_challenge(&args.challenge_id)?.clone();
        if args.height == 0 {
            return Err(ProtocolError::InvalidHeight("leaf height must be above the root".to_string()));
        }

        let expected_last = match challenge.parent {
            ChallengeParent::Assertion { seq, .. } => {
                let claim = self
                    .assertion_seqs
                    .get(&AssertionId(args.claim_id.0))
                    .and_then(|seq| self.assertions.get(*seq as usize))
                    .ok_or_else(|| ProtocolError::NotFound(format!("claim assertion {:?}", args.claim_id)))?;
                if claim.prev_seq != Some(seq) {
                    return Err(ProtocolError::InvalidChildren(format!(
                        "assertion {} is not a child of assertion {}",
                        claim.seq, seq
                    )));
                }
                let expected = claim.height - challenge.root_height;
                let max = self.levels.max_height(0).unwrap_or_default();
                if args.height != expected || args.height > max {
                    return Err(ProtocolError::InvalidHeight(format!(
                        "leaf height {} for claim at distance {} (max {})",
                        args.height, expected, max
                    )));
                }
                Some(claim.state_hash)
            }
            ChallengeParent::Vertex(origin) => {
                let claim = self.vertex(&VertexId(args.claim_id.0))?;
                if claim.prev != Some(origin) {
                    return Err(ProtocolError::InvalidChildren(format!(
                        "claim {:?} is not a child of fork {:?}",
                        claim.id, origin
                    )));
                }
                let max = self.levels.max_height(challenge.level).unwrap_or_default();
                if args.height != max {
                    return Err(ProtocolError::InvalidHeight(format!(
                        "leaf height {} must be {} at {} level",
                        args.height, max, challenge.challenge_type
                    )));
                }
                None
            }
        };

        if let Some(root_state) = challenge.root_state {
            if args.first_state != root_state {
                return Err(ProtocolError::FirstStateMismatch(format!(
                    "leaf starts at 0x{}",
                    hex::encode(&args.first_state[..4])
                )));
            }
        }
        if let Some(expected) = expected_last {
            if args.last_state != expected {
                return Err(ProtocolError::LastStateMismatch(format!(
                    "leaf ends at 0x{}",
                    hex::encode(&args.last_state[..4])
                )));
            }
        }
        verify_inclusion(&args.history_root, &args.first_state, 0, &args.first_state_proof, "first state")?;
        verify_inclusion(
            &args.history_root,
            &args.last_state,
            args.height,
            &args.last_state_proof,
            "last state",
        )?;

        let id = VertexId::compute(&args.challenge_id, &args.history_root, args.height);
        if self.vertices.contains_key(&id) {
            return Err(ProtocolError::AlreadyExists(format!("vertex {:?}", id)));
        }
        let root = challenge.root_vertex;
        let mut children = self.child_heights(&root);
        children.push((id, args.height));
        self.guard_ps_change(&root, &children, now)?;

        let commitment = VertexCommitment {
            height: args.height,
            merkle: args.history_root,
        };
        self.insert_vertex(args.challenge_id, commitment, Some(args.claim_id), staker, VertexStatus::Pending);
        self.connect(root, id)?;
        self.refresh_ps(&root, now)?;
        Ok(id)
    }

    /// Check a prefix proof from the history `prefix_root` at `prefix_height`
    /// to the history of `vertex`
    fn check_prefix(
        vertex: &ChallengeVertex,
        prefix_root: &Hash,
        prefix_height: Height,
        proof: &[u8],
    ) -> LedgerResult<()> {
        let args = ProofArgs::decode(proof).map_err(|e| ProtocolError::InvalidPrefix(e.to_string()))?;
        verify_prefix_proof(
            prefix_root,
            prefix_height + 1,
            &vertex.commitment.merkle,
            vertex.height() + 1,
            &args.prefix_expansion,
            &args.prefix_proof,
        )
        .map_err(|e| ProtocolError::InvalidPrefix(e.to_string()))
    }

    fn bisect(&mut self, vertex_id: VertexId, prefix_root: Hash, proof: &[u8], staker: Address, now: u64) -> LedgerResult<VertexId> {
        let vertex = self.vertex(&vertex_id)?.clone();
        self.open_challenge(&vertex.challenge_id)?;
        let prev = self.prev_of(&vertex)?.clone();
        if prev.ps_id == Some(vertex_id) {
            return Err(ProtocolError::CannotBisectPresumptive(format!("{:?}", vertex_id)));
        }
        let to = bisection_point(prev.height(), vertex.height()).map_err(|e| ProtocolError::InvalidHeight(e.to_string()))?;
        let id = VertexId::compute(&vertex.challenge_id, &prefix_root, to);
        if self.vertices.contains_key(&id) {
            return Err(ProtocolError::AlreadyExists(format!("vertex {:?}", id)));
        }
        Self::check_prefix(&vertex, &prefix_root, to, proof)?;

        let mut children: Vec<_> = self
            .child_heights(&prev.id)
            .into_iter()
            .filter(|(child, _)| *child != vertex_id)
            .collect();
        children.push((id, to));
        self.guard_ps_change(&prev.id, &children, now)?;

        let commitment = VertexCommitment {
            height: to,
            merkle: prefix_root,
        };
        self.insert_vertex(vertex.challenge_id, commitment, None, staker, VertexStatus::Pending);
        self.disconnect(&prev.id, &vertex_id);
        self.connect(prev.id, id)?;
        self.connect(id, vertex_id)?;
        self.refresh_ps(&prev.id, now)?;
        self.refresh_ps(&id, now)?;
        Ok(id)
    }

    fn merge(&mut self, vertex_id: VertexId, prefix_root: Hash, proof: &[u8], now: u64) -> LedgerResult<VertexId> {
        let vertex = self.vertex(&vertex_id)?.clone();
        self.open_challenge(&vertex.challenge_id)?;
        let prev = self.prev_of(&vertex)?.clone();
        let to = bisection_point(prev.height(), vertex.height()).map_err(|e| ProtocolError::InvalidHeight(e.to_string()))?;
        let target_id = VertexId::compute(&vertex.challenge_id, &prefix_root, to);
        let target = self.vertex(&target_id)?;
        if target.prev != Some(prev.id) {
            return Err(ProtocolError::InvalidChildren(format!(
                "merge target {:?} does not share predecessor {:?}",
                target_id, prev.id
            )));
        }
        Self::check_prefix(&vertex, &prefix_root, to, proof)?;

        let prev_children: Vec<_> = self
            .child_heights(&prev.id)
            .into_iter()
            .filter(|(child, _)| *child != vertex_id)
            .collect();
        self.guard_ps_change(&prev.id, &prev_children, now)?;
        let mut target_children = self.child_heights(&target_id);
        target_children.push((vertex_id, vertex.height()));
        self.guard_ps_change(&target_id, &target_children, now)?;

        self.disconnect(&prev.id, &vertex_id);
        self.connect(target_id, vertex_id)?;
        self.refresh_ps(&prev.id, now)?;
        self.refresh_ps(&target_id, now)?;
        Ok(target_id)
    }

    fn pending_with_confirmed_prev(&self, vertex_id: &VertexId) -> LedgerResult<(ChallengeVertex, ChallengeVertex)> {
        let vertex = self.vertex(vertex_id)?.clone();
        if vertex.is_confirmed() {
            return Err(ProtocolError::NotPending(format!("{:?}", vertex_id)));
        }
        let prev = self.prev_of(&vertex)?.clone();
        if !prev.is_confirmed() {
            return Err(ProtocolError::PredecessorNotConfirmed(format!("{:?}", prev.id)));
        }
        Ok((vertex, prev))
    }

    fn confirm(&mut self, vertex_id: &VertexId) -> LedgerResult<()> {
        let vertex = self.vertex_mut(vertex_id)?;
        vertex.status = VertexStatus::Confirmed;
        let challenge_id = vertex.challenge_id;
        let claim = vertex.claim_id;
        self.events.push(ProtocolEvent::VertexConfirmed {
            challenge_id,
            vertex_id: *vertex_id,
        });

        let Some(winner) = claim else {
            return Ok(());
        };
        let challenge = self
            .challenges
            .get_mut(&challenge_id)
            .ok_or_else(|| ProtocolError::NotFound(format!("challenge {:?}", challenge_id)))?;
        challenge.winning_claim = Some(winner);
        let block_level = challenge.level == 0;
        self.events.push(ProtocolEvent::ChallengeCompleted { challenge_id, winner });
        info!("Challenge {:?} won by {:?}", challenge_id, winner);

        if block_level {
            if let Some(seq) = self.assertion_seqs.get(&AssertionId(winner.0)).copied() {
                self.assertions[seq as usize].status = AssertionStatus::Confirmed;
                self.latest_confirmed = self.latest_confirmed.max(seq);
            }
        }
        Ok(())
    }

    fn confirm_for_ps_timer(&mut self, vertex_id: VertexId, now: u64) -> LedgerResult<()> {
        let (vertex, _) = self.pending_with_confirmed_prev(&vertex_id)?;
        let timer = self.ps_timer(&vertex, now);
        if timer < self.challenge_period {
            return Err(ProtocolError::PsTimerNotElapsed(format!(
                "{:?} has {} of {} seconds",
                vertex_id, timer, self.challenge_period
            )));
        }
        self.confirm(&vertex_id)
    }

    fn confirm_for_succession_challenge_win(&mut self, vertex_id: VertexId) -> LedgerResult<()> {
        let (_, prev) = self.pending_with_confirmed_prev(&vertex_id)?;
        let sub = prev
            .sub_challenge
            .ok_or_else(|| ProtocolError::NoSubchallengeWin(format!("no sub-challenge at {:?}", prev.id)))?;
        let challenge = self.challenge(&sub)?;
        if challenge.winning_claim != Some(ClaimId::from(vertex_id)) {
            return Err(ProtocolError::NoSubchallengeWin(format!("{:?} did not win {:?}", vertex_id, sub)));
        }
        self.confirm(&vertex_id)
    }

    fn execute_one_step(&mut self, vertex_id: VertexId, data: &OneStepData, verifier: &dyn OneStepVerifier) -> LedgerResult<()> {
        let (vertex, prev) = self.pending_with_confirmed_prev(&vertex_id)?;
        let challenge = self.open_challenge(&vertex.challenge_id)?;
        if !self.levels.is_smallest(challenge.level) {
            return Err(ProtocolError::NotAtOneStepFork(format!(
                "{} challenge is not the small-step level",
                challenge.challenge_type
            )));
        }
        if vertex.height() != prev.height() + 1 || !self.one_step_fork_below(&prev) {
            return Err(ProtocolError::NotAtOneStepFork(format!("{:?}", vertex_id)));
        }
        let root = vertex.commitment.merkle;
        verify_inclusion(&root, &data.before_state, prev.height(), &data.before_state_proof, "before state")?;
        verify_inclusion(&root, &data.after_state, vertex.height(), &data.after_state_proof, "after state")?;
        let after = verifier
            .verify_one_step(&data.before_state, &data.proof)
            .map_err(ProtocolError::OneStepProofFailed)?;
        if after != data.after_state {
            return Err(ProtocolError::OneStepProofFailed(format!(
                "step ends at 0x{}, claimed 0x{}",
                hex::encode(&after[..4]),
                hex::encode(&data.after_state[..4])
            )));
        }
        self.events.push(ProtocolEvent::OneStepProven {
            challenge_id: vertex.challenge_id,
            vertex_id,
        });
        self.confirm(&vertex_id)
    }
}

/// Shared in-memory ledger, bound to one staker per handle
#[derive(Clone)]
pub struct InMemoryLedger {
    state: Arc<Mutex<LedgerState>>,
    verifier: Arc<dyn OneStepVerifier>,
    started: Instant,
    staker: Address,
}

impl std::fmt::Debug for InMemoryLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("InMemoryLedger")
            .field("staker", &hex::encode(self.staker))
            .finish_non_exhaustive()
    }
}

impl InMemoryLedger {
    /// Ledger with a confirmed genesis assertion claiming `genesis_state` at height 0
    pub fn new(
        levels: ChallengeLevels,
        challenge_period: u64,
        genesis_state: Hash,
        verifier: Arc<dyn OneStepVerifier>,
    ) -> Self {
        let id = AssertionId::compute(None, 0, &genesis_state);
        let genesis = Assertion {
            seq: 0,
            id,
            prev_seq: None,
            height: 0,
            state_hash: genesis_state,
            staker: GENESIS_STAKER,
            status: AssertionStatus::Confirmed,
            created_at: 0,
        };
        let state = LedgerState {
            levels,
            challenge_period,
            assertions: vec![genesis],
            assertion_seqs: HashMap::from([(id, 0)]),
            latest_confirmed: 0,
            challenges: HashMap::new(),
            vertices: HashMap::new(),
            children: HashMap::new(),
            events: Vec::new(),
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            verifier,
            started: Instant::now(),
            staker: GENESIS_STAKER,
        }
    }

    /// Handle on the same ledger submitting as `staker`
    pub fn with_staker(&self, staker: Address) -> Self {
        Self {
            staker,
            ..self.clone()
        }
    }

    fn now(&self) -> u64 {
        self.started.elapsed().as_secs()
    }

    fn state(&self) -> LedgerResult<MutexGuard<'_, LedgerState>> {
        self.state
            .lock()
            .map_err(|_| ProtocolError::Transport("ledger state poisoned".to_string()))
    }
}

#[async_trait]
impl Ledger for InMemoryLedger {
    fn staker(&self) -> Address {
        self.staker
    }

    async fn levels(&self) -> LedgerResult<ChallengeLevels> {
        Ok(self.state()?.levels.clone())
    }

    async fn challenge_period_seconds(&self) -> LedgerResult<u64> {
        Ok(self.state()?.challenge_period)
    }

    async fn events_since(&self, cursor: u64) -> LedgerResult<Vec<ProtocolEvent>> {
        let state = self.state()?;
        Ok(state.events.iter().skip(cursor as usize).cloned().collect())
    }

    async fn latest_confirmed(&self) -> LedgerResult<Assertion> {
        let state = self.state()?;
        state.assertion(state.latest_confirmed).cloned()
    }

    async fn num_assertions(&self) -> LedgerResult<u64> {
        Ok(self.state()?.assertions.len() as u64)
    }

    async fn get_assertion(&self, seq: u64) -> LedgerResult<Option<Assertion>> {
        Ok(self.state()?.assertions.get(seq as usize).cloned())
    }

    async fn create_assertion(&self, prev_seq: u64, height: Height, state_hash: Hash) -> LedgerResult<Assertion> {
        let now = self.now();
        self.state()?.create_assertion(prev_seq, height, state_hash, self.staker, now)
    }

    async fn create_succession_challenge(&self, parent_seq: u64) -> LedgerResult<Challenge> {
        let now = self.now();
        self.state()?.create_succession_challenge(parent_seq, self.staker, now)
    }

    async fn create_sub_challenge(&self, vertex: VertexId) -> LedgerResult<Challenge> {
        let now = self.now();
        self.state()?.create_sub_challenge(vertex, self.staker, now)
    }

    async fn get_challenge(&self, id: ChallengeId) -> LedgerResult<Option<Challenge>> {
        Ok(self.state()?.challenges.get(&id).cloned())
    }

    async fn get_vertex(&self, id: VertexId) -> LedgerResult<Option<ChallengeVertex>> {
        Ok(self.state()?.vertices.get(&id).cloned())
    }

    async fn add_leaf(&self, args: AddLeafArgs) -> LedgerResult<VertexId> {
        let now = self.now();
        self.state()?.add_leaf(&args, self.staker, now)
    }

    async fn bisect(&self, vertex: VertexId, prefix_history_root: Hash, prefix_proof: Vec<u8>) -> LedgerResult<VertexId> {
        let now = self.now();
        self.state()?
            .bisect(vertex, prefix_history_root, &prefix_proof, self.staker, now)
    }

    async fn merge(&self, vertex: VertexId, prefix_history_root: Hash, prefix_proof: Vec<u8>) -> LedgerResult<VertexId> {
        let now = self.now();
        self.state()?.merge(vertex, prefix_history_root, &prefix_proof, now)
    }

    async fn children_are_at_one_step_fork(&self, vertex: VertexId) -> LedgerResult<bool> {
        let state = self.state()?;
        let vertex = state.vertex(&vertex)?;
        Ok(state.one_step_fork_below(vertex))
    }

    async fn is_presumptive_successor(&self, vertex: VertexId) -> LedgerResult<bool> {
        let state = self.state()?;
        let vertex = state.vertex(&vertex)?;
        let Some(prev) = vertex.prev else {
            return Ok(false);
        };
        Ok(state.vertex(&prev)?.ps_id == Some(vertex.id))
    }

    async fn has_confirmed_sibling(&self, vertex: VertexId) -> LedgerResult<bool> {
        let state = self.state()?;
        let Some(prev) = state.vertex(&vertex)?.prev else {
            return Ok(false);
        };
        Ok(state
            .children
            .get(&prev)
            .into_iter()
            .flatten()
            .filter(|id| **id != vertex)
            .any(|id| state.vertices.get(id).is_some_and(ChallengeVertex::is_confirmed)))
    }

    async fn ps_timer(&self, vertex: VertexId) -> LedgerResult<u64> {
        let now = self.now();
        let state = self.state()?;
        let vertex = state.vertex(&vertex)?;
        Ok(state.ps_timer(vertex, now))
    }

    async fn confirm_for_ps_timer(&self, vertex: VertexId) -> LedgerResult<()> {
        let now = self.now();
        self.state()?.confirm_for_ps_timer(vertex, now)
    }

    async fn confirm_for_succession_challenge_win(&self, vertex: VertexId) -> LedgerResult<()> {
        self.state()?.confirm_for_succession_challenge_win(vertex)
    }

    async fn execute_one_step(&self, vertex: VertexId, data: OneStepData) -> LedgerResult<()> {
        let verifier = self.verifier.clone();
        self.state()?.execute_one_step(vertex, &data, verifier.as_ref())
    }
}
