//! Challenge vertex tracker
//!
//! One tracker follows one vertex the validator owns or agrees with. It wakes
//! on a fixed interval, checks whether its game is over, and otherwise
//! performs at most one state transition, moving its vertex toward
//! confirmation.

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xlayer_core::{is_one_step_fork, ChallengeId, ChallengeVertex, ClaimId, Ledger, ProtocolError, VertexId};

use crate::fsm::{Effect, Fsm, TrackerState, Trigger};
use crate::moves;
use crate::registry::TrackerSpawner;
use crate::state_provider::{HistoryAddress, StateProvider};

/// Dependencies shared by every tracker of one validator
pub struct TrackerContext {
    /// Validator name for log lines
    pub name: String,
    /// Ledger handle bound to the validator's staker
    pub ledger: Arc<dyn Ledger>,
    /// Local history
    pub provider: Arc<StateProvider>,
    /// Presumptive-successor time needed for confirmation
    pub challenge_period: u64,
    /// Wake interval
    pub interval: Duration,
}

impl fmt::Debug for TrackerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TrackerContext")
            .field("name", &self.name)
            .field("challenge_period", &self.challenge_period)
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

/// What a tracker follows
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TrackerSpec {
    /// Enclosing challenge
    pub challenge_id: ChallengeId,
    /// Tracked vertex
    pub vertex_id: VertexId,
    /// Local history the vertex commits to
    pub address: HistoryAddress,
}

/// Why a tracker stopped
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TrackerExit {
    /// The tracked vertex is confirmed
    Confirmed,
    /// A rival sibling is confirmed
    SiblingConfirmed,
    /// The enclosing challenge has a winner
    ChallengeCompleted,
    /// Shut down from outside
    Cancelled,
}

impl fmt::Display for TrackerExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Confirmed => write!(f, "vertex confirmed"),
            Self::SiblingConfirmed => write!(f, "sibling confirmed"),
            Self::ChallengeCompleted => write!(f, "challenge completed"),
            Self::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// State machine driving one vertex
#[derive(Debug)]
pub struct VertexTracker {
    ctx: Arc<TrackerContext>,
    spec: TrackerSpec,
    fsm: Fsm,
    fork_point: Option<ChallengeVertex>,
    spawner: TrackerSpawner,
}

impl VertexTracker {
    /// Tracker in the started state
    pub const fn new(ctx: Arc<TrackerContext>, spec: TrackerSpec, spawner: TrackerSpawner) -> Self {
        Self {
            ctx,
            spec,
            fsm: Fsm::new(),
            fork_point: None,
            spawner,
        }
    }

    /// Tracked vertex
    pub const fn vertex_id(&self) -> VertexId {
        self.spec.vertex_id
    }

    /// Current state
    pub const fn state(&self) -> TrackerState {
        self.fsm.state()
    }

    /// Wake every interval until the game is over or `cancel` fires
    pub async fn run(mut self, cancel: CancellationToken) -> Result<TrackerExit> {
        info!(
            "[{}] Tracking {} vertex {} in {:?}",
            self.ctx.name,
            self.level_name(),
            self.spec.vertex_id.short(),
            self.spec.challenge_id
        );
        let mut ticker = interval(self.ctx.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(TrackerExit::Cancelled),
                _ = ticker.tick() => {}
            }

            match self.should_complete().await {
                Ok(Some(exit)) => {
                    info!(
                        "[{}] Stopped tracking vertex {}: {}",
                        self.ctx.name,
                        self.spec.vertex_id.short(),
                        exit
                    );
                    return Ok(exit);
                }
                Ok(None) => {}
                Err(e) => {
                    warn!("[{}] Failed to read vertex {}: {}", self.ctx.name, self.spec.vertex_id.short(), e);
                    continue;
                }
            }

            if let Err(e) = self.act().await {
                warn!(
                    "[{}] Vertex {} failed in state {}: {}",
                    self.ctx.name,
                    self.spec.vertex_id.short(),
                    self.fsm.state(),
                    e
                );
            }
        }
    }

    fn level_name(&self) -> xlayer_core::ChallengeType {
        self.ctx.provider.challenge_type(&self.spec.address)
    }

    async fn vertex(&self) -> Result<ChallengeVertex> {
        self.ctx
            .ledger
            .get_vertex(self.spec.vertex_id)
            .await?
            .ok_or_else(|| anyhow!("vertex {} not found", self.spec.vertex_id.short()))
    }

    async fn prev(&self, vertex: &ChallengeVertex) -> Result<ChallengeVertex> {
        let prev = vertex
            .prev
            .ok_or_else(|| anyhow!("vertex {} is a challenge root", vertex.id.short()))?;
        self.ctx
            .ledger
            .get_vertex(prev)
            .await?
            .ok_or_else(|| anyhow!("no prev vertex found for {}", vertex.id.short()))
    }

    fn fork_point(&self) -> Result<&ChallengeVertex> {
        self.fork_point
            .as_ref()
            .ok_or_else(|| anyhow!("no fork point recorded in state {}", self.fsm.state()))
    }

    async fn should_complete(&self) -> Result<Option<TrackerExit>> {
        let challenge = self
            .ctx
            .ledger
            .get_challenge(self.spec.challenge_id)
            .await?
            .ok_or_else(|| anyhow!("challenge {:?} not found", self.spec.challenge_id))?;
        let vertex = self.vertex().await?;
        if vertex.is_confirmed() {
            return Ok(Some(TrackerExit::Confirmed));
        }
        if challenge.completed() {
            return Ok(Some(TrackerExit::ChallengeCompleted));
        }
        if self.ctx.ledger.has_confirmed_sibling(vertex.id).await? {
            return Ok(Some(TrackerExit::SiblingConfirmed));
        }
        Ok(None)
    }

    /// Perform the work of the current state and fire the resulting trigger
    pub async fn act(&mut self) -> Result<()> {
        let trigger = match self.fsm.state() {
            TrackerState::Started => Some(self.evaluate().await?),
            TrackerState::AtOneStepFork => Some(self.at_one_step_fork()),
            TrackerState::AtOneStepProof => self.submit_one_step_proof().await?,
            TrackerState::OpeningSubchallenge => Some(self.open_subchallenge().await?),
            TrackerState::AddingSubchallengeLeaf => Some(self.add_subchallenge_leaf().await?),
            TrackerState::AwaitingSubchallengeResolution => self.check_subchallenge().await?,
            TrackerState::Bisecting => Some(self.bisect().await),
            TrackerState::Merging => Some(self.merge().await),
            TrackerState::Presumptive => self.check_presumptive().await?,
            TrackerState::Confirming => self.confirm().await?,
        };
        let Some(trigger) = trigger else {
            return Ok(());
        };

        let from = self.fsm.state();
        let name = trigger.name();
        let effect = self.fsm.fire(trigger)?;
        debug!(
            "[{}] Vertex {} {} -> {} on {}",
            self.ctx.name,
            self.spec.vertex_id.short(),
            from,
            self.fsm.state(),
            name
        );

        match effect {
            Effect::None => {}
            Effect::TrackVertex(vertex) => self.spawner.spawn(TrackerSpec {
                challenge_id: self.spec.challenge_id,
                vertex_id: vertex,
                address: self.spec.address.clone(),
            })?,
            Effect::TrackSubchallengeLeaf { challenge, leaf } => {
                let address = self.spec.address.descend(self.fork_point()?.height());
                self.spawner.spawn(TrackerSpec {
                    challenge_id: challenge,
                    vertex_id: leaf,
                    address,
                })?;
            }
        }
        Ok(())
    }

    async fn evaluate(&mut self) -> Result<Trigger> {
        let vertex = self.vertex().await?;
        let prev = self.prev(&vertex).await?;
        if is_one_step_fork(prev.height(), vertex.height())
            && self.ctx.ledger.children_are_at_one_step_fork(prev.id).await?
        {
            let fork_point = prev.id;
            self.fork_point = Some(prev);
            return Ok(Trigger::ActOneStepFork { fork_point });
        }
        if self.ctx.ledger.is_presumptive_successor(vertex.id).await? {
            return Ok(Trigger::MarkPresumptive);
        }
        Ok(Trigger::Bisect)
    }

    fn at_one_step_fork(&self) -> Trigger {
        let Some(fork) = &self.fork_point else {
            return Trigger::Reevaluate;
        };
        info!(
            "[{}] Reached one-step-fork at height {} and commitment {} in {} challenge",
            self.ctx.name,
            fork.height(),
            fork.commitment.short_merkle(),
            self.level_name()
        );
        if self.ctx.provider.levels().is_smallest(self.spec.address.level) {
            Trigger::ActOneStepProof
        } else {
            Trigger::OpenSubchallenge
        }
    }

    async fn submit_one_step_proof(&self) -> Result<Option<Trigger>> {
        let fork = self.fork_point()?;
        let fork = self
            .ctx
            .ledger
            .get_vertex(fork.id)
            .await?
            .ok_or_else(|| anyhow!("fork vertex {} vanished", fork.id.short()))?;
        if !fork.is_confirmed() {
            debug!("[{}] Waiting for fork point {} to confirm", self.ctx.name, fork.id.short());
            return Ok(None);
        }
        let data = self
            .ctx
            .provider
            .one_step_proof(&self.spec.address, fork.height())
            .await?;
        self.ctx.ledger.execute_one_step(self.spec.vertex_id, data).await?;
        info!(
            "[{}] Submitted one-step proof for vertex {} at height {}",
            self.ctx.name,
            self.spec.vertex_id.short(),
            fork.height()
        );
        Ok(Some(Trigger::OneStepProven))
    }

    async fn open_subchallenge(&self) -> Result<Trigger> {
        let fork = self.fork_point()?;
        let challenge = match self.ctx.ledger.create_sub_challenge(fork.id).await {
            Ok(challenge) => {
                info!(
                    "[{}] Opened {} challenge {:?} at fork {}",
                    self.ctx.name,
                    challenge.challenge_type,
                    challenge.id,
                    fork.id.short()
                );
                challenge.id
            }
            Err(e) if e.is_already_exists() => {
                let id = ChallengeId::compute(fork.id.as_bytes(), self.spec.address.level + 1);
                self.ctx
                    .ledger
                    .get_challenge(id)
                    .await?
                    .ok_or_else(|| anyhow!("sub-challenge {:?} reported but not found", id))?
                    .id
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Trigger::SubchallengeOpened { challenge })
    }

    async fn add_subchallenge_leaf(&self) -> Result<Trigger> {
        let Some(Trigger::SubchallengeOpened { challenge }) = self.fsm.source() else {
            return Err(anyhow!("no sub-challenge recorded"));
        };
        let challenge = self
            .ctx
            .ledger
            .get_challenge(*challenge)
            .await?
            .ok_or_else(|| anyhow!("sub-challenge {:?} not found", challenge))?;
        let address = self.spec.address.descend(self.fork_point()?.height());
        let leaf = moves::add_leaf(
            self.ctx.ledger.as_ref(),
            &self.ctx.provider,
            &challenge,
            ClaimId::from(self.spec.vertex_id),
            &address,
            None,
        )
        .await?;
        Ok(Trigger::SubchallengeLeafAdded {
            challenge: challenge.id,
            leaf,
        })
    }

    async fn check_subchallenge(&self) -> Result<Option<Trigger>> {
        let Some(Trigger::SubchallengeLeafAdded { challenge, .. }) = self.fsm.source() else {
            return Err(anyhow!("no sub-challenge leaf recorded"));
        };
        let challenge = self
            .ctx
            .ledger
            .get_challenge(*challenge)
            .await?
            .ok_or_else(|| anyhow!("sub-challenge {:?} not found", challenge))?;
        match challenge.winning_claim {
            Some(winner) if winner == ClaimId::from(self.spec.vertex_id) => {
                info!(
                    "[{}] Vertex {} won {} challenge {:?}",
                    self.ctx.name,
                    self.spec.vertex_id.short(),
                    challenge.challenge_type,
                    challenge.id
                );
                Ok(Some(Trigger::SubchallengeWon))
            }
            Some(winner) => {
                debug!("[{}] Sub-challenge {:?} won by {:?}", self.ctx.name, challenge.id, winner);
                Ok(None)
            }
            None => Ok(None),
        }
    }

    async fn bisect(&self) -> Trigger {
        let result = async {
            let vertex = self.vertex().await?;
            let prev = self.prev(&vertex).await?;
            moves::bisect(self.ctx.ledger.as_ref(), &self.ctx.provider, &vertex, &prev, &self.spec.address).await
        }
        .await;
        match result {
            Ok(vertex) => Trigger::Bisected { vertex },
            Err(e) if moves::is_already_exists(&e) => Trigger::BisectionExists,
            Err(e) => {
                warn!(
                    "[{}] Could not bisect vertex {}: {}",
                    self.ctx.name,
                    self.spec.vertex_id.short(),
                    e
                );
                Trigger::Reevaluate
            }
        }
    }

    async fn merge(&self) -> Trigger {
        let result = async {
            let vertex = self.vertex().await?;
            let prev = self.prev(&vertex).await?;
            moves::merge(self.ctx.ledger.as_ref(), &self.ctx.provider, &vertex, &prev, &self.spec.address).await
        }
        .await;
        match result {
            Ok(vertex) => Trigger::Merged { vertex },
            Err(e) => {
                warn!(
                    "[{}] Could not merge vertex {}: {}",
                    self.ctx.name,
                    self.spec.vertex_id.short(),
                    e
                );
                Trigger::Reevaluate
            }
        }
    }

    async fn check_presumptive(&self) -> Result<Option<Trigger>> {
        let ledger = &self.ctx.ledger;
        if !ledger.is_presumptive_successor(self.spec.vertex_id).await? {
            info!(
                "[{}] Vertex {} lost presumptive status",
                self.ctx.name,
                self.spec.vertex_id.short()
            );
            return Ok(Some(Trigger::LostPresumptive));
        }
        let vertex = self.vertex().await?;
        if !self.prev(&vertex).await?.is_confirmed() {
            return Ok(None);
        }
        let timer = ledger.ps_timer(vertex.id).await?;
        if timer >= self.ctx.challenge_period {
            return Ok(Some(Trigger::PsTimerElapsed));
        }
        Ok(None)
    }

    async fn confirm(&self) -> Result<Option<Trigger>> {
        let ledger = &self.ctx.ledger;
        let vertex = self.spec.vertex_id;
        let result = match self.fsm.source() {
            Some(Trigger::SubchallengeWon) => ledger.confirm_for_succession_challenge_win(vertex).await,
            _ => ledger.confirm_for_ps_timer(vertex).await,
        };
        match result {
            Ok(()) => {
                info!(
                    "[{}] Confirmed {} vertex {}",
                    self.ctx.name,
                    self.level_name(),
                    vertex.short()
                );
                Ok(Some(Trigger::Confirmed))
            }
            Err(ProtocolError::PredecessorNotConfirmed(_)) => {
                debug!("[{}] Waiting for predecessor of {} to confirm", self.ctx.name, vertex.short());
                Ok(None)
            }
            Err(ProtocolError::PsTimerNotElapsed(_)) => Ok(Some(Trigger::Reevaluate)),
            Err(e) => Err(e.into()),
        }
    }
}
