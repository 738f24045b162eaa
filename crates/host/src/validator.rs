//! Validator
//!
//! Watches the ledger's event log, disputes assertions that disagree with
//! local execution, joins block challenges on the honest side, and
//! periodically posts new assertions on top of the latest valid one. Every
//! challenge vertex it creates is handed to the tracker registry.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, Result};
use tokio::time::{interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use xlayer_core::{Assertion, AssertionId, Challenge, ChallengeId, ChallengeParent, Ledger, ProtocolEvent};

use crate::config::Config;
use crate::moves;
use crate::registry::{RegistryStatus, TrackerRegistry, TrackerSpawner};
use crate::state_provider::{HistoryAddress, ProviderError, StateProvider};
use crate::tracker::{TrackerContext, TrackerSpec};

/// Attempts for an event failing with a non-transient error
const MAX_EVENT_ATTEMPTS: u32 = 5;

/// Validator timing and identity
#[derive(Clone, Debug)]
pub struct ValidatorOptions {
    /// Name used in log lines
    pub name: String,
    /// Event poll interval
    pub poll_interval: Duration,
    /// Assertion post interval, none to never post
    pub post_interval: Option<Duration>,
    /// Tracker wake interval
    pub tracker_interval: Duration,
}

impl From<&Config> for ValidatorOptions {
    fn from(config: &Config) -> Self {
        Self {
            name: config.name.clone(),
            poll_interval: config.poll_interval(),
            post_interval: (config.post_interval_secs > 0).then_some(config.post_interval()),
            tracker_interval: config.tracker_interval(),
        }
    }
}

#[derive(Debug)]
struct PendingEvent {
    event: ProtocolEvent,
    attempts: u32,
}

/// Challenge engine of one staker
pub struct Validator {
    options: ValidatorOptions,
    ledger: Arc<dyn Ledger>,
    provider: Arc<StateProvider>,
    cursor: u64,
    retry: VecDeque<PendingEvent>,
    joined: HashSet<ChallengeId>,
}

impl std::fmt::Debug for Validator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Validator")
            .field("name", &self.options.name)
            .field("staker", &hex::encode(self.ledger.staker()))
            .field("cursor", &self.cursor)
            .finish_non_exhaustive()
    }
}

impl Validator {
    /// Validator submitting through `ledger` and executing with `provider`
    pub fn new(options: ValidatorOptions, ledger: Arc<dyn Ledger>, provider: Arc<StateProvider>) -> Self {
        Self {
            options,
            ledger,
            provider,
            cursor: 0,
            retry: VecDeque::new(),
            joined: HashSet::new(),
        }
    }

    /// Run until `cancel` fires, then wait for every tracker to stop
    pub async fn run(mut self, cancel: CancellationToken) -> Result<RegistryStatus> {
        let challenge_period = self.ledger.challenge_period_seconds().await?;
        info!("[{}] Validator starting...", self.options.name);
        info!("  Staker: 0x{}", hex::encode(self.ledger.staker()));
        info!("  Levels: {:?}", self.provider.levels().heights());
        info!("  Challenge period: {}s", challenge_period);

        let ctx = Arc::new(TrackerContext {
            name: self.options.name.clone(),
            ledger: self.ledger.clone(),
            provider: self.provider.clone(),
            challenge_period,
            interval: self.options.tracker_interval,
        });
        let registry = TrackerRegistry::new(ctx, cancel.child_token());
        let spawner = registry.spawner();
        let registry_task = tokio::spawn(registry.run());

        let mut poll = interval(self.options.poll_interval);
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let posting = self.options.post_interval.is_some();
        let mut post = interval(self.options.post_interval.unwrap_or(self.options.poll_interval));
        post.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = poll.tick() => {
                    if let Err(e) = self.poll_events(&spawner).await {
                        warn!("[{}] Failed to poll ledger events: {}", self.options.name, e);
                    }
                }
                _ = post.tick(), if posting => {
                    if let Err(e) = self.post_latest_assertion().await {
                        warn!("[{}] Failed to post assertion: {}", self.options.name, e);
                    }
                }
            }
        }

        info!("[{}] Validator stopping", self.options.name);
        Ok(registry_task.await?)
    }

    /// Handle new events plus earlier failures
    pub async fn poll_events(&mut self, spawner: &TrackerSpawner) -> Result<()> {
        let mut pending: Vec<PendingEvent> = self.retry.drain(..).collect();
        let events = self.ledger.events_since(self.cursor).await?;
        self.cursor += events.len() as u64;
        pending.extend(events.into_iter().map(|event| PendingEvent { event, attempts: 0 }));

        for mut item in pending {
            let Err(e) = self.handle_event(&item.event, spawner).await else {
                continue;
            };
            let transient = e
                .downcast_ref::<ProviderError>()
                .is_some_and(ProviderError::is_not_yet_available);
            if transient {
                debug!("[{}] Deferring event, local execution behind: {}", self.options.name, e);
                self.retry.push_back(item);
                continue;
            }
            item.attempts += 1;
            if item.attempts < MAX_EVENT_ATTEMPTS {
                warn!("[{}] Failed to handle event (attempt {}): {}", self.options.name, item.attempts, e);
                self.retry.push_back(item);
            } else {
                warn!("[{}] Dropping event after {} attempts: {}", self.options.name, item.attempts, e);
            }
        }
        Ok(())
    }

    async fn handle_event(&mut self, event: &ProtocolEvent, spawner: &TrackerSpawner) -> Result<()> {
        match event {
            ProtocolEvent::AssertionCreated { seq, .. } => self.on_assertion_created(*seq, spawner).await,
            ProtocolEvent::ChallengeStarted {
                challenge_id,
                level: 0,
                parent: ChallengeParent::Assertion { seq, .. },
                ..
            } => self.on_block_challenge(*challenge_id, *seq, spawner).await,
            _ => Ok(()),
        }
    }

    async fn assertion(&self, seq: u64) -> Result<Assertion> {
        self.ledger
            .get_assertion(seq)
            .await?
            .ok_or_else(|| anyhow!("assertion {} not found", seq))
    }

    async fn on_assertion_created(&mut self, seq: u64, spawner: &TrackerSpawner) -> Result<()> {
        let assertion = self.assertion(seq).await?;
        if assertion.is_genesis() || assertion.staker == self.ledger.staker() {
            return Ok(());
        }
        if self.provider.agrees_with(assertion.commitment()).await? {
            debug!("[{}] Agreed with assertion {} at height {}", self.options.name, seq, assertion.height);
            return Ok(());
        }
        let prev_seq = assertion
            .prev_seq
            .ok_or_else(|| anyhow!("assertion {} has no predecessor", seq))?;
        warn!(
            "[{}] Disagreed with assertion {} at height {} (state 0x{})",
            self.options.name,
            seq,
            assertion.height,
            hex::encode(&assertion.state_hash[..4])
        );

        let rival = match self.agreeing_child(prev_seq).await? {
            Some(rival) => rival,
            None => self.post_rival(prev_seq, assertion.height).await?,
        };
        let challenge = self.ensure_challenge(prev_seq).await?;
        self.join_challenge(&challenge, &rival, spawner).await
    }

    async fn on_block_challenge(&mut self, id: ChallengeId, parent_seq: u64, spawner: &TrackerSpawner) -> Result<()> {
        if self.joined.contains(&id) {
            return Ok(());
        }
        let Some(child) = self.agreeing_child(parent_seq).await? else {
            debug!("[{}] No agreeing child under assertion {}", self.options.name, parent_seq);
            return Ok(());
        };
        let challenge = self
            .ledger
            .get_challenge(id)
            .await?
            .ok_or_else(|| anyhow!("challenge {:?} not found", id))?;
        self.join_challenge(&challenge, &child, spawner).await
    }

    /// First child of `parent_seq` matching local execution; children above
    /// the local head are skipped
    async fn agreeing_child(&self, parent_seq: u64) -> Result<Option<Assertion>> {
        let count = self.ledger.num_assertions().await?;
        for seq in parent_seq + 1..count {
            let child = self.assertion(seq).await?;
            if child.prev_seq != Some(parent_seq) {
                continue;
            }
            match self.provider.agrees_with(child.commitment()).await {
                Ok(true) => return Ok(Some(child)),
                Ok(false) => {}
                Err(e) if e.is_not_yet_available() => {}
                Err(e) => return Err(e.into()),
            }
        }
        Ok(None)
    }

    async fn post_rival(&self, prev_seq: u64, height: u64) -> Result<Assertion> {
        let state_hash = self.provider.state_hash_at(height).await?;
        match self.ledger.create_assertion(prev_seq, height, state_hash).await {
            Ok(assertion) => {
                info!(
                    "[{}] Posted rival assertion {} at height {}",
                    self.options.name, assertion.seq, height
                );
                Ok(assertion)
            }
            Err(e) if e.is_already_exists() => {
                let prev = self.assertion(prev_seq).await?;
                let id = AssertionId::compute(Some(&prev.id), height, &state_hash);
                self.find_assertion(id).await
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn find_assertion(&self, id: AssertionId) -> Result<Assertion> {
        let count = self.ledger.num_assertions().await?;
        for seq in (0..count).rev() {
            let assertion = self.assertion(seq).await?;
            if assertion.id == id {
                return Ok(assertion);
            }
        }
        Err(anyhow!("assertion {:?} reported but not found", id))
    }

    async fn ensure_challenge(&self, parent_seq: u64) -> Result<Challenge> {
        match self.ledger.create_succession_challenge(parent_seq).await {
            Ok(challenge) => {
                info!(
                    "[{}] Opened block challenge {:?} on assertion {}",
                    self.options.name, challenge.id, parent_seq
                );
                Ok(challenge)
            }
            Err(e) if e.is_already_exists() => {
                let parent = self.assertion(parent_seq).await?;
                let id = ChallengeId::compute(parent.id.as_bytes(), 0);
                self.ledger
                    .get_challenge(id)
                    .await?
                    .ok_or_else(|| anyhow!("challenge {:?} reported but not found", id))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn join_challenge(&mut self, challenge: &Challenge, claim: &Assertion, spawner: &TrackerSpawner) -> Result<()> {
        if self.joined.contains(&challenge.id) {
            return Ok(());
        }
        let address = HistoryAddress::block(challenge.root_height);
        let height = claim
            .height
            .checked_sub(challenge.root_height)
            .ok_or_else(|| anyhow!("assertion {} below challenge root", claim.seq))?;
        let leaf = moves::add_leaf(
            self.ledger.as_ref(),
            &self.provider,
            challenge,
            claim.id.into(),
            &address,
            Some(height),
        )
        .await?;
        spawner.spawn(TrackerSpec {
            challenge_id: challenge.id,
            vertex_id: leaf,
            address,
        })?;
        self.joined.insert(challenge.id);
        info!(
            "[{}] Joined block challenge {:?} for assertion {}",
            self.options.name, challenge.id, claim.seq
        );
        Ok(())
    }

    /// Walk from the latest confirmed assertion through children that match
    /// local execution
    pub async fn find_latest_valid_assertion(&self) -> Result<Assertion> {
        let mut anchor = self.ledger.latest_confirmed().await?;
        while let Some(child) = self.agreeing_child(anchor.seq).await? {
            anchor = child;
        }
        Ok(anchor)
    }

    /// Post local state on top of the latest valid assertion
    pub async fn post_latest_assertion(&self) -> Result<Option<Assertion>> {
        let anchor = self.find_latest_valid_assertion().await?;
        let head = self.provider.head().await?;
        let span = self
            .provider
            .levels()
            .max_height(0)
            .ok_or_else(|| anyhow!("no block level configured"))?;
        let target = head.min(anchor.height + span);
        if target <= anchor.height {
            debug!("[{}] Nothing to post above height {}", self.options.name, anchor.height);
            return Ok(None);
        }

        let state_hash = self.provider.state_hash_at(target).await?;
        match self.ledger.create_assertion(anchor.seq, target, state_hash).await {
            Ok(assertion) => {
                info!(
                    "[{}] Posted assertion {} at height {} on top of {}",
                    self.options.name, assertion.seq, target, anchor.seq
                );
                Ok(Some(assertion))
            }
            Err(e) if e.is_already_exists() => {
                debug!("[{}] Assertion at height {} already posted", self.options.name, target);
                Ok(None)
            }
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use xlayer_core::{ChallengeLevels, ExecutionProvider};

    use super::*;
    use crate::cache::HistoryCache;
    use crate::ledger::InMemoryLedger;
    use crate::simulated::{Divergence, SimulatedExecution, SimulatedMachine, SimulatedVerifier};

    fn options(name: &str) -> ValidatorOptions {
        ValidatorOptions {
            name: name.to_string(),
            poll_interval: Duration::from_secs(1),
            post_interval: None,
            tracker_interval: Duration::from_secs(1),
        }
    }

    fn validator(
        ledger: &InMemoryLedger,
        levels: &ChallengeLevels,
        staker: u8,
        execution: SimulatedExecution,
        dir: &std::path::Path,
    ) -> Validator {
        let provider = StateProvider::new(Arc::new(execution), HistoryCache::new(dir), levels.clone());
        Validator::new(
            options(&format!("v{}", staker)),
            Arc::new(ledger.with_staker([staker; 20])),
            Arc::new(provider),
        )
    }

    fn ledger(levels: &ChallengeLevels) -> InMemoryLedger {
        let genesis = SimulatedMachine::genesis().machine_finished_hash();
        InMemoryLedger::new(levels.clone(), 10, genesis, Arc::new(SimulatedVerifier))
    }

    #[tokio::test]
    async fn test_post_is_bounded_by_block_level() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![4, 2]).unwrap();
        let ledger = ledger(&levels);
        let alice = validator(&ledger, &levels, 1, SimulatedExecution::honest(&levels, 10), dir.path());

        let first = alice.post_latest_assertion().await.unwrap().unwrap();
        assert_eq!((first.seq, first.prev_seq, first.height), (1, Some(0), 4));
        let second = alice.post_latest_assertion().await.unwrap().unwrap();
        assert_eq!((second.prev_seq, second.height), (Some(1), 8));
        let third = alice.post_latest_assertion().await.unwrap().unwrap();
        assert_eq!(third.height, 10);
        assert!(alice.post_latest_assertion().await.unwrap().is_none());
        assert_eq!(alice.find_latest_valid_assertion().await.unwrap().seq, third.seq);
    }

    #[tokio::test]
    async fn test_latest_valid_skips_invalid_branch() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![4, 2]).unwrap();
        let ledger = ledger(&levels);
        let evil_exec = SimulatedExecution::new(&levels, 8, Some(Divergence { message: 1, opcode: 1 }));
        let evil_state = evil_exec.state_hash_at(4).await.unwrap();
        ledger
            .with_staker([9u8; 20])
            .create_assertion(0, 4, evil_state)
            .await
            .unwrap();

        let alice = validator(&ledger, &levels, 1, SimulatedExecution::honest(&levels, 8), dir.path());
        assert_eq!(alice.find_latest_valid_assertion().await.unwrap().seq, 0);
        let posted = alice.post_latest_assertion().await.unwrap().unwrap();
        assert_eq!((posted.prev_seq, posted.height), (Some(0), 4));
        assert_eq!(alice.find_latest_valid_assertion().await.unwrap().seq, posted.seq);
    }

    #[tokio::test]
    async fn test_walk_stops_where_execution_is_behind() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![4, 2]).unwrap();
        let ledger = ledger(&levels);
        let fast = SimulatedExecution::honest(&levels, 8);
        let state = fast.state_hash_at(8).await.unwrap();
        ledger
            .with_staker([9u8; 20])
            .create_assertion(0, 8, state)
            .await
            .unwrap();

        let slow = validator(&ledger, &levels, 1, SimulatedExecution::honest(&levels, 4), dir.path());
        assert_eq!(slow.find_latest_valid_assertion().await.unwrap().seq, 0);
    }

    #[tokio::test]
    async fn test_disagreement_opens_challenge_and_spawns_tracker() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4]).unwrap();
        let ledger = ledger(&levels);
        let evil_exec = SimulatedExecution::new(&levels, 8, Some(Divergence { message: 2, opcode: 1 }));
        let evil_state = evil_exec.state_hash_at(8).await.unwrap();
        ledger
            .with_staker([9u8; 20])
            .create_assertion(0, 8, evil_state)
            .await
            .unwrap();

        let mut alice = validator(&ledger, &levels, 1, SimulatedExecution::honest(&levels, 8), dir.path());
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        let spawner = TrackerSpawner::new(tx);
        alice.poll_events(&spawner).await.unwrap();

        let rival = ledger.get_assertion(2).await.unwrap().unwrap();
        assert_eq!(rival.staker, [1u8; 20]);
        assert_eq!(rival.height, 8);
        let genesis = ledger.get_assertion(0).await.unwrap().unwrap();
        let challenge_id = ChallengeId::compute(genesis.id.as_bytes(), 0);
        let spec = rx.try_recv().unwrap();
        assert_eq!(spec.challenge_id, challenge_id);
        assert_eq!(spec.address, HistoryAddress::block(0));
        let leaf = ledger.get_vertex(spec.vertex_id).await.unwrap().unwrap();
        assert_eq!(leaf.height(), 8);

        // the challenge event that follows is already handled
        alice.poll_events(&spawner).await.unwrap();
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_assertion_ahead_of_execution_is_retried() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4]).unwrap();
        let ledger = ledger(&levels);
        let state = SimulatedExecution::honest(&levels, 8).state_hash_at(8).await.unwrap();
        ledger
            .with_staker([9u8; 20])
            .create_assertion(0, 8, state)
            .await
            .unwrap();

        let mut slow = validator(&ledger, &levels, 1, SimulatedExecution::honest(&levels, 4), dir.path());
        let (tx, _rx) = tokio::sync::mpsc::unbounded_channel();
        slow.poll_events(&TrackerSpawner::new(tx)).await.unwrap();
        assert_eq!(slow.retry.len(), 1);
        assert_eq!(ledger.num_assertions().await.unwrap(), 2);
    }
}
