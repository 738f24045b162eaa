//! Tracker registry
//!
//! Owns every running vertex tracker. Trackers ask for new trackers through a
//! [`TrackerSpawner`]; the registry starts at most one per vertex and records
//! how each one ended.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::{mpsc, RwLock};
use tokio::task::{Id, JoinError, JoinSet};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};
use xlayer_core::VertexId;

use crate::tracker::{TrackerContext, TrackerExit, TrackerSpec, VertexTracker};

/// Handle for requesting new trackers
#[derive(Clone, Debug)]
pub struct TrackerSpawner {
    tx: mpsc::UnboundedSender<TrackerSpec>,
}

impl TrackerSpawner {
    /// Spawner feeding `tx`
    pub const fn new(tx: mpsc::UnboundedSender<TrackerSpec>) -> Self {
        Self { tx }
    }

    /// Ask the registry to track `spec`
    pub fn spawn(&self, spec: TrackerSpec) -> Result<()> {
        self.tx
            .send(spec)
            .map_err(|e| anyhow!("tracker registry stopped, dropped vertex {}", e.0.vertex_id.short()))
    }
}

/// How a tracker ended
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum TrackerOutcome {
    /// Returned normally
    Exited(TrackerExit),
    /// Returned an error
    Failed(String),
    /// Task panicked
    Panicked(String),
}

/// Snapshot of the registry
#[derive(Clone, Debug, Default)]
pub struct RegistryStatus {
    /// Vertices with a running tracker
    pub active: HashSet<VertexId>,
    /// Vertices whose tracker ended
    pub finished: HashMap<VertexId, TrackerOutcome>,
    /// Tracker tasks that panicked
    pub panicked: usize,
}

/// Shared read access to the registry status
#[derive(Clone, Debug, Default)]
pub struct RegistryHandle(Arc<RwLock<RegistryStatus>>);

impl RegistryHandle {
    /// Current status
    pub async fn snapshot(&self) -> RegistryStatus {
        self.0.read().await.clone()
    }

    /// Whether `vertex` has a running tracker
    pub async fn is_tracking(&self, vertex: &VertexId) -> bool {
        self.0.read().await.active.contains(vertex)
    }

    /// How the tracker of `vertex` ended, if it has
    pub async fn outcome(&self, vertex: &VertexId) -> Option<TrackerOutcome> {
        self.0.read().await.finished.get(vertex).cloned()
    }
}

type TrackerResult = (VertexId, Result<TrackerExit>);

/// Supervisor of all vertex trackers of one validator
#[derive(Debug)]
pub struct TrackerRegistry {
    ctx: Arc<TrackerContext>,
    spawner: TrackerSpawner,
    requests: mpsc::UnboundedReceiver<TrackerSpec>,
    tasks: JoinSet<TrackerResult>,
    vertices: HashMap<Id, VertexId>,
    status: RegistryHandle,
    cancel: CancellationToken,
}

impl TrackerRegistry {
    /// Empty registry; trackers stop when `cancel` fires
    pub fn new(ctx: Arc<TrackerContext>, cancel: CancellationToken) -> Self {
        let (tx, requests) = mpsc::unbounded_channel();
        Self {
            ctx,
            spawner: TrackerSpawner::new(tx),
            requests,
            tasks: JoinSet::new(),
            vertices: HashMap::new(),
            status: RegistryHandle::default(),
            cancel,
        }
    }

    /// Handle for requesting trackers
    pub fn spawner(&self) -> TrackerSpawner {
        self.spawner.clone()
    }

    /// Handle for reading the status
    pub fn handle(&self) -> RegistryHandle {
        self.status.clone()
    }

    /// Serve spawn requests until cancelled, then wait for every tracker
    pub async fn run(mut self) -> RegistryStatus {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                Some(spec) = self.requests.recv() => self.start(spec).await,
                Some(joined) = self.tasks.join_next_with_id(), if !self.tasks.is_empty() => self.record(joined).await,
            }
        }

        info!("[{}] Stopping {} trackers", self.ctx.name, self.tasks.len());
        while let Some(joined) = self.tasks.join_next_with_id().await {
            self.record(joined).await;
        }
        self.status.snapshot().await
    }

    async fn start(&mut self, spec: TrackerSpec) {
        {
            let mut status = self.status.0.write().await;
            if !status.active.insert(spec.vertex_id) {
                debug!("[{}] Vertex {} already tracked", self.ctx.name, spec.vertex_id.short());
                return;
            }
        }

        let vertex = spec.vertex_id;
        let tracker = VertexTracker::new(self.ctx.clone(), spec, self.spawner.clone());
        let cancel = self.cancel.child_token();
        let handle = self.tasks.spawn(async move { (vertex, tracker.run(cancel).await) });
        self.vertices.insert(handle.id(), vertex);
    }

    async fn record(&mut self, joined: Result<(Id, TrackerResult), JoinError>) {
        let mut status = self.status.0.write().await;
        match joined {
            Ok((id, (vertex, result))) => {
                self.vertices.remove(&id);
                status.active.remove(&vertex);
                let outcome = match result {
                    Ok(exit) => {
                        debug!("[{}] Tracker for {} exited: {}", self.ctx.name, vertex.short(), exit);
                        TrackerOutcome::Exited(exit)
                    }
                    Err(e) => {
                        error!("[{}] Tracker for {} failed: {}", self.ctx.name, vertex.short(), e);
                        TrackerOutcome::Failed(e.to_string())
                    }
                };
                status.finished.insert(vertex, outcome);
            }
            Err(e) => {
                status.panicked += 1;
                let Some(vertex) = self.vertices.remove(&e.id()) else {
                    error!("[{}] Unknown tracker task panicked: {}", self.ctx.name, e);
                    return;
                };
                error!("[{}] Tracker for {} panicked: {}", self.ctx.name, vertex.short(), e);
                status.active.remove(&vertex);
                status.finished.insert(vertex, TrackerOutcome::Panicked(e.to_string()));
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use xlayer_core::{ChallengeId, ChallengeLevels};

    use super::*;
    use crate::cache::HistoryCache;
    use crate::ledger::InMemoryLedger;
    use crate::simulated::{SimulatedExecution, SimulatedVerifier};
    use crate::state_provider::{HistoryAddress, StateProvider};

    fn context(dir: &std::path::Path) -> Arc<TrackerContext> {
        context_with_interval(dir, Duration::from_secs(1))
    }

    fn context_with_interval(dir: &std::path::Path, interval: Duration) -> Arc<TrackerContext> {
        let levels = ChallengeLevels::new(vec![8, 4]).unwrap();
        let ledger = InMemoryLedger::new(levels.clone(), 10, [0u8; 32], Arc::new(SimulatedVerifier));
        let provider = StateProvider::new(
            Arc::new(SimulatedExecution::honest(&levels, 2)),
            HistoryCache::new(dir),
            levels,
        );
        Arc::new(TrackerContext {
            name: "test".to_string(),
            ledger: Arc::new(ledger),
            provider: Arc::new(provider),
            challenge_period: 10,
            interval,
        })
    }

    fn spec(vertex: u8) -> TrackerSpec {
        TrackerSpec {
            challenge_id: ChallengeId([1u8; 32]),
            vertex_id: VertexId([vertex; 32]),
            address: HistoryAddress::block(0),
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_tracker_per_vertex() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let registry = TrackerRegistry::new(context(dir.path()), cancel.clone());
        let spawner = registry.spawner();
        let handle = registry.handle();
        let task = tokio::spawn(registry.run());

        spawner.spawn(spec(2)).unwrap();
        spawner.spawn(spec(2)).unwrap();
        spawner.spawn(spec(3)).unwrap();
        tokio::time::sleep(Duration::from_secs(3)).await;

        let status = handle.snapshot().await;
        assert_eq!(status.active.len(), 2);
        assert!(handle.is_tracking(&VertexId([2u8; 32])).await);

        cancel.cancel();
        let status = task.await.unwrap();
        assert!(status.active.is_empty());
        assert_eq!(
            status.finished.get(&VertexId([3u8; 32])),
            Some(&TrackerOutcome::Exited(TrackerExit::Cancelled))
        );
        assert_eq!(status.panicked, 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_panicked_tracker_can_be_restarted() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        // a zero wake interval panics inside the tracker task
        let registry = TrackerRegistry::new(context_with_interval(dir.path(), Duration::ZERO), cancel.clone());
        let spawner = registry.spawner();
        let handle = registry.handle();
        let task = tokio::spawn(registry.run());
        let vertex = VertexId([5u8; 32]);

        spawner.spawn(spec(5)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        let status = handle.snapshot().await;
        assert_eq!(status.panicked, 1);
        assert!(!handle.is_tracking(&vertex).await);
        assert!(matches!(handle.outcome(&vertex).await, Some(TrackerOutcome::Panicked(_))));

        spawner.spawn(spec(5)).unwrap();
        tokio::time::sleep(Duration::from_secs(1)).await;
        assert_eq!(handle.snapshot().await.panicked, 2);
        assert!(!handle.is_tracking(&vertex).await);

        cancel.cancel();
        let status = task.await.unwrap();
        assert!(status.active.is_empty());
    }

    #[tokio::test]
    async fn test_spawn_after_registry_stopped() {
        let dir = tempfile::tempdir().unwrap();
        let cancel = CancellationToken::new();
        let registry = TrackerRegistry::new(context(dir.path()), cancel.clone());
        let spawner = registry.spawner();
        cancel.cancel();
        let status = registry.run().await;
        assert!(status.finished.is_empty());
        let err = spawner.spawn(spec(4)).unwrap_err();
        assert!(err.to_string().contains("stopped"));
    }
}
