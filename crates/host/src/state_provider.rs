//! History commitment provider
//!
//! Produces the leaf sequences, Merkle commitments and proofs a validator
//! submits. Block-level leaves are finished-machine hashes after each
//! message; sub-level leaves are machine hashes sampled from one message
//! replay at the level's step size. Sub-level leaf sets are cached on disk.

use std::sync::Arc;

use tracing::{debug, warn};
use xlayer_bindings::ProofArgs;
use xlayer_core::{
    ChallengeLevels, ChallengeType, ExecutionError, ExecutionProvider, Hash, Height, OneStepData, StateCommitment,
};
use xlayer_merkle::{HistoryCommitment, InclusionProof, MerkleError, PrefixProof};

use crate::cache::{CacheError, CacheKey, HistoryCache};

/// Leaf sets of this length or shorter are recomputed instead of cached
const MIN_CACHED_LEAVES: usize = 2;

/// Provider errors
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// Range bounds out of order
    #[error("invalid range: from {from} > to {to}")]
    InvalidRange {
        /// Start height
        from: Height,
        /// End height
        to: Height,
    },
    /// Height above the level maximum
    #[error("height {height} exceeds maximum {max} at level {level}")]
    HeightExceedsLevel {
        /// Requested height
        height: Height,
        /// Level index
        level: usize,
        /// Level maximum
        max: Height,
    },
    /// Level not in the layout
    #[error("unknown level {0}")]
    UnknownLevel(usize),
    /// One-step proofs exist only at the small-step level
    #[error("level {0} is not the small-step level")]
    NotSmallestLevel(usize),
    /// Execution failure
    #[error(transparent)]
    Execution(#[from] ExecutionError),
    /// Commitment failure
    #[error(transparent)]
    Merkle(#[from] MerkleError),
    /// Cache read failure
    #[error(transparent)]
    Cache(#[from] CacheError),
}

impl ProviderError {
    /// Whether the local execution has not caught up yet
    pub const fn is_not_yet_available(&self) -> bool {
        matches!(self, Self::Execution(ExecutionError::NotYetAvailable { .. }))
    }
}

/// Where a history lives in the level tree
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HistoryAddress {
    /// Level index, 0 is the block level
    pub level: usize,
    /// Block-level height the block challenge starts from
    pub base_height: Height,
    /// Fork heights chosen at every enclosing level, block level first
    pub origin_heights: Vec<Height>,
}

impl HistoryAddress {
    /// Block-level history starting at `base_height`
    pub const fn block(base_height: Height) -> Self {
        Self {
            level: 0,
            base_height,
            origin_heights: Vec::new(),
        }
    }

    /// History one level down, refining the step from `fork_height` to `fork_height + 1`
    pub fn descend(&self, fork_height: Height) -> Self {
        let mut origin_heights = self.origin_heights.clone();
        origin_heights.push(fork_height);
        Self {
            level: self.level + 1,
            base_height: self.base_height,
            origin_heights,
        }
    }

    /// Message replayed by sub-level histories
    pub fn message(&self) -> Option<u64> {
        self.origin_heights.first().map(|h| self.base_height + h)
    }
}

/// History commitments and proofs over local execution
pub struct StateProvider {
    execution: Arc<dyn ExecutionProvider>,
    cache: HistoryCache,
    levels: ChallengeLevels,
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("cache", &self.cache)
            .field("levels", &self.levels)
            .finish_non_exhaustive()
    }
}

impl StateProvider {
    /// Provider over `execution` with the given level layout
    pub fn new(execution: Arc<dyn ExecutionProvider>, cache: HistoryCache, levels: ChallengeLevels) -> Self {
        Self {
            execution,
            cache,
            levels,
        }
    }

    /// Level layout
    pub const fn levels(&self) -> &ChallengeLevels {
        &self.levels
    }

    /// Granularity of the history at `address`
    pub fn challenge_type(&self, address: &HistoryAddress) -> ChallengeType {
        self.levels.challenge_type(address.level)
    }

    /// Highest locally executed height
    pub async fn head(&self) -> Result<Height, ProviderError> {
        Ok(self.execution.head().await?)
    }

    /// Block-level leaf at `height`
    pub async fn state_hash_at(&self, height: Height) -> Result<Hash, ProviderError> {
        Ok(self.execution.state_hash_at(height).await?)
    }

    /// Whether a claimed state matches local execution
    pub async fn agrees_with(&self, commitment: StateCommitment) -> Result<bool, ProviderError> {
        Ok(self.state_hash_at(commitment.height).await? == commitment.state_hash)
    }

    /// Leaves at heights `from..=to` of the history at `address`
    pub async fn leaves(&self, address: &HistoryAddress, from: Height, to: Height) -> Result<Vec<Hash>, ProviderError> {
        if from > to {
            return Err(ProviderError::InvalidRange { from, to });
        }
        let max = self
            .levels
            .max_height(address.level)
            .ok_or(ProviderError::UnknownLevel(address.level))?;
        if to > max {
            return Err(ProviderError::HeightExceedsLevel {
                height: to,
                level: address.level,
                max,
            });
        }

        if address.level == 0 {
            let mut leaves = Vec::with_capacity((to - from + 1) as usize);
            for height in from..=to {
                leaves.push(self.execution.state_hash_at(address.base_height + height).await?);
            }
            return Ok(leaves);
        }

        let full = self.sub_level_leaves(address).await?;
        Ok(full[from as usize..=to as usize].to_vec())
    }

    /// All `L + 1` leaves of a sub-level history, from cache when possible
    async fn sub_level_leaves(&self, address: &HistoryAddress) -> Result<Vec<Hash>, ProviderError> {
        let message = address.message().ok_or(ProviderError::UnknownLevel(address.level))?;
        let module_root = self.execution.module_root();
        let count = self
            .levels
            .leaf_count(address.level)
            .ok_or(ProviderError::UnknownLevel(address.level))?;
        let key = CacheKey {
            module_root,
            level_heights: self.levels.heights().to_vec(),
            message_height: message,
            step_heights: address.origin_heights[1..].to_vec(),
        };
        let stale = match self.cache.get(&key).await {
            Ok(leaves) if leaves.len() as u64 == count => return Ok(leaves),
            Ok(leaves) => {
                warn!(
                    "Discarding {} cached leaves for message {}, expected {}",
                    leaves.len(),
                    message,
                    count
                );
                true
            }
            Err(CacheError::NotFound) => false,
            Err(CacheError::Encoding(e)) => {
                warn!("Discarding corrupt cached leaves for message {}: {}", message, e);
                true
            }
            Err(e) => {
                warn!("Failed to read cached leaves for message {}: {}", message, e);
                false
            }
        };

        let start = self.levels.opcode_start(&address.origin_heights);
        let step = self.levels.step_size(address.level);
        let run = self.execution.create_execution_run(module_root, message).await?;
        let leaves = run.leaves_with_step_size(start, step, count).await?;

        if leaves.len() > MIN_CACHED_LEAVES {
            let stored = if stale {
                self.cache.replace(&key, &leaves).await
            } else {
                self.cache.put(&key, &leaves).await
            };
            match stored {
                Ok(()) | Err(CacheError::FileAlreadyExists(_)) => {}
                Err(e) => warn!("Failed to cache leaves for message {}: {}", message, e),
            }
        } else {
            debug!("Not caching {} leaves for message {}", leaves.len(), message);
        }
        Ok(leaves)
    }

    /// Commitment to heights `0..=up_to`, the whole level when `up_to` is none
    pub async fn history_commitment(
        &self,
        address: &HistoryAddress,
        up_to: Option<Height>,
    ) -> Result<HistoryCommitment, ProviderError> {
        let to = match up_to {
            Some(h) => h,
            None => self
                .levels
                .max_height(address.level)
                .ok_or(ProviderError::UnknownLevel(address.level))?,
        };
        let leaves = self.leaves(address, 0, to).await?;
        Ok(HistoryCommitment::new(&leaves)?)
    }

    /// ABI-encoded proof that the history up to `lo` is a prefix of the one up to `hi`
    pub async fn prefix_proof(&self, address: &HistoryAddress, lo: Height, hi: Height) -> Result<Vec<u8>, ProviderError> {
        if lo >= hi {
            return Err(ProviderError::InvalidRange { from: lo, to: hi });
        }
        let leaves = self.leaves(address, 0, hi).await?;
        let proof = PrefixProof::generate(&leaves, lo + 1, hi + 1)?;
        Ok(ProofArgs {
            prefix_expansion: proof.prefix_expansion,
            prefix_proof: proof.proof,
        }
        .encode())
    }

    /// One-step proof for the small-step fork between `fork_height` and `fork_height + 1`
    pub async fn one_step_proof(&self, address: &HistoryAddress, fork_height: Height) -> Result<OneStepData, ProviderError> {
        if !self.levels.is_smallest(address.level) {
            return Err(ProviderError::NotSmallestLevel(address.level));
        }
        let after = fork_height + 1;
        let leaves = self.leaves(address, 0, after).await?;
        let before_state_proof = InclusionProof::generate(&leaves, fork_height)?;
        let after_state_proof = InclusionProof::generate(&leaves, after)?;

        let message = address.message().ok_or(ProviderError::UnknownLevel(address.level))?;
        let position = self.levels.opcode_start(&address.origin_heights) + fork_height;
        let run = self
            .execution
            .create_execution_run(self.execution.module_root(), message)
            .await?;
        let proof = run.proof_at(position).await?;

        Ok(OneStepData {
            before_state: leaves[fork_height as usize],
            before_state_proof: before_state_proof.siblings,
            after_state: leaves[after as usize],
            after_state_proof: after_state_proof.siblings,
            proof,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;
    use xlayer_core::{ExecutionRun, GlobalState, OneStepVerifier};
    use xlayer_merkle::MerkleExpansion;

    use super::*;
    use crate::simulated::{SimulatedExecution, SimulatedVerifier};

    /// Counts replays started through it
    struct CountingExecution {
        inner: SimulatedExecution,
        runs: AtomicUsize,
    }

    #[async_trait]
    impl ExecutionProvider for CountingExecution {
        fn module_root(&self) -> Hash {
            self.inner.module_root()
        }

        async fn head(&self) -> Result<Height, ExecutionError> {
            self.inner.head().await
        }

        async fn global_state_at(&self, height: Height) -> Result<GlobalState, ExecutionError> {
            self.inner.global_state_at(height).await
        }

        async fn create_execution_run(&self, module_root: Hash, message: u64) -> Result<Arc<dyn ExecutionRun>, ExecutionError> {
            self.runs.fetch_add(1, Ordering::SeqCst);
            self.inner.create_execution_run(module_root, message).await
        }
    }

    fn provider(levels: &ChallengeLevels, dir: &std::path::Path) -> (StateProvider, Arc<CountingExecution>) {
        let execution = Arc::new(CountingExecution {
            inner: SimulatedExecution::honest(levels, 8),
            runs: AtomicUsize::new(0),
        });
        let provider = StateProvider::new(execution.clone(), HistoryCache::new(dir), levels.clone());
        (provider, execution)
    }

    #[tokio::test]
    async fn test_block_leaves_and_bounds() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, _) = provider(&levels, dir.path());
        let address = HistoryAddress::block(0);

        let leaves = provider.leaves(&address, 2, 5).await.unwrap();
        assert_eq!(leaves.len(), 4);
        assert_eq!(leaves[0], provider.state_hash_at(2).await.unwrap());

        assert!(matches!(
            provider.leaves(&address, 5, 2).await,
            Err(ProviderError::InvalidRange { from: 5, to: 2 })
        ));
        assert!(matches!(
            provider.leaves(&address, 0, 9).await,
            Err(ProviderError::HeightExceedsLevel { height: 9, level: 0, max: 8 })
        ));
    }

    #[test]
    fn test_challenge_type_follows_address_depth() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, _) = provider(&levels, dir.path());
        let block = HistoryAddress::block(2);
        assert_eq!(provider.challenge_type(&block), ChallengeType::Block);
        assert_eq!(provider.challenge_type(&block.descend(1)), ChallengeType::BigStep);
        assert_eq!(provider.challenge_type(&block.descend(1).descend(3)), ChallengeType::SmallStep);
    }

    #[tokio::test]
    async fn test_block_history_beyond_head_is_not_yet_available() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, _) = provider(&levels, dir.path());
        let err = provider.history_commitment(&HistoryAddress::block(4), Some(6)).await.unwrap_err();
        assert!(err.is_not_yet_available());
    }

    #[tokio::test]
    async fn test_sub_level_leaves_follow_mixed_radix_addressing() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, execution) = provider(&levels, dir.path());
        let run = execution.inner.create_execution_run(execution.module_root(), 5).await.unwrap();

        let big = HistoryAddress::block(0).descend(5);
        let leaves = provider.leaves(&big, 0, 4).await.unwrap();
        assert_eq!(leaves, run.leaves_with_step_size(0, 4, 5).await.unwrap());
        assert_eq!(leaves[0], provider.state_hash_at(5).await.unwrap());
        assert_eq!(leaves[4], provider.state_hash_at(6).await.unwrap());

        let small = big.descend(2);
        let leaves = provider.leaves(&small, 0, 4).await.unwrap();
        assert_eq!(leaves, run.leaves_in_range_with_step_size(8, 12, 1).await.unwrap());
    }

    #[tokio::test]
    async fn test_cached_leaves_are_served_without_replay() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 1, 7]).unwrap();
        let (provider, execution) = provider(&levels, dir.path());

        // level 1 has two leaves and is never persisted
        let two = HistoryAddress::block(0).descend(3);
        let first = provider.history_commitment(&two, None).await.unwrap();
        assert_eq!(first.size(), 2);
        let second = provider.history_commitment(&two, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(execution.runs.load(Ordering::SeqCst), 2);

        // level 2 has eight leaves and is persisted after the first request
        let eight = two.descend(0);
        let first = provider.history_commitment(&eight, None).await.unwrap();
        assert_eq!(first.size(), 8);
        assert_eq!(execution.runs.load(Ordering::SeqCst), 3);
        let second = provider.history_commitment(&eight, None).await.unwrap();
        assert_eq!(first, second);
        assert_eq!(execution.runs.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_short_cached_leaves_are_recomputed() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, execution) = provider(&levels, dir.path());
        let key = CacheKey {
            module_root: execution.module_root(),
            level_heights: vec![8, 4, 4],
            message_height: 5,
            step_heights: vec![],
        };
        let cache = HistoryCache::new(dir.path());
        cache.put(&key, &[[1u8; 32]; 3]).await.unwrap();

        let big = HistoryAddress::block(0).descend(5);
        let commitment = provider.history_commitment(&big, None).await.unwrap();
        assert_eq!(commitment.size(), 5);
        assert_eq!(execution.runs.load(Ordering::SeqCst), 1);

        let run = execution.inner.create_execution_run(execution.module_root(), 5).await.unwrap();
        let expected = run.leaves_with_step_size(0, 4, 5).await.unwrap();
        assert_eq!(cache.get(&key).await.unwrap(), expected);
    }

    #[tokio::test]
    async fn test_cache_from_other_level_layout_is_ignored() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, execution) = provider(&levels, dir.path());
        let big = HistoryAddress::block(0).descend(5);
        let first = provider.history_commitment(&big, None).await.unwrap();

        let relaid = ChallengeLevels::new(vec![8, 2, 8]).unwrap();
        let other = StateProvider::new(execution.clone(), HistoryCache::new(dir.path()), relaid);
        let commitment = other.history_commitment(&big, None).await.unwrap();
        assert_eq!(commitment.size(), 3);
        assert_ne!(commitment.merkle, first.merkle);
    }

    #[tokio::test]
    async fn test_prefix_proof_verifies() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, _) = provider(&levels, dir.path());
        let address = HistoryAddress::block(0);

        let lo = provider.history_commitment(&address, Some(4)).await.unwrap();
        let hi = provider.history_commitment(&address, Some(7)).await.unwrap();
        let encoded = provider.prefix_proof(&address, 4, 7).await.unwrap();
        let args = ProofArgs::decode(&encoded).unwrap();
        let expansion = MerkleExpansion::from_levels(args.prefix_expansion.clone()).unwrap();
        assert_eq!(expansion.root().unwrap(), lo.merkle);
        xlayer_merkle::verify_prefix_proof(&lo.merkle, 5, &hi.merkle, 8, &args.prefix_expansion, &args.prefix_proof)
            .unwrap();

        assert!(provider.prefix_proof(&address, 7, 7).await.is_err());
    }

    #[tokio::test]
    async fn test_one_step_proof_matches_verifier() {
        let dir = tempfile::tempdir().unwrap();
        let levels = ChallengeLevels::new(vec![8, 4, 4]).unwrap();
        let (provider, _) = provider(&levels, dir.path());
        let small = HistoryAddress::block(0).descend(5).descend(1);

        let data = provider.one_step_proof(&small, 2).await.unwrap();
        let vertex = provider.history_commitment(&small, Some(3)).await.unwrap();
        let before = InclusionProof {
            index: 2,
            siblings: data.before_state_proof.clone(),
        };
        let after = InclusionProof {
            index: 3,
            siblings: data.after_state_proof.clone(),
        };
        assert!(before.verify(&vertex.merkle, &data.before_state));
        assert!(after.verify(&vertex.merkle, &data.after_state));
        assert_eq!(
            SimulatedVerifier.verify_one_step(&data.before_state, &data.proof).unwrap(),
            data.after_state
        );

        let big = HistoryAddress::block(0).descend(5);
        assert!(matches!(
            provider.one_step_proof(&big, 1).await,
            Err(ProviderError::NotSmallestLevel(1))
        ));
    }
}
