//! Ledger moves built from local history
//!
//! Each move computes the commitment and proof it needs from the state
//! provider and submits it. "Already exists" races come back as
//! [`ProtocolError::AlreadyExists`] inside the returned error; callers check
//! with [`is_already_exists`].

use anyhow::{anyhow, Result};
use tracing::info;
use xlayer_core::{
    bisection_point, AddLeafArgs, Challenge, ChallengeVertex, ClaimId, Height, Ledger, ProtocolError, VertexId,
};
use xlayer_merkle::HistoryCommitment;

use crate::state_provider::{HistoryAddress, StateProvider};

/// Whether `err` is the ledger's "already exists" race
pub fn is_already_exists(err: &anyhow::Error) -> bool {
    err.downcast_ref::<ProtocolError>()
        .is_some_and(ProtocolError::is_already_exists)
}

/// Leaf submission for `commitment` standing for `claim`
pub fn leaf_args(challenge: &Challenge, claim: ClaimId, commitment: HistoryCommitment) -> AddLeafArgs {
    AddLeafArgs {
        challenge_id: challenge.id,
        claim_id: claim,
        height: commitment.height,
        history_root: commitment.merkle,
        first_state: commitment.first_leaf,
        first_state_proof: commitment.first_leaf_proof.siblings,
        last_state: commitment.last_leaf,
        last_state_proof: commitment.last_leaf_proof.siblings,
    }
}

/// Add a leaf committing to `address` up to `height`, or find the one already there
pub async fn add_leaf(
    ledger: &dyn Ledger,
    provider: &StateProvider,
    challenge: &Challenge,
    claim: ClaimId,
    address: &HistoryAddress,
    height: Option<Height>,
) -> Result<VertexId> {
    let commitment = provider.history_commitment(address, height).await?;
    let expected = VertexId::compute(&challenge.id, &commitment.merkle, commitment.height);
    let height = commitment.height;
    match ledger.add_leaf(leaf_args(challenge, claim, commitment)).await {
        Ok(id) => {
            info!(
                "Added {} leaf {} at height {} for claim {}",
                challenge.challenge_type,
                id.short(),
                height,
                claim.short()
            );
            Ok(id)
        }
        Err(e) if e.is_already_exists() => Ok(expected),
        Err(e) => Err(e.into()),
    }
}

/// Bisect `vertex` to the bisection point between it and `prev`
pub async fn bisect(
    ledger: &dyn Ledger,
    provider: &StateProvider,
    vertex: &ChallengeVertex,
    prev: &ChallengeVertex,
    address: &HistoryAddress,
) -> Result<VertexId> {
    let to = bisection_point(prev.height(), vertex.height())?;
    let commitment = provider.history_commitment(address, Some(to)).await?;
    let proof = provider.prefix_proof(address, to, vertex.height()).await?;
    let id = ledger.bisect(vertex.id, commitment.merkle, proof).await?;
    info!(
        "Successfully bisected {} vertex to {} at height {} with commitment 0x{} in {:?}",
        provider.challenge_type(address),
        id.short(),
        to,
        hex::encode(&commitment.merkle[..4]),
        vertex.challenge_id
    );
    Ok(id)
}

/// Merge `vertex` into the existing vertex at the bisection point between it and `prev`
pub async fn merge(
    ledger: &dyn Ledger,
    provider: &StateProvider,
    vertex: &ChallengeVertex,
    prev: &ChallengeVertex,
    address: &HistoryAddress,
) -> Result<VertexId> {
    let to = bisection_point(prev.height(), vertex.height())?;
    let commitment = provider.history_commitment(address, Some(to)).await?;
    let target = ledger
        .calculate_challenge_vertex_id(vertex.challenge_id, to, commitment.merkle)
        .await?;
    if ledger.get_vertex(target).await?.is_none() {
        return Err(anyhow!("merge target {} at height {} not found", target.short(), to));
    }
    let proof = provider.prefix_proof(address, to, vertex.height()).await?;
    let id = ledger.merge(vertex.id, commitment.merkle, proof).await?;
    info!(
        "Successfully merged {} vertex to {} at height {} with commitment 0x{} in {:?}",
        provider.challenge_type(address),
        id.short(),
        to,
        hex::encode(&commitment.merkle[..4]),
        vertex.challenge_id
    );
    Ok(id)
}
