//! Append-only proposal ledger.
//!
//! # Layout
//!
//! - `governance:shared:proposal-index`: JSON array of ids in creation order
//! - `governance:shared:proposal/{id}`: one JSON record per proposal
//!
//! Proposals and votes are only ever appended. Both mutators run under one
//! ledger lock, so id allocation and the duplicate-voter check see every
//! earlier write.
//!
//! Unreadable data never aborts a load: a corrupt index reads as an empty
//! ledger and a corrupt record is skipped, both with a warning.

use std::collections::HashSet;
use std::sync::Arc;

use ledgerview_core::{
    GovernanceError, LedgerResult, Proposal, ProposalDraft, ProposalId, ProposalView,
    StorageError, Timestamp, Vote,
};
use tokio::sync::Mutex;

use crate::keys::{KeyDomain, OwnerContext, ScopedKey};
use crate::store::{corrupt_data, PersistentStore};

const INDEX_KEY: &str = "proposal-index";

fn index_key() -> ScopedKey {
    ScopedKey::new(KeyDomain::Governance, OwnerContext::Shared, INDEX_KEY)
}

fn record_key(id: ProposalId) -> ScopedKey {
    ScopedKey::new(
        KeyDomain::Governance,
        OwnerContext::Shared,
        format!("proposal/{}", id),
    )
}

/// Durable, append-only proposal ledger.
pub struct ProposalStore {
    store: Arc<dyn PersistentStore>,
    append_lock: Mutex<()>,
}

impl ProposalStore {
    pub fn new(store: Arc<dyn PersistentStore>) -> Self {
        Self {
            store,
            append_lock: Mutex::new(()),
        }
    }

    /// Every readable proposal, in creation order.
    pub async fn load(&self) -> LedgerResult<Vec<Proposal>> {
        let ids = self.read_index().await?;
        let mut proposals = Vec::with_capacity(ids.len());
        for id in ids {
            match self.read_record(id).await? {
                Some(proposal) => proposals.push(proposal),
                None => tracing::warn!(proposal_id = %id, "indexed proposal has no readable record"),
            }
        }
        Ok(proposals)
    }

    /// Every readable proposal with its status at `now`.
    pub async fn load_views(&self, now: Timestamp, quorum: usize) -> LedgerResult<Vec<ProposalView>> {
        Ok(self
            .load()
            .await?
            .into_iter()
            .map(|proposal| ProposalView::at(proposal, now, quorum))
            .collect())
    }

    /// One proposal. A missing or corrupt record is `None`.
    pub async fn get(&self, id: ProposalId) -> LedgerResult<Option<Proposal>> {
        self.read_record(id).await
    }

    /// Number of indexed proposals.
    pub async fn len(&self) -> LedgerResult<usize> {
        Ok(self.read_index().await?.len())
    }

    pub async fn is_empty(&self) -> LedgerResult<bool> {
        Ok(self.len().await? == 0)
    }

    /// Persist a new proposal with no votes.
    ///
    /// The id is the creation time in milliseconds, bumped until it is unused.
    pub async fn append(&self, draft: ProposalDraft) -> LedgerResult<Proposal> {
        let _guard = self.append_lock.lock().await;

        let mut index = self.read_index().await?;
        let taken: HashSet<ProposalId> = index.iter().copied().collect();
        let mut id = ProposalId::from_timestamp(draft.created_at);
        while taken.contains(&id) || self.store.get(&record_key(id)).await?.is_some() {
            id = id.next();
        }

        let proposal = Proposal::from_draft(id, draft);
        self.write_record(&proposal).await?;
        index.push(id);
        self.write_index(&index).await?;

        Ok(proposal)
    }

    /// Append a vote, re-checking the ledger rules under the lock.
    ///
    /// Fails with `NotFound` if the proposal is absent or unreadable,
    /// `VotingClosed` if the vote was cast after `end_at`, and
    /// `DuplicateVote` if the voter already voted.
    pub async fn append_vote(&self, id: ProposalId, vote: Vote) -> LedgerResult<Proposal> {
        let _guard = self.append_lock.lock().await;

        let mut proposal = self
            .read_record(id)
            .await?
            .ok_or(GovernanceError::NotFound { proposal_id: id })?;

        if !proposal.accepts_votes_at(vote.cast_at) {
            return Err(GovernanceError::VotingClosed {
                proposal_id: id,
                end_at: proposal.end_at,
            }
            .into());
        }
        if proposal.has_voted(&vote.voter) {
            return Err(GovernanceError::DuplicateVote {
                proposal_id: id,
                voter: vote.voter,
            }
            .into());
        }

        proposal.votes.push(vote);
        self.write_record(&proposal).await?;
        Ok(proposal)
    }

    async fn read_index(&self) -> LedgerResult<Vec<ProposalId>> {
        let key = index_key();
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(Vec::new());
        };
        match serde_json::from_slice(&bytes) {
            Ok(ids) => Ok(ids),
            Err(e) => {
                let err = corrupt_data(&key, e);
                tracing::warn!(error = %err, kind = ?err.kind(), "corrupt proposal index, treating ledger as empty");
                Ok(Vec::new())
            }
        }
    }

    async fn read_record(&self, id: ProposalId) -> LedgerResult<Option<Proposal>> {
        let key = record_key(id);
        let Some(bytes) = self.store.get(&key).await? else {
            return Ok(None);
        };
        match serde_json::from_slice::<Proposal>(&bytes) {
            Ok(proposal) => Ok(Some(proposal)),
            Err(e) => {
                let err = corrupt_data(&key, e);
                tracing::warn!(error = %err, kind = ?err.kind(), "corrupt proposal record, skipping");
                Ok(None)
            }
        }
    }

    async fn write_index(&self, index: &[ProposalId]) -> LedgerResult<()> {
        let key = index_key();
        let bytes = serde_json::to_vec(index).map_err(|e| StorageError::Serialization {
            key: key.encode(),
            reason: e.to_string(),
        })?;
        self.store.set(&key, &bytes).await.inspect_err(|e| {
            tracing::error!(key = %key, error = %e, "failed to write proposal index");
        })
    }

    async fn write_record(&self, proposal: &Proposal) -> LedgerResult<()> {
        let key = record_key(proposal.id);
        let bytes = serde_json::to_vec(proposal).map_err(|e| StorageError::Serialization {
            key: key.encode(),
            reason: e.to_string(),
        })?;
        self.store.set(&key, &bytes).await.inspect_err(|e| {
            tracing::error!(key = %key, error = %e, "failed to write proposal record");
        })
    }
}
