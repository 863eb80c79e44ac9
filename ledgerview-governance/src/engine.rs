//! Governance engine: proposal creation, vote admission and tallies.
//!
//! Proposal status is never stored. Every read recomputes it from the votes,
//! the closing time, the quorum and the clock, so nothing has to happen at
//! `end_at` for a proposal to close.
//!
//! Voting weights come from the read-model cache. The weight recorded on a
//! vote is the voter's weight when the vote was admitted and never changes
//! afterwards.

use std::sync::Arc;

use ledgerview_core::{
    ChainReader, Clock, GovernanceConfig, GovernanceError, Identity, LedgerConfig, LedgerResult,
    Proposal, ProposalDraft, ProposalId, ProposalStatus, ProposalType, ProposalView,
    TallyReport, ValidationError, Vote, VoteOption, Weight,
};
use ledgerview_storage::{CacheRead, PersistentStore, ProposalStore, ReadModelCache};

use crate::power::VotingPowerFetcher;

/// Proposal and voting engine.
pub struct GovernanceEngine {
    ledger: ProposalStore,
    power_cache: ReadModelCache<Weight>,
    fetcher: Arc<VotingPowerFetcher>,
    clock: Arc<dyn Clock>,
    config: GovernanceConfig,
}

impl GovernanceEngine {
    /// Build an engine over a durable store and a ledger reader.
    ///
    /// # Errors
    ///
    /// Returns a config error if `config` does not validate.
    pub fn new(
        store: Arc<dyn PersistentStore>,
        reader: Arc<dyn ChainReader>,
        clock: Arc<dyn Clock>,
        config: LedgerConfig,
    ) -> LedgerResult<Self> {
        config.validate()?;

        let fetcher = Arc::new(VotingPowerFetcher::new(reader, &config.governance));
        let power_cache = ReadModelCache::new(Arc::clone(&store), Arc::clone(&clock), config.cache);

        tracing::info!(
            quorum = config.governance.quorum,
            voting_period_secs = config.governance.voting_period.as_secs(),
            power_contract = %config.governance.power_contract,
            power_method = %config.governance.power_method,
            "Governance engine initialized"
        );

        Ok(Self {
            ledger: ProposalStore::new(store),
            power_cache,
            fetcher,
            clock,
            config: config.governance,
        })
    }

    pub fn config(&self) -> &GovernanceConfig {
        &self.config
    }

    /// The voting power cache, for wiring up `cache_refresh_task`.
    pub fn power_cache(&self) -> &ReadModelCache<Weight> {
        &self.power_cache
    }

    // ========================================================================
    // VOTING POWER
    // ========================================================================

    /// Current voting weight of `identity`, with freshness metadata.
    pub async fn voting_power(&self, identity: &Identity) -> LedgerResult<CacheRead<Weight>> {
        let key = self.fetcher.cache_key(identity);
        self.power_cache
            .get_with_policy(&key, self.fetcher.clone())
            .await
    }

    /// Drop the cached weight of `identity` so the next read goes upstream.
    pub async fn refresh_voting_power(&self, identity: &Identity) -> LedgerResult<bool> {
        let key = self.fetcher.cache_key(identity);
        self.power_cache.invalidate(&key).await
    }

    async fn require_power(&self, identity: &Identity) -> LedgerResult<Weight> {
        let read = self.voting_power(identity).await?;
        if read.is_fallback() {
            tracing::warn!(
                identity = %identity,
                fetched_at = %read.fetched_at(),
                "using last-known voting power"
            );
        }
        let weight = read.into_value();
        if weight == 0 {
            return Err(GovernanceError::NotEligible {
                identity: identity.clone(),
            }
            .into());
        }
        Ok(weight)
    }

    // ========================================================================
    // MUTATIONS
    // ========================================================================

    /// Open a proposal. The creator must hold voting power.
    pub async fn create_proposal(
        &self,
        creator: &Identity,
        proposal_type: ProposalType,
        title: &str,
        description: &str,
    ) -> LedgerResult<Proposal> {
        let title = title.trim();
        if title.is_empty() {
            return Err(ValidationError::RequiredFieldMissing {
                field: "title".to_string(),
            }
            .into());
        }

        self.require_power(creator).await?;

        let created_at = self.clock.now();
        let draft = ProposalDraft {
            proposal_type,
            title: title.to_string(),
            description: description.to_string(),
            creator: creator.clone(),
            created_at,
            end_at: created_at + self.config.voting_period_chrono()?,
        };
        let proposal = self.ledger.append(draft).await?;

        tracing::info!(
            proposal_id = %proposal.id,
            proposal_type = %proposal.proposal_type,
            creator = %creator,
            end_at = %proposal.end_at,
            "Proposal created"
        );
        Ok(proposal)
    }

    /// Cast `voter`'s vote on a proposal, recording their current weight.
    ///
    /// Checks run in order: the proposal exists, voting is open, the voter
    /// has not voted yet, the voter holds power. A repeat cast is rejected
    /// before any weight read, so it fails with `DuplicateVote` whatever the
    /// voter's current weight. The ledger re-checks duplicates under its lock.
    pub async fn cast_vote(
        &self,
        proposal_id: ProposalId,
        voter: &Identity,
        option: VoteOption,
    ) -> LedgerResult<Vote> {
        let proposal = self.require_proposal(proposal_id).await?;

        let now = self.clock.now();
        if !proposal.accepts_votes_at(now) {
            return Err(GovernanceError::VotingClosed {
                proposal_id,
                end_at: proposal.end_at,
            }
            .into());
        }
        if proposal.has_voted(voter) {
            return Err(GovernanceError::DuplicateVote {
                proposal_id,
                voter: voter.clone(),
            }
            .into());
        }

        let weight = self.require_power(voter).await?;

        let vote = Vote {
            voter: voter.clone(),
            option,
            weight,
            cast_at: now,
        };
        let updated = self.ledger.append_vote(proposal_id, vote.clone()).await?;

        tracing::info!(
            proposal_id = %proposal_id,
            voter = %voter,
            option = %option,
            weight,
            total_votes = updated.votes.len(),
            "Vote admitted"
        );
        Ok(vote)
    }

    // ========================================================================
    // QUERIES
    // ========================================================================

    /// Tally of a proposal with its status at the current time.
    pub async fn tally(&self, proposal_id: ProposalId) -> LedgerResult<TallyReport> {
        let proposal = self.require_proposal(proposal_id).await?;
        Ok(proposal.tally_report(self.clock.now(), self.config.quorum))
    }

    pub async fn proposal(&self, proposal_id: ProposalId) -> LedgerResult<ProposalView> {
        let proposal = self.require_proposal(proposal_id).await?;
        Ok(ProposalView::at(proposal, self.clock.now(), self.config.quorum))
    }

    /// Every proposal with its current status, newest first.
    pub async fn list_proposals(&self) -> LedgerResult<Vec<ProposalView>> {
        let mut views = self
            .ledger
            .load_views(self.clock.now(), self.config.quorum)
            .await?;
        views.sort_by(|a, b| {
            b.proposal
                .created_at
                .cmp(&a.proposal.created_at)
                .then_with(|| b.proposal.id.cmp(&a.proposal.id))
        });
        Ok(views)
    }

    pub async fn list_by_status(&self, status: ProposalStatus) -> LedgerResult<Vec<ProposalView>> {
        Ok(self
            .list_proposals()
            .await?
            .into_iter()
            .filter(|view| view.status == status)
            .collect())
    }

    /// The vote `voter` cast on a proposal, if any.
    pub async fn vote_of(&self, proposal_id: ProposalId, voter: &Identity) -> LedgerResult<Option<Vote>> {
        let proposal = self.require_proposal(proposal_id).await?;
        Ok(proposal.vote_of(voter).cloned())
    }

    async fn require_proposal(&self, proposal_id: ProposalId) -> LedgerResult<Proposal> {
        self.ledger
            .get(proposal_id)
            .await?
            .ok_or_else(|| GovernanceError::NotFound { proposal_id }.into())
    }
}
