//! Proposal, vote and tally types.
//!
//! A proposal is immutable except for its vote sequence, which only grows.
//! Status is never stored: it is recomputed from the votes, the closing time,
//! the quorum and the current time on every read.
//!
//! # Lifecycle
//!
//! ```text
//! create ──→ Active ──(now ≥ end_at)──→ Passed | Rejected | Invalid
//!              │
//!          append_vote ↺
//! ```

use crate::{Identity, Timestamp, Weight};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

// ============================================================================
// PROPOSAL ID
// ============================================================================

/// Proposal identifier derived from the creation time in milliseconds.
///
/// Ids are allocated by the proposal ledger, which bumps a colliding id by
/// one until it is unused, so ids stay unique and roughly time-ordered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProposalId(u64);

impl ProposalId {
    pub fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Candidate id for a proposal created at `created_at`.
    pub fn from_timestamp(created_at: Timestamp) -> Self {
        Self(created_at.timestamp_millis().max(0) as u64)
    }

    /// The next candidate after a collision.
    pub fn next(self) -> Self {
        Self(self.0.saturating_add(1))
    }

    pub fn as_u64(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ProposalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for ProposalId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.parse().map(Self)
    }
}

// ============================================================================
// ENUMS
// ============================================================================

/// Error when parsing an invalid enum string.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumParseError {
    pub kind: &'static str,
    pub value: String,
}

impl fmt::Display for EnumParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Invalid {}: {}", self.kind, self.value)
    }
}

impl std::error::Error for EnumParseError {}

/// Category of a governance proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProposalType {
    General,
    ParameterChange,
    Treasury,
    Upgrade,
    Membership,
}

impl ProposalType {
    pub const ALL: [ProposalType; 5] = [
        ProposalType::General,
        ProposalType::ParameterChange,
        ProposalType::Treasury,
        ProposalType::Upgrade,
        ProposalType::Membership,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalType::General => "general",
            ProposalType::ParameterChange => "parameter_change",
            ProposalType::Treasury => "treasury",
            ProposalType::Upgrade => "upgrade",
            ProposalType::Membership => "membership",
        }
    }
}

impl fmt::Display for ProposalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProposalType {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let lowered = s.trim().to_lowercase();
        Self::ALL
            .into_iter()
            .find(|t| t.as_str() == lowered)
            .ok_or_else(|| EnumParseError {
                kind: "proposal type",
                value: s.to_string(),
            })
    }
}

/// A voter's choice.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VoteOption {
    For,
    Against,
    Abstain,
}

impl VoteOption {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteOption::For => "for",
            VoteOption::Against => "against",
            VoteOption::Abstain => "abstain",
        }
    }
}

impl fmt::Display for VoteOption {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteOption {
    type Err = EnumParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "for" => Ok(VoteOption::For),
            "against" => Ok(VoteOption::Against),
            "abstain" => Ok(VoteOption::Abstain),
            _ => Err(EnumParseError {
                kind: "vote option",
                value: s.to_string(),
            }),
        }
    }
}

/// Derived lifecycle state of a proposal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProposalStatus {
    Active,
    Passed,
    Rejected,
    Invalid,
}

impl ProposalStatus {
    pub fn is_terminal(&self) -> bool {
        !matches!(self, ProposalStatus::Active)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ProposalStatus::Active => "active",
            ProposalStatus::Passed => "passed",
            ProposalStatus::Rejected => "rejected",
            ProposalStatus::Invalid => "invalid",
        }
    }
}

impl fmt::Display for ProposalStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// VOTE
// ============================================================================

/// A recorded vote. The weight is the voter's holdings when the vote was cast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vote {
    pub voter: Identity,
    pub option: VoteOption,
    pub weight: Weight,
    pub cast_at: Timestamp,
}

// ============================================================================
// TALLY
// ============================================================================

/// Weight sums per option plus voter counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Tally {
    pub for_weight: u128,
    pub against_weight: u128,
    pub abstain_weight: u128,
    pub unique_voters: usize,
    pub total_votes: usize,
}

impl Tally {
    /// Sum a vote sequence.
    pub fn from_votes(votes: &[Vote]) -> Self {
        let mut tally = Tally::default();
        let mut voters = HashSet::with_capacity(votes.len());
        for vote in votes {
            let weight = u128::from(vote.weight);
            match vote.option {
                VoteOption::For => tally.for_weight += weight,
                VoteOption::Against => tally.against_weight += weight,
                VoteOption::Abstain => tally.abstain_weight += weight,
            }
            voters.insert(&vote.voter);
            tally.total_votes += 1;
        }
        tally.unique_voters = voters.len();
        tally
    }

    pub fn quorum_reached(&self, quorum: usize) -> bool {
        self.unique_voters >= quorum
    }

    /// Outcome of a closed vote. Quorum is checked first; ties reject.
    pub fn outcome(&self, quorum: usize) -> ProposalStatus {
        if !self.quorum_reached(quorum) {
            ProposalStatus::Invalid
        } else if self.for_weight > self.against_weight {
            ProposalStatus::Passed
        } else {
            ProposalStatus::Rejected
        }
    }
}

/// A tally together with the status it implies at a given instant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TallyReport {
    pub proposal_id: ProposalId,
    pub tally: Tally,
    pub quorum: usize,
    pub quorum_reached: bool,
    pub status: ProposalStatus,
    pub evaluated_at: Timestamp,
}

// ============================================================================
// PROPOSAL
// ============================================================================

/// Input for a new proposal, before the ledger assigns an id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProposalDraft {
    pub proposal_type: ProposalType,
    pub title: String,
    pub description: String,
    pub creator: Identity,
    pub created_at: Timestamp,
    pub end_at: Timestamp,
}

/// A governance proposal and its append-only vote sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Proposal {
    pub id: ProposalId,
    pub proposal_type: ProposalType,
    pub title: String,
    pub description: String,
    pub creator: Identity,
    pub created_at: Timestamp,
    pub end_at: Timestamp,
    pub votes: Vec<Vote>,
}

impl Proposal {
    /// Materialize a draft under an allocated id.
    pub fn from_draft(id: ProposalId, draft: ProposalDraft) -> Self {
        Self {
            id,
            proposal_type: draft.proposal_type,
            title: draft.title,
            description: draft.description,
            creator: draft.creator,
            created_at: draft.created_at,
            end_at: draft.end_at,
            votes: Vec::new(),
        }
    }

    /// Votes are admitted up to and including `end_at`.
    pub fn accepts_votes_at(&self, now: Timestamp) -> bool {
        now <= self.end_at
    }

    pub fn vote_of(&self, voter: &Identity) -> Option<&Vote> {
        self.votes.iter().find(|v| &v.voter == voter)
    }

    pub fn has_voted(&self, voter: &Identity) -> bool {
        self.vote_of(voter).is_some()
    }

    pub fn tally(&self) -> Tally {
        Tally::from_votes(&self.votes)
    }

    /// Status at `now`. Active strictly before `end_at`.
    pub fn status_at(&self, now: Timestamp, quorum: usize) -> ProposalStatus {
        if now < self.end_at {
            ProposalStatus::Active
        } else {
            self.tally().outcome(quorum)
        }
    }

    pub fn tally_report(&self, now: Timestamp, quorum: usize) -> TallyReport {
        let tally = self.tally();
        let status = self.status_at(now, quorum);
        TallyReport {
            proposal_id: self.id,
            quorum,
            quorum_reached: tally.quorum_reached(quorum),
            tally,
            status,
            evaluated_at: now,
        }
    }
}

/// A proposal paired with its status at read time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProposalView {
    pub proposal: Proposal,
    pub status: ProposalStatus,
}

impl ProposalView {
    pub fn at(proposal: Proposal, now: Timestamp, quorum: usize) -> Self {
        let status = proposal.status_at(now, quorum);
        Self { proposal, status }
    }
}
