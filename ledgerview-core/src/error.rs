//! Error types for LedgerView operations

use crate::{Identity, ProposalId, Timestamp};
use thiserror::Error;

/// Governance rule violations returned to the caller for direct user feedback.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum GovernanceError {
    #[error("Identity {identity} has no voting power")]
    NotEligible { identity: Identity },

    #[error("Proposal not found: {proposal_id}")]
    NotFound { proposal_id: ProposalId },

    #[error("Voting closed for proposal {proposal_id} at {end_at}")]
    VotingClosed {
        proposal_id: ProposalId,
        end_at: Timestamp,
    },

    #[error("Identity {voter} already voted on proposal {proposal_id}")]
    DuplicateVote {
        proposal_id: ProposalId,
        voter: Identity,
    },
}

/// Upstream read failures.
///
/// Only surfaced when the cache holds no prior value for the key.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum FetchError {
    #[error("Upstream read failed for {key}: {reason}")]
    Upstream { key: String, reason: String },

    #[error("Upstream read timed out for {key}")]
    Timeout { key: String },

    #[error("Unexpected value for {key}: expected {expected}, got {got}")]
    UnexpectedValue {
        key: String,
        expected: String,
        got: String,
    },

    #[error("Fetch task for {key} aborted: {reason}")]
    Aborted { key: String, reason: String },
}

/// Durable store errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum StorageError {
    #[error("Corrupt data at {key}: {reason}")]
    Corrupt { key: String, reason: String },

    #[error("Store backend failure: {reason}")]
    Backend { reason: String },

    #[error("Serialization failed for {key}: {reason}")]
    Serialization { key: String, reason: String },
}

/// Validation errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Required field missing: {field}")]
    RequiredFieldMissing { field: String },

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

/// Configuration errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ConfigError {
    #[error("Invalid value for {field}: {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },
}

/// Flat classification of every failure the system can report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    NotEligible,
    NotFound,
    VotingClosed,
    DuplicateVote,
    FetchFailed,
    StoreCorrupt,
    Storage,
    Validation,
    Config,
}

/// Master error type for all LedgerView errors.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum LedgerError {
    #[error("Governance error: {0}")]
    Governance(#[from] GovernanceError),

    #[error("Fetch failed: {0}")]
    Fetch(#[from] FetchError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    #[error("Config error: {0}")]
    Config(#[from] ConfigError),
}

impl LedgerError {
    /// Map this error onto its single taxonomy entry.
    pub fn kind(&self) -> ErrorKind {
        match self {
            LedgerError::Governance(GovernanceError::NotEligible { .. }) => ErrorKind::NotEligible,
            LedgerError::Governance(GovernanceError::NotFound { .. }) => ErrorKind::NotFound,
            LedgerError::Governance(GovernanceError::VotingClosed { .. }) => {
                ErrorKind::VotingClosed
            }
            LedgerError::Governance(GovernanceError::DuplicateVote { .. }) => {
                ErrorKind::DuplicateVote
            }
            LedgerError::Fetch(_) => ErrorKind::FetchFailed,
            LedgerError::Storage(StorageError::Corrupt { .. }) => ErrorKind::StoreCorrupt,
            LedgerError::Storage(_) => ErrorKind::Storage,
            LedgerError::Validation(_) => ErrorKind::Validation,
            LedgerError::Config(_) => ErrorKind::Config,
        }
    }
}

/// Result type alias for LedgerView operations.
pub type LedgerResult<T> = Result<T, LedgerError>;

/// Result type alias for upstream reads.
pub type FetchResult<T> = Result<T, FetchError>;

// =============================================================================
// TESTS
// =============================================================================
