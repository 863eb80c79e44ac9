//! LedgerView Core - Data Types and Capabilities
//!
//! Pure data structures shared by every other crate: identities, proposals,
//! votes and tallies, the error taxonomy, configuration, the clock, and the
//! [`ChainReader`] capability through which remote ledger data enters the
//! system.

pub mod chain;
pub mod clock;
pub mod config;
pub mod error;
pub mod identity;
pub mod proposal;

pub use chain::{ChainReader, ChainValue, LogEntry, LogFilter, ValueCall};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{CacheConfig, CacheNamespace, GovernanceConfig, LedgerConfig};
pub use error::{
    ConfigError, ErrorKind, FetchError, FetchResult, GovernanceError, LedgerError, LedgerResult,
    StorageError, ValidationError,
};
pub use identity::{Identity, Timestamp, Weight};
pub use proposal::{
    EnumParseError, Proposal, ProposalDraft, ProposalId, ProposalStatus, ProposalType,
    ProposalView, Tally, TallyReport, Vote, VoteOption,
};
