//! LedgerView Storage - Durable Store, Read-Model Cache and Proposal Ledger
//!
//! Everything that outlives a process goes through [`PersistentStore`]:
//! last-known-good cache values and the append-only proposal ledger. The
//! [`ReadModelCache`] sits in front of slow upstream reads and the
//! [`jobs`] module keeps its tracked keys warm.

pub mod cache;
pub mod jobs;
pub mod keys;
pub mod proposal_store;
pub mod store;

// Re-export cache types for the governance layer
pub use cache::{
    CacheEntry, CacheRead, CacheStats, CachedValue, EntryState, ReadModelCache, RefreshSummary,
    ValueFetcher,
};
pub use jobs::{cache_refresh_task, RefreshMetrics, RefreshSnapshot};
pub use keys::{CacheKey, KeyDomain, OwnerContext, ScopedKey};
pub use proposal_store::ProposalStore;
pub use store::{LmdbStore, LmdbStoreError, MemoryStore, PersistentStore};
