//! LedgerView Governance - Proposals, Votes and Tallies
//!
//! [`GovernanceEngine`] is the only writer of the proposal ledger. It admits
//! proposals and votes against voting weights read through the read-model
//! cache and answers every status question by recomputing it at read time.
//!
//! # Example
//!
//! ```ignore
//! let config = LedgerConfig::from_env();
//! let store = Arc::new(LmdbStore::open(data_dir, config.cache.lmdb_map_size_mb)?);
//! let engine = GovernanceEngine::new(store, reader, Arc::new(SystemClock), config.clone())?;
//!
//! let (shutdown_tx, shutdown_rx) = watch::channel(false);
//! tokio::spawn(cache_refresh_task(engine.power_cache().clone(), config.cache, shutdown_rx));
//!
//! let proposal = engine
//!     .create_proposal(&creator, ProposalType::ParameterChange, "Lower fee", "…")
//!     .await?;
//! engine.cast_vote(proposal.id, &voter, VoteOption::For).await?;
//! ```

pub mod engine;
pub mod power;

pub use engine::GovernanceEngine;
pub use power::VotingPowerFetcher;
