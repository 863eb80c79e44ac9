//! Read-model cache over upstream chain reads.
//!
//! Reads return [`CacheRead<T>`], which carries the value's age and
//! [`EntryState`], so a value served after a failed refresh is always
//! distinguishable from a live one.
//!
//! # Guarantees
//!
//! - A value younger than its TTL is served without I/O.
//! - Concurrent misses for one key share a single upstream fetch.
//! - A failed fetch falls back to the last-known-good value; only a key that
//!   never resolved surfaces `FetchFailed`.
//! - Every successful fetch is persisted, so a restart warms from the store
//!   before touching the network.
//!
//! # Example
//!
//! ```ignore
//! let key = CacheKey::for_identity(CacheNamespace::VotingPower, &voter, "bond");
//! let read = cache.get_with_policy(&key, fetcher.clone()).await?;
//! if read.is_fallback() {
//!     tracing::warn!(age = ?read.staleness(clock.now()), "showing cached voting power");
//! }
//! ```

pub mod freshness;
pub mod read_through;
pub mod traits;

pub use freshness::{CacheEntry, CacheRead, EntryState};
pub use read_through::{ReadModelCache, RefreshSummary};
pub use traits::{CacheStats, CachedValue, ValueFetcher};
