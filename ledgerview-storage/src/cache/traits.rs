//! Fetcher trait, cacheable value marker and statistics.

use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use ledgerview_core::FetchResult;
use serde::{de::DeserializeOwned, Serialize};

use crate::keys::CacheKey;

/// Marker trait for values the read-model cache can hold.
///
/// Values are cloned out to every waiter of a coalesced fetch and serialized
/// to the durable store, and fetches run on spawned tasks.
pub trait CachedValue: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

impl<T> CachedValue for T where T: Clone + Serialize + DeserializeOwned + Send + Sync + 'static {}

/// Upstream source for one kind of cached value.
///
/// Implementations typically wrap a `ChainReader` and convert its structured
/// result into a typed value for the key.
#[async_trait]
pub trait ValueFetcher<V: CachedValue>: Send + Sync {
    async fn fetch(&self, key: &CacheKey) -> FetchResult<V>;
}

/// Live counters, updated with relaxed atomics.
#[derive(Debug, Default)]
pub(crate) struct CacheCounters {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub upstream_fetches: AtomicU64,
    pub coalesced: AtomicU64,
    pub fallbacks: AtomicU64,
    pub fetch_errors: AtomicU64,
    pub hydrated: AtomicU64,
}

impl CacheCounters {
    pub fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Statistics about cache usage.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Reads served from a fresh entry.
    pub hits: u64,
    /// Reads that needed an upstream result.
    pub misses: u64,
    /// Upstream calls actually issued.
    pub upstream_fetches: u64,
    /// Reads that attached to an existing in-flight fetch.
    pub coalesced: u64,
    /// Reads answered with a previous value after a failed fetch.
    pub fallbacks: u64,
    /// Failed upstream calls.
    pub fetch_errors: u64,
    /// Entries loaded from the durable store.
    pub hydrated: u64,
    /// Entries currently held in memory.
    pub entry_count: u64,
    /// Fetches currently in flight.
    pub in_flight: u64,
}

impl CacheStats {
    pub(crate) fn from_counters(counters: &CacheCounters, entry_count: u64, in_flight: u64) -> Self {
        Self {
            hits: counters.hits.load(Ordering::Relaxed),
            misses: counters.misses.load(Ordering::Relaxed),
            upstream_fetches: counters.upstream_fetches.load(Ordering::Relaxed),
            coalesced: counters.coalesced.load(Ordering::Relaxed),
            fallbacks: counters.fallbacks.load(Ordering::Relaxed),
            fetch_errors: counters.fetch_errors.load(Ordering::Relaxed),
            hydrated: counters.hydrated.load(Ordering::Relaxed),
            entry_count,
            in_flight,
        }
    }

    /// Calculate the hit rate (0.0 to 1.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}
