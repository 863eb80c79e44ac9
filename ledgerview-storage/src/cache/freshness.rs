//! Freshness states and read results.
//!
//! Every cache read reports how fresh its value is, so callers never mistake
//! a fallback value for a live one.

use std::time::Duration;

use ledgerview_core::Timestamp;
use serde::{Deserialize, Serialize};

use crate::keys::CacheKey;

/// Freshness state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntryState {
    /// Younger than its TTL.
    Fresh,
    /// Past its TTL, still served until replaced or purged.
    Stale,
    /// A refresh for this key is in flight.
    Fetching,
    /// The last refresh failed; the previous value is still served.
    Error,
}

/// Age of a value fetched at `fetched_at`, clamped at zero.
pub(crate) fn age_at(fetched_at: Timestamp, now: Timestamp) -> Duration {
    now.signed_duration_since(fetched_at)
        .to_std()
        .unwrap_or(Duration::ZERO)
}

/// A resolved cache entry.
#[derive(Debug, Clone)]
pub struct CacheEntry<V> {
    pub key: CacheKey,
    pub value: V,
    pub fetched_at: Timestamp,
    pub ttl: Duration,
    /// Reason of the last failed refresh, cleared by the next success.
    pub last_error: Option<String>,
}

impl<V> CacheEntry<V> {
    pub fn new(key: CacheKey, value: V, fetched_at: Timestamp, ttl: Duration) -> Self {
        Self {
            key,
            value,
            fetched_at,
            ttl,
            last_error: None,
        }
    }

    pub fn age(&self, now: Timestamp) -> Duration {
        age_at(self.fetched_at, now)
    }

    /// Fresh while strictly younger than `ttl`.
    pub fn is_fresh_for(&self, ttl: Duration, now: Timestamp) -> bool {
        self.age(now) < ttl
    }

    pub fn is_fresh(&self, now: Timestamp) -> bool {
        self.is_fresh_for(self.ttl, now)
    }

    pub(crate) fn mark_failed(&mut self, reason: String) {
        self.last_error = Some(reason);
    }

    /// Reported state. An in-flight refresh takes precedence, then a failed
    /// refresh, then age.
    pub fn state_at(&self, now: Timestamp, fetching: bool) -> EntryState {
        if fetching {
            EntryState::Fetching
        } else if self.last_error.is_some() {
            EntryState::Error
        } else if self.is_fresh(now) {
            EntryState::Fresh
        } else {
            EntryState::Stale
        }
    }
}

/// Durable form of an entry: the value and when it was fetched.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct PersistedEntry<V> {
    pub value: V,
    pub fetched_at: Timestamp,
}

/// Result of a cache read, carrying freshness metadata.
#[derive(Debug, Clone)]
pub struct CacheRead<V> {
    value: V,
    fetched_at: Timestamp,
    from_cache: bool,
    state: EntryState,
}

impl<V> CacheRead<V> {
    /// Served from a resolved entry without an upstream call.
    pub fn from_cache(value: V, fetched_at: Timestamp, state: EntryState) -> Self {
        Self {
            value,
            fetched_at,
            from_cache: true,
            state,
        }
    }

    /// Produced by an upstream fetch this read started or joined.
    pub fn from_upstream(value: V, fetched_at: Timestamp) -> Self {
        Self {
            value,
            fetched_at,
            from_cache: false,
            state: EntryState::Fresh,
        }
    }

    pub fn value(&self) -> &V {
        &self.value
    }

    pub fn into_value(self) -> V {
        self.value
    }

    pub fn fetched_at(&self) -> Timestamp {
        self.fetched_at
    }

    /// True when no upstream result backs this read.
    pub fn from_cache_flag(&self) -> bool {
        self.from_cache
    }

    pub fn state(&self) -> EntryState {
        self.state
    }

    /// True for reads served from the last-known-good value after a failed
    /// refresh.
    pub fn is_fallback(&self) -> bool {
        self.from_cache && self.state == EntryState::Error
    }

    pub fn staleness(&self, now: Timestamp) -> Duration {
        age_at(self.fetched_at, now)
    }

    /// Map the inner value to a new type.
    pub fn map<U, F>(self, f: F) -> CacheRead<U>
    where
        F: FnOnce(V) -> U,
    {
        CacheRead {
            value: f(self.value),
            fetched_at: self.fetched_at,
            from_cache: self.from_cache,
            state: self.state,
        }
    }
}

impl<V> AsRef<V> for CacheRead<V> {
    fn as_ref(&self) -> &V {
        &self.value
    }
}
