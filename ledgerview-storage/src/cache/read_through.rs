//! Read-through cache with coalesced fetches and last-known-good fallback.
//!
//! Reads of resolved entries go through a `DashMap` and never wait on a
//! fetch. Misses go through a single in-flight map: the first caller for a
//! key spawns the upstream fetch, later callers attach to the same shared
//! future. Fetches run as spawned tasks, so a fetch every caller gave up on
//! still completes and fills the cache.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use dashmap::DashMap;
use futures_util::future::{join_all, BoxFuture, Shared};
use futures_util::FutureExt;
use ledgerview_core::{CacheConfig, Clock, FetchError, FetchResult, LedgerResult, Timestamp};

use super::freshness::{age_at, CacheEntry, CacheRead, EntryState, PersistedEntry};
use super::traits::{CacheCounters, CacheStats, CachedValue, ValueFetcher};
use crate::keys::{CacheKey, KeyDomain, OwnerContext};
use crate::store::{corrupt_data, PersistentStore};

type SharedFetch<V> = Shared<BoxFuture<'static, FetchResult<(V, Timestamp)>>>;

/// A key the refresh job keeps warm while callers keep reading it.
struct Tracked<V: CachedValue> {
    cache_key: CacheKey,
    ttl: Duration,
    fetcher: Arc<dyn ValueFetcher<V>>,
    last_read: Timestamp,
}

/// Result of claiming the in-flight slot for a key.
enum Flight<V: CachedValue> {
    /// A fetch finished since the caller's freshness check.
    Resolved(CacheRead<V>),
    Pending(SharedFetch<V>),
}

/// Outcome of one [`ReadModelCache::refresh_expired`] pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RefreshSummary {
    pub started: u64,
    pub refreshed: u64,
    pub failed: u64,
    /// Keys dropped from tracking because nobody read them recently.
    pub idle_dropped: u64,
}

struct CacheInner<V: CachedValue> {
    entries: DashMap<String, CacheEntry<V>>,
    in_flight: Mutex<HashMap<String, SharedFetch<V>>>,
    tracked: DashMap<String, Tracked<V>>,
    store: Arc<dyn PersistentStore>,
    clock: Arc<dyn Clock>,
    config: CacheConfig,
    counters: CacheCounters,
}

/// Keyed read-model cache over one value type.
///
/// Cloning is cheap and every clone shares the same entries.
pub struct ReadModelCache<V: CachedValue> {
    inner: Arc<CacheInner<V>>,
}

impl<V: CachedValue> Clone for ReadModelCache<V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<V: CachedValue> ReadModelCache<V> {
    pub fn new(store: Arc<dyn PersistentStore>, clock: Arc<dyn Clock>, config: CacheConfig) -> Self {
        Self {
            inner: Arc::new(CacheInner {
                entries: DashMap::new(),
                in_flight: Mutex::new(HashMap::new()),
                tracked: DashMap::new(),
                store,
                clock,
                config,
                counters: CacheCounters::default(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Read `key`, fetching through `fetcher` unless a value younger than
    /// `ttl` is held in memory or in the durable store.
    ///
    /// A failed fetch is answered with the previous value when one exists.
    /// Only a failure with no prior value returns `FetchFailed`.
    pub async fn get(
        &self,
        key: &CacheKey,
        ttl: Duration,
        fetcher: Arc<dyn ValueFetcher<V>>,
    ) -> LedgerResult<CacheRead<V>> {
        let encoded = key.encode();
        self.track(&encoded, key, ttl, &fetcher);

        if let Some(read) = self.fresh_hit(&encoded, ttl) {
            return Ok(read);
        }
        if !self.inner.entries.contains_key(&encoded) {
            self.inner.hydrate(key, &encoded, ttl).await;
            if let Some(read) = self.fresh_hit(&encoded, ttl) {
                return Ok(read);
            }
        }

        let fetch = match self.join_or_start(key, &encoded, ttl, fetcher) {
            Flight::Resolved(read) => {
                CacheCounters::bump(&self.inner.counters.hits);
                tracing::debug!(key = %encoded, "cache hit after concurrent fetch");
                return Ok(read);
            }
            Flight::Pending(fetch) => fetch,
        };

        CacheCounters::bump(&self.inner.counters.misses);
        tracing::debug!(key = %encoded, "cache miss");

        match fetch.await {
            Ok((value, fetched_at)) => Ok(CacheRead::from_upstream(value, fetched_at)),
            Err(err) => self.fallback(&encoded, err),
        }
    }

    /// [`get`](Self::get) with the TTL configured for the key's namespace.
    pub async fn get_with_policy(
        &self,
        key: &CacheKey,
        fetcher: Arc<dyn ValueFetcher<V>>,
    ) -> LedgerResult<CacheRead<V>> {
        let ttl = self.inner.config.ttl_for(key.namespace());
        self.get(key, ttl, fetcher).await
    }

    /// The in-memory entry for `key`, if any. Never performs I/O.
    pub fn peek(&self, key: &CacheKey) -> Option<CacheRead<V>> {
        let encoded = key.encode();
        let now = self.inner.clock.now();
        let fetching = self.is_fetching(&encoded);
        self.inner.entries.get(&encoded).map(|entry| {
            CacheRead::from_cache(
                entry.value.clone(),
                entry.fetched_at,
                entry.state_at(now, fetching),
            )
        })
    }

    /// Freshness state of the in-memory entry for `key`.
    pub fn entry_state(&self, key: &CacheKey) -> Option<EntryState> {
        let encoded = key.encode();
        let now = self.inner.clock.now();
        let fetching = self.is_fetching(&encoded);
        self.inner
            .entries
            .get(&encoded)
            .map(|entry| entry.state_at(now, fetching))
    }

    /// Purge `key` from memory and from the durable store, and stop refreshing
    /// it. Returns whether anything was removed.
    ///
    /// A fetch already in flight for the key is not cancelled.
    pub async fn invalidate(&self, key: &CacheKey) -> LedgerResult<bool> {
        let encoded = key.encode();
        let in_memory = self.inner.entries.remove(&encoded).is_some();
        self.inner.tracked.remove(&encoded);
        let persisted = self.inner.store.delete(&key.scoped()).await?;

        tracing::debug!(key = %encoded, in_memory, persisted, "cache entry invalidated");
        Ok(in_memory || persisted)
    }

    /// Purge every entry of one owner. Returns the number of persisted entries
    /// deleted.
    pub async fn invalidate_owner(&self, owner: &OwnerContext) -> LedgerResult<u64> {
        self.inner.entries.retain(|_, entry| entry.key.owner() != owner);
        self.inner.tracked.retain(|_, tracked| tracked.cache_key.owner() != owner);
        let deleted = self.inner.store.delete_owner(KeyDomain::Cache, owner).await?;

        tracing::info!(owner = %owner, deleted, "cache owner purged");
        Ok(deleted)
    }

    /// Start a refresh for every tracked key that holds a stale value and has
    /// no fetch in flight, and wait for them.
    ///
    /// Keys not read through `get` within `refresh_idle_after` are dropped
    /// from tracking first. Keys with no resolved value are left to the next
    /// `get`.
    pub async fn refresh_expired(&self) -> RefreshSummary {
        let now = self.inner.clock.now();
        let idle_after = self.inner.config.refresh_idle_after;

        let tracked_before = self.inner.tracked.len();
        self.inner
            .tracked
            .retain(|_, tracked| age_at(tracked.last_read, now) <= idle_after);
        let idle_dropped = tracked_before.saturating_sub(self.inner.tracked.len()) as u64;
        if idle_dropped > 0 {
            tracing::debug!(idle_dropped, "stopped refreshing idle cache keys");
        }

        let due: Vec<(CacheKey, String, Duration, Arc<dyn ValueFetcher<V>>)> = self
            .inner
            .tracked
            .iter()
            .filter(|tracked| {
                let stale = self
                    .inner
                    .entries
                    .get(tracked.key())
                    .map(|entry| !entry.is_fresh_for(tracked.ttl, now))
                    .unwrap_or(false);
                stale && !self.is_fetching(tracked.key())
            })
            .map(|tracked| {
                (
                    tracked.cache_key.clone(),
                    tracked.key().clone(),
                    tracked.ttl,
                    Arc::clone(&tracked.fetcher),
                )
            })
            .collect();

        let fetches: Vec<_> = due
            .into_iter()
            .filter_map(|(key, encoded, ttl, fetcher)| {
                match self.join_or_start(&key, &encoded, ttl, fetcher) {
                    Flight::Pending(fetch) => Some(fetch),
                    Flight::Resolved(_) => None,
                }
            })
            .collect();

        let mut summary = RefreshSummary {
            started: fetches.len() as u64,
            idle_dropped,
            ..Default::default()
        };
        for result in join_all(fetches).await {
            match result {
                Ok(_) => summary.refreshed += 1,
                Err(_) => summary.failed += 1,
            }
        }
        summary
    }

    pub fn stats(&self) -> CacheStats {
        let in_flight = self
            .inner
            .lock_in_flight()
            .values()
            .filter(|fetch| fetch.peek().is_none())
            .count();
        CacheStats::from_counters(
            &self.inner.counters,
            self.inner.entries.len() as u64,
            in_flight as u64,
        )
    }

    /// Number of entries held in memory.
    pub fn len(&self) -> usize {
        self.inner.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.entries.is_empty()
    }

    /// Number of keys the refresh job keeps warm.
    pub fn tracked_len(&self) -> usize {
        self.inner.tracked.len()
    }

    fn track(&self, encoded: &str, key: &CacheKey, ttl: Duration, fetcher: &Arc<dyn ValueFetcher<V>>) {
        self.inner.tracked.insert(
            encoded.to_string(),
            Tracked {
                cache_key: key.clone(),
                ttl,
                fetcher: Arc::clone(fetcher),
                last_read: self.inner.clock.now(),
            },
        );
    }

    fn fresh_hit(&self, encoded: &str, ttl: Duration) -> Option<CacheRead<V>> {
        let read = self.fresh_read(encoded, ttl)?;
        CacheCounters::bump(&self.inner.counters.hits);
        tracing::debug!(key = %encoded, "cache hit");
        Some(read)
    }

    fn fresh_read(&self, encoded: &str, ttl: Duration) -> Option<CacheRead<V>> {
        let now = self.inner.clock.now();
        let entry = self.inner.entries.get(encoded)?;
        if !entry.is_fresh_for(ttl, now) {
            return None;
        }
        Some(CacheRead::from_cache(
            entry.value.clone(),
            entry.fetched_at,
            EntryState::Fresh,
        ))
    }

    fn fallback(&self, encoded: &str, err: FetchError) -> LedgerResult<CacheRead<V>> {
        match self.inner.entries.get(encoded) {
            Some(entry) => {
                CacheCounters::bump(&self.inner.counters.fallbacks);
                tracing::warn!(
                    key = %encoded,
                    error = %err,
                    fetched_at = %entry.fetched_at,
                    "serving last-known-good value"
                );
                Ok(CacheRead::from_cache(
                    entry.value.clone(),
                    entry.fetched_at,
                    EntryState::Error,
                ))
            }
            None => Err(err.into()),
        }
    }

    fn is_fetching(&self, encoded: &str) -> bool {
        self.inner
            .lock_in_flight()
            .get(encoded)
            .map(|fetch| fetch.peek().is_none())
            .unwrap_or(false)
    }

    /// Attach to the fetch in flight for `encoded`, or spawn one.
    ///
    /// A fetch completes by filling `entries` before it releases its slot,
    /// so the freshness re-check under the slot lock sees any fetch that
    /// finished after the caller's own check.
    fn join_or_start(
        &self,
        key: &CacheKey,
        encoded: &str,
        ttl: Duration,
        fetcher: Arc<dyn ValueFetcher<V>>,
    ) -> Flight<V> {
        let mut in_flight = self.inner.lock_in_flight();
        if let Some(existing) = in_flight.get(encoded) {
            if existing.peek().is_none() {
                CacheCounters::bump(&self.inner.counters.coalesced);
                tracing::debug!(key = %encoded, "joining in-flight fetch");
                return Flight::Pending(existing.clone());
            }
        }
        if let Some(read) = self.fresh_read(encoded, ttl) {
            return Flight::Resolved(read);
        }

        let fetch = self.spawn_fetch(key.clone(), encoded.to_string(), fetcher);
        in_flight.insert(encoded.to_string(), fetch.clone());
        Flight::Pending(fetch)
    }

    fn spawn_fetch(
        &self,
        key: CacheKey,
        encoded: String,
        fetcher: Arc<dyn ValueFetcher<V>>,
    ) -> SharedFetch<V> {
        let inner = Arc::clone(&self.inner);
        let task_key = encoded.clone();
        let handle = tokio::spawn(async move {
            CacheCounters::bump(&inner.counters.upstream_fetches);
            let result = fetcher.fetch(&key).await;
            inner.complete(&key, &task_key, result).await
        });

        async move {
            match handle.await {
                Ok(result) => result,
                Err(join_err) => Err(FetchError::Aborted {
                    key: encoded,
                    reason: join_err.to_string(),
                }),
            }
        }
        .boxed()
        .shared()
    }
}

impl<V: CachedValue> CacheInner<V> {
    fn lock_in_flight(&self) -> std::sync::MutexGuard<'_, HashMap<String, SharedFetch<V>>> {
        self.in_flight.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Record a fetch result and release the in-flight slot.
    async fn complete(
        &self,
        key: &CacheKey,
        encoded: &str,
        result: FetchResult<V>,
    ) -> FetchResult<(V, Timestamp)> {
        let outcome = match result {
            Ok(value) => {
                let fetched_at = self.clock.now();
                let ttl = self
                    .tracked
                    .get(encoded)
                    .map(|tracked| tracked.ttl)
                    .unwrap_or_else(|| self.config.ttl_for(key.namespace()));
                self.entries.insert(
                    encoded.to_string(),
                    CacheEntry::new(key.clone(), value.clone(), fetched_at, ttl),
                );
                self.persist(key, &value, fetched_at).await;
                Ok((value, fetched_at))
            }
            Err(err) => {
                CacheCounters::bump(&self.counters.fetch_errors);
                tracing::warn!(key = %encoded, error = %err, "upstream fetch failed");
                if let Some(mut entry) = self.entries.get_mut(encoded) {
                    entry.mark_failed(err.to_string());
                }
                Err(err)
            }
        };

        self.lock_in_flight().remove(encoded);
        outcome
    }

    async fn persist(&self, key: &CacheKey, value: &V, fetched_at: Timestamp) {
        let record = PersistedEntry {
            value: value.clone(),
            fetched_at,
        };
        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                tracing::error!(key = %key, error = %e, "failed to serialize cache entry");
                return;
            }
        };
        if let Err(e) = self.store.set(&key.scoped(), &bytes).await {
            tracing::error!(key = %key, error = %e, "failed to persist cache entry");
        }
    }

    /// Load the persisted entry for `key` into memory. Corrupt data is
    /// deleted and treated as a miss; backend failures are treated as a miss.
    async fn hydrate(&self, key: &CacheKey, encoded: &str, ttl: Duration) {
        let scoped = key.scoped();
        let bytes = match self.store.get(&scoped).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return,
            Err(e) => {
                tracing::warn!(key = %encoded, error = %e, "cache hydration read failed");
                return;
            }
        };

        match serde_json::from_slice::<PersistedEntry<V>>(&bytes) {
            Ok(record) => {
                CacheCounters::bump(&self.counters.hydrated);
                tracing::debug!(key = %encoded, fetched_at = %record.fetched_at, "hydrated cache entry");
                // A fetch that finished meanwhile wins over the persisted copy.
                self.entries.entry(encoded.to_string()).or_insert_with(|| {
                    CacheEntry::new(key.clone(), record.value, record.fetched_at, ttl)
                });
            }
            Err(e) => {
                let err = corrupt_data(&scoped, e);
                tracing::warn!(error = %err, kind = ?err.kind(), "corrupt persisted cache entry, discarding");
                if let Err(e) = self.store.delete(&scoped).await {
                    tracing::error!(key = %encoded, error = %e, "failed to delete corrupt cache entry");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;
    use async_trait::async_trait;
    use chrono::{TimeZone, Utc};
    use ledgerview_core::{CacheNamespace, ErrorKind, Identity, ManualClock};
    use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};

    struct CountingFetcher {
        value: AtomicU64,
        fail: AtomicBool,
        delay: Duration,
        calls: AtomicUsize,
    }

    impl CountingFetcher {
        fn new(value: u64) -> Arc<Self> {
            Self::with_delay(value, Duration::ZERO)
        }

        fn with_delay(value: u64, delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                value: AtomicU64::new(value),
                fail: AtomicBool::new(false),
                delay,
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ValueFetcher<u64> for CountingFetcher {
        async fn fetch(&self, key: &CacheKey) -> FetchResult<u64> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.fail.load(Ordering::SeqCst) {
                return Err(FetchError::Upstream {
                    key: key.to_string(),
                    reason: "rpc unavailable".to_string(),
                });
            }
            Ok(self.value.load(Ordering::SeqCst))
        }
    }

    fn t0() -> Timestamp {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    fn setup() -> (ReadModelCache<u64>, Arc<MemoryStore>, Arc<ManualClock>) {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let cache = ReadModelCache::new(store.clone(), clock.clone(), CacheConfig::default());
        (cache, store, clock)
    }

    fn power_key(raw: &str) -> CacheKey {
        CacheKey::for_identity(CacheNamespace::VotingPower, &Identity::parse(raw).unwrap(), "bond")
    }

    const TTL: Duration = Duration::from_secs(30);

    #[tokio::test]
    async fn test_miss_then_hit() {
        let (cache, _store, _clock) = setup();
        let fetcher = CountingFetcher::new(7);
        let key = power_key("0xa");

        let first = cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(*first.value(), 7);
        assert!(!first.from_cache_flag());

        let second = cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(*second.value(), 7);
        assert!(second.from_cache_flag());
        assert_eq!(second.state(), EntryState::Fresh);
        assert_eq!(fetcher.calls(), 1);

        let stats = cache.stats();
        assert_eq!(stats.hits, 1);
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.upstream_fetches, 1);
    }

    #[tokio::test]
    async fn test_concurrent_cold_reads_issue_one_fetch() {
        let (cache, _store, _clock) = setup();
        let fetcher = CountingFetcher::with_delay(5, Duration::from_millis(20));
        let key = power_key("0xa");

        let reads = (0..10).map(|_| cache.get(&key, TTL, fetcher.clone()));
        let results = join_all(reads).await;

        assert_eq!(fetcher.calls(), 1);
        for result in results {
            assert_eq!(result.unwrap().into_value(), 5);
        }
        assert_eq!(cache.stats().coalesced, 9);
    }

    #[tokio::test]
    async fn test_expired_entry_is_refetched() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::new(1);
        let key = power_key("0xa");

        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        fetcher.value.store(2, Ordering::SeqCst);
        clock.advance(chrono::Duration::seconds(31));
        assert_eq!(cache.entry_state(&key), Some(EntryState::Stale));

        let read = cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(read.into_value(), 2);
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_failed_refresh_serves_previous_value() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::new(42);
        let key = power_key("0xa");

        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        fetcher.fail.store(true, Ordering::SeqCst);
        clock.advance(chrono::Duration::seconds(60));

        let read = cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(*read.value(), 42);
        assert!(read.from_cache_flag());
        assert!(read.is_fallback());
        assert_eq!(read.fetched_at(), t0());
        assert_eq!(cache.entry_state(&key), Some(EntryState::Error));

        let stats = cache.stats();
        assert_eq!(stats.fallbacks, 1);
        assert_eq!(stats.fetch_errors, 1);
    }

    #[tokio::test]
    async fn test_first_failure_propagates() {
        let (cache, _store, _clock) = setup();
        let fetcher = CountingFetcher::new(0);
        fetcher.fail.store(true, Ordering::SeqCst);

        let err = cache
            .get(&power_key("0xa"), TTL, fetcher.clone())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FetchFailed);
        assert!(cache.peek(&power_key("0xa")).is_none());
    }

    #[tokio::test]
    async fn test_success_after_failure_clears_error_state() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::new(3);
        let key = power_key("0xa");

        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        fetcher.fail.store(true, Ordering::SeqCst);
        clock.advance(chrono::Duration::seconds(31));
        cache.get(&key, TTL, fetcher.clone()).await.unwrap();

        fetcher.fail.store(false, Ordering::SeqCst);
        fetcher.value.store(4, Ordering::SeqCst);
        let read = cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(read.into_value(), 4);
        assert_eq!(cache.entry_state(&key), Some(EntryState::Fresh));
    }

    #[tokio::test]
    async fn test_restart_hydrates_from_store() {
        let (cache, store, clock) = setup();
        let key = power_key("0xa");
        cache.get(&key, TTL, CountingFetcher::new(9)).await.unwrap();

        let restarted: ReadModelCache<u64> =
            ReadModelCache::new(store.clone(), clock.clone(), CacheConfig::default());
        let fetcher = CountingFetcher::new(100);
        let read = restarted.get(&key, TTL, fetcher.clone()).await.unwrap();

        assert_eq!(read.into_value(), 9);
        assert_eq!(fetcher.calls(), 0);
        assert_eq!(restarted.stats().hydrated, 1);
    }

    #[tokio::test]
    async fn test_stale_hydrated_entry_is_fallback_on_failure() {
        let (cache, store, clock) = setup();
        let key = power_key("0xa");
        cache.get(&key, TTL, CountingFetcher::new(9)).await.unwrap();

        clock.advance(chrono::Duration::hours(1));
        let restarted: ReadModelCache<u64> =
            ReadModelCache::new(store.clone(), clock.clone(), CacheConfig::default());
        let fetcher = CountingFetcher::new(0);
        fetcher.fail.store(true, Ordering::SeqCst);

        let read = restarted.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(read.into_value(), 9);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_corrupt_persisted_entry_is_a_miss() {
        let (cache, store, _clock) = setup();
        let key = power_key("0xa");
        store.set(&key.scoped(), b"not json").await.unwrap();

        let fetcher = CountingFetcher::new(11);
        let read = cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(read.into_value(), 11);
        assert_eq!(fetcher.calls(), 1);

        let bytes = store.get(&key.scoped()).await.unwrap().unwrap();
        let record: PersistedEntry<u64> = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.value, 11);
    }

    #[tokio::test]
    async fn test_abandoned_fetch_still_populates() {
        let (cache, _store, _clock) = setup();
        let fetcher = CountingFetcher::with_delay(8, Duration::from_millis(50));
        let key = power_key("0xa");

        let abandoned =
            tokio::time::timeout(Duration::from_millis(5), cache.get(&key, TTL, fetcher.clone())).await;
        assert!(abandoned.is_err());

        tokio::time::sleep(Duration::from_millis(150)).await;
        let peeked = cache.peek(&key).expect("abandoned fetch should fill the cache");
        assert_eq!(peeked.into_value(), 8);
        assert_eq!(cache.stats().in_flight, 0);
    }

    #[tokio::test]
    async fn test_entry_reports_fetching_during_refresh() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::with_delay(1, Duration::from_millis(50));
        let key = power_key("0xa");
        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        clock.advance(chrono::Duration::seconds(31));

        let background = cache.clone();
        let bg_key = key.clone();
        let bg_fetcher = fetcher.clone();
        let task = tokio::spawn(async move { background.get(&bg_key, TTL, bg_fetcher).await });

        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(cache.entry_state(&key), Some(EntryState::Fetching));
        assert_eq!(cache.stats().in_flight, 1);

        task.await.unwrap().unwrap();
        assert_ne!(cache.entry_state(&key), Some(EntryState::Fetching));
    }

    #[tokio::test]
    async fn test_invalidate_forces_refetch() {
        let (cache, store, _clock) = setup();
        let fetcher = CountingFetcher::new(1);
        let key = power_key("0xa");

        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert!(cache.invalidate(&key).await.unwrap());
        assert!(cache.peek(&key).is_none());
        assert!(store.get(&key.scoped()).await.unwrap().is_none());
        assert_eq!(cache.tracked_len(), 0);

        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
        assert!(!cache.invalidate(&power_key("0xb")).await.unwrap());
    }

    #[tokio::test]
    async fn test_invalidate_owner_keeps_other_owners() {
        let (cache, store, _clock) = setup();
        let fetcher = CountingFetcher::new(1);
        let alice = power_key("0xa");
        let bob = power_key("0xb");
        let alice_balance = CacheKey::for_identity(
            CacheNamespace::TokenBalance,
            &Identity::parse("0xa").unwrap(),
            "gov-token",
        );

        for key in [&alice, &bob, &alice_balance] {
            cache.get(key, TTL, fetcher.clone()).await.unwrap();
        }

        let owner = alice.owner().clone();
        assert_eq!(cache.invalidate_owner(&owner).await.unwrap(), 2);
        assert!(cache.peek(&alice).is_none());
        assert!(cache.peek(&alice_balance).is_none());
        assert!(cache.peek(&bob).is_some());
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn test_get_with_policy_uses_namespace_ttl() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let config = CacheConfig::default()
            .with_ttl(CacheNamespace::Aggregate, Duration::from_secs(300));
        let cache: ReadModelCache<u64> = ReadModelCache::new(store, clock.clone(), config);
        let fetcher = CountingFetcher::new(1);
        let key = CacheKey::shared(CacheNamespace::Aggregate, "total-bonded");

        cache.get_with_policy(&key, fetcher.clone()).await.unwrap();
        clock.advance(chrono::Duration::seconds(120));
        cache.get_with_policy(&key, fetcher.clone()).await.unwrap();
        assert_eq!(fetcher.calls(), 1);

        clock.advance(chrono::Duration::seconds(200));
        cache.get_with_policy(&key, fetcher.clone()).await.unwrap();
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_finished_before_slot_claim_is_a_hit() {
        let (cache, _store, _clock) = setup();
        let fetcher = CountingFetcher::new(6);
        let key = power_key("0xa");
        cache.get(&key, TTL, fetcher.clone()).await.unwrap();

        // A caller whose own freshness check ran before that fetch completed.
        let flight = cache.join_or_start(&key, &key.encode(), TTL, fetcher.clone());
        match flight {
            Flight::Resolved(read) => {
                assert_eq!(read.into_value(), 6);
            }
            Flight::Pending(_) => panic!("fresh entry should not start a fetch"),
        }
        assert_eq!(fetcher.calls(), 1);
        assert_eq!(cache.stats().upstream_fetches, 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_racing_reads_after_expiry_fetch_once() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::with_delay(2, Duration::from_millis(5));
        let key = power_key("0xa");
        cache.get(&key, TTL, fetcher.clone()).await.unwrap();
        clock.advance(chrono::Duration::seconds(31));

        let handles: Vec<_> = (0..32)
            .map(|_| {
                let cache = cache.clone();
                let key = key.clone();
                let fetcher = fetcher.clone();
                tokio::spawn(async move { cache.get(&key, TTL, fetcher).await })
            })
            .collect();
        for handle in handles {
            assert_eq!(handle.await.unwrap().unwrap().into_value(), 2);
        }
        assert_eq!(fetcher.calls(), 2);
    }

    #[tokio::test]
    async fn test_idle_keys_stop_refreshing() {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::new(t0()));
        let config = CacheConfig::default().with_refresh_idle_after(Duration::from_secs(60));
        let cache: ReadModelCache<u64> = ReadModelCache::new(store, clock.clone(), config);
        let fetcher = CountingFetcher::new(1);

        for i in 0..50 {
            cache
                .get(&power_key(&format!("0x{:x}", i + 1)), TTL, fetcher.clone())
                .await
                .unwrap();
        }
        assert_eq!(cache.tracked_len(), 50);

        clock.advance(chrono::Duration::seconds(45));
        assert_eq!(cache.refresh_expired().await.started, 50);
        assert_eq!(fetcher.calls(), 100);

        // Read one key again; the rest go idle.
        cache.get(&power_key("0x1"), TTL, fetcher.clone()).await.unwrap();
        clock.advance(chrono::Duration::seconds(31));
        let summary = cache.refresh_expired().await;
        assert_eq!(summary.idle_dropped, 49);
        assert_eq!(summary.started, 1);
        assert_eq!(cache.tracked_len(), 1);

        for _ in 0..3 {
            clock.advance(chrono::Duration::seconds(61));
            cache.refresh_expired().await;
        }
        assert_eq!(cache.tracked_len(), 0);
        assert_eq!(fetcher.calls(), 101);
        // Values stay readable for callers after tracking stops.
        assert!(cache.peek(&power_key("0x2")).is_some());
    }

    #[tokio::test]
    async fn test_refresh_skips_keys_without_a_value() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::new(0);
        fetcher.fail.store(true, Ordering::SeqCst);
        let key = power_key("0xa");
        assert!(cache.get(&key, TTL, fetcher.clone()).await.is_err());

        clock.advance(chrono::Duration::seconds(45));
        let summary = cache.refresh_expired().await;
        assert_eq!(summary.started, 0);
        assert_eq!(fetcher.calls(), 1);
    }

    #[tokio::test]
    async fn test_refresh_expired_only_touches_due_keys() {
        let (cache, _store, clock) = setup();
        let fetcher = CountingFetcher::new(1);
        let short = power_key("0xa");
        let long = CacheKey::shared(CacheNamespace::BlockTime, "block/100");

        cache.get(&short, TTL, fetcher.clone()).await.unwrap();
        cache.get(&long, Duration::from_secs(3600), fetcher.clone()).await.unwrap();
        assert_eq!(cache.refresh_expired().await, RefreshSummary::default());

        clock.advance(chrono::Duration::seconds(45));
        let summary = cache.refresh_expired().await;
        assert_eq!(summary.started, 1);
        assert_eq!(summary.refreshed, 1);
        assert_eq!(fetcher.calls(), 3);
        assert_eq!(cache.entry_state(&short), Some(EntryState::Fresh));
    }
}
