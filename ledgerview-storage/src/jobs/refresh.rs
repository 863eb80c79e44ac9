//! Cache Refresh Background Task
//!
//! Keeps tracked cache keys warm. Every `refresh_interval` the task asks the
//! cache for keys past their TTL with no fetch in flight and refreshes them
//! through the same coalescing path `get` uses, so a refresh never races a
//! caller's fetch for the same key.
//!
//! Failed refreshes are absorbed by the cache's fallback policy: the previous
//! value keeps being served and the entry reports `EntryState::Error`.
//!
//! # Configuration
//!
//! The interval comes from `CacheConfig::refresh_interval`
//! (`LEDGERVIEW_REFRESH_INTERVAL_SECS`, default 15 seconds). Keys nobody has
//! read for `CacheConfig::refresh_idle_after` (`LEDGERVIEW_REFRESH_IDLE_SECS`,
//! default 10 minutes) stop being refreshed.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use ledgerview_core::CacheConfig;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

use crate::cache::{CachedValue, ReadModelCache};

// ============================================================================
// METRICS
// ============================================================================

/// Counters for refresh activity.
#[derive(Debug, Default)]
pub struct RefreshMetrics {
    /// Total refresh cycles completed
    pub refresh_cycles: AtomicU64,

    /// Total key refreshes started
    pub refreshes_started: AtomicU64,

    /// Total key refreshes that produced a new value
    pub refreshes_succeeded: AtomicU64,

    /// Total key refreshes that failed upstream
    pub refresh_errors: AtomicU64,

    /// Total keys dropped from tracking after going unread
    pub keys_dropped_idle: AtomicU64,
}

impl RefreshMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get current snapshot of all metrics.
    pub fn snapshot(&self) -> RefreshSnapshot {
        RefreshSnapshot {
            refresh_cycles: self.refresh_cycles.load(Ordering::Relaxed),
            refreshes_started: self.refreshes_started.load(Ordering::Relaxed),
            refreshes_succeeded: self.refreshes_succeeded.load(Ordering::Relaxed),
            refresh_errors: self.refresh_errors.load(Ordering::Relaxed),
            keys_dropped_idle: self.keys_dropped_idle.load(Ordering::Relaxed),
        }
    }
}

/// Snapshot of refresh metrics at a point in time.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshSnapshot {
    pub refresh_cycles: u64,
    pub refreshes_started: u64,
    pub refreshes_succeeded: u64,
    pub refresh_errors: u64,
    pub keys_dropped_idle: u64,
}

// ============================================================================
// BACKGROUND TASK
// ============================================================================

/// Background task that periodically refreshes expired cache keys.
///
/// Runs until `true` is sent on `shutdown_rx` and returns the metrics
/// collected during its lifetime.
///
/// # Example
///
/// ```ignore
/// let (shutdown_tx, shutdown_rx) = watch::channel(false);
/// let handle = tokio::spawn(cache_refresh_task(cache.clone(), config.cache.clone(), shutdown_rx));
///
/// // On shutdown
/// let _ = shutdown_tx.send(true);
/// let metrics = handle.await?;
/// ```
pub async fn cache_refresh_task<V: CachedValue>(
    cache: ReadModelCache<V>,
    config: CacheConfig,
    mut shutdown_rx: watch::Receiver<bool>,
) -> Arc<RefreshMetrics> {
    let metrics = Arc::new(RefreshMetrics::new());

    let mut refresh_interval = interval(config.refresh_interval);
    refresh_interval.set_missed_tick_behavior(MissedTickBehavior::Skip);

    tracing::info!(
        refresh_interval_ms = config.refresh_interval.as_millis() as u64,
        tracked_keys = cache.tracked_len(),
        "Cache refresh task started"
    );

    loop {
        tokio::select! {
            _ = shutdown_rx.changed() => {
                if *shutdown_rx.borrow() {
                    tracing::info!("Cache refresh task shutting down");
                    break;
                }
            }

            _ = refresh_interval.tick() => {
                refresh_cycle(&cache, &metrics).await;
            }
        }
    }

    let snapshot = metrics.snapshot();
    tracing::info!(
        refresh_cycles = snapshot.refresh_cycles,
        refreshes_started = snapshot.refreshes_started,
        refreshes_succeeded = snapshot.refreshes_succeeded,
        refresh_errors = snapshot.refresh_errors,
        keys_dropped_idle = snapshot.keys_dropped_idle,
        "Cache refresh task completed"
    );

    metrics
}

/// Perform one refresh cycle.
async fn refresh_cycle<V: CachedValue>(cache: &ReadModelCache<V>, metrics: &RefreshMetrics) {
    metrics.refresh_cycles.fetch_add(1, Ordering::Relaxed);

    let summary = cache.refresh_expired().await;
    metrics
        .refreshes_started
        .fetch_add(summary.started, Ordering::Relaxed);
    metrics
        .refreshes_succeeded
        .fetch_add(summary.refreshed, Ordering::Relaxed);
    metrics
        .refresh_errors
        .fetch_add(summary.failed, Ordering::Relaxed);
    metrics
        .keys_dropped_idle
        .fetch_add(summary.idle_dropped, Ordering::Relaxed);

    if summary.failed > 0 {
        tracing::warn!(
            started = summary.started,
            failed = summary.failed,
            "Cache refresh cycle had upstream failures"
        );
    } else if summary.started > 0 {
        tracing::debug!(refreshed = summary.refreshed, "Cache refresh cycle completed");
    } else {
        tracing::trace!("Cache refresh cycle completed with no expired keys");
    }
}
