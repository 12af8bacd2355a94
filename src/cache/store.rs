//! Bounded key/value cache with TTL expiry and LRU eviction.
//!
//! All state sits behind one mutex so a cleanup pass and the insert that
//! triggered it are a single critical section.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use super::item::{estimate_size, CacheItem, CacheItemInfo, SetOptions};
use super::stats::{CacheStats, Counters};
use crate::telemetry::{self, MetricsSink, NoopMetrics};

/// Configuration for the cache store.
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Upper bound on the summed size estimate of all items (bytes).
    pub max_size: usize,
    pub max_entries: usize,
    /// TTL applied when `set` is called without one.
    pub default_ttl: Option<Duration>,
    pub cleanup_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_size: 50 * 1024 * 1024, // 50 MiB
            max_entries: 1000,
            default_ttl: None,
            cleanup_interval: Duration::from_secs(60),
        }
    }
}

/// Result of one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    pub expired: usize,
    pub evicted: usize,
}

struct CacheState<V> {
    items: HashMap<String, CacheItem<V>>,
    total_size: usize,
    next_access_seq: u64,
    counters: Counters,
}

impl<V> CacheState<V> {
    fn new() -> Self {
        Self {
            items: HashMap::new(),
            total_size: 0,
            next_access_seq: 0,
            counters: Counters::default(),
        }
    }

    fn next_seq(&mut self) -> u64 {
        let seq = self.next_access_seq;
        self.next_access_seq += 1;
        seq
    }

    fn remove(&mut self, key: &str) -> Option<CacheItem<V>> {
        let item = self.items.remove(key)?;
        self.total_size -= item.size;
        Some(item)
    }

    /// Drop expired items, then evict least-recently-accessed items until
    /// `total_size <= max_size` and `len <= max_entries`.
    fn cleanup(&mut self, now: Instant, max_size: usize, max_entries: usize) -> CleanupReport {
        let before = self.items.len();
        let mut freed = 0usize;
        self.items.retain(|_, item| {
            let keep = !item.is_expired(now);
            if !keep {
                freed += item.size;
            }
            keep
        });
        self.total_size -= freed;
        let expired = before - self.items.len();
        self.counters.expirations += expired as u64;

        let mut evicted = 0;
        if self.total_size > max_size || self.items.len() > max_entries {
            let mut order: Vec<(Instant, u64, String)> = self
                .items
                .iter()
                .map(|(k, item)| (item.last_accessed, item.access_seq, k.clone()))
                .collect();
            order.sort_unstable();

            for (_, _, key) in order {
                if self.total_size <= max_size && self.items.len() <= max_entries {
                    break;
                }
                if self.remove(&key).is_some() {
                    evicted += 1;
                }
            }
            self.counters.evictions += evicted as u64;
        }

        CleanupReport { expired, evicted }
    }
}

/// Bounded cache keyed by string.
pub struct CacheStore<V> {
    state: Mutex<CacheState<V>>,
    config: CacheConfig,
    metrics: Arc<dyn MetricsSink>,
}

impl<V> CacheStore<V>
where
    V: Clone + Serialize,
{
    pub fn new(config: CacheConfig) -> Self {
        Self::with_metrics(config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(config: CacheConfig, metrics: Arc<dyn MetricsSink>) -> Self {
        Self {
            state: Mutex::new(CacheState::new()),
            config,
            metrics,
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Insert or replace `key`. Runs a cleanup first when the insert
    /// would break the size or entry bound.
    pub fn set(&self, key: impl Into<String>, value: V, options: SetOptions) {
        let started = std::time::Instant::now();
        let key = key.into();
        let size = estimate_size(&value);
        let now = Instant::now();
        let ttl = options.ttl.or(self.config.default_ttl);

        let report = {
            let mut state = self.state.lock();
            state.remove(&key);

            let report = if state.total_size + size > self.config.max_size
                || state.items.len() + 1 > self.config.max_entries
            {
                state.cleanup(
                    now,
                    self.config.max_size.saturating_sub(size),
                    self.config.max_entries.saturating_sub(1),
                )
            } else {
                CleanupReport::default()
            };

            let access_seq = state.next_seq();
            state.total_size += size;
            state.items.insert(
                key.clone(),
                CacheItem {
                    value,
                    created_at: now,
                    expires_at: ttl.map(|ttl| now + ttl),
                    hits: 0,
                    last_accessed: now,
                    access_seq,
                    size,
                    metadata: options.metadata,
                },
            );
            report
        };

        if report.evicted > 0 {
            debug!(%key, evicted = report.evicted, expired = report.expired, "evicted to make room");
        }
        telemetry::record(
            self.metrics.as_ref(),
            "cache",
            "set",
            started.elapsed().as_secs_f64() * 1000.0,
            telemetry::context([("key", key), ("size", size.to_string())]),
        );
    }

    /// Look up `key`. Expired entries are removed and reported as a miss.
    pub fn get(&self, key: &str) -> Option<V> {
        let started = std::time::Instant::now();
        let now = Instant::now();
        let mut guard = self.state.lock();
        let state = &mut *guard;

        let expired = state.items.get(key).is_some_and(|item| item.is_expired(now));
        if expired {
            state.remove(key);
            state.counters.expirations += 1;
        }

        let seq = state.next_access_seq;
        let value = match state.items.get_mut(key) {
            Some(item) => {
                item.hits += 1;
                item.last_accessed = now;
                item.access_seq = seq;
                Some(item.value.clone())
            }
            None => None,
        };

        if value.is_some() {
            state.next_access_seq += 1;
            state.counters.hits += 1;
        } else {
            state.counters.misses += 1;
        }
        state.counters.record_access(started.elapsed());
        value
    }

    /// True when `key` is present and unexpired. Does not count as an access.
    pub fn contains_key(&self, key: &str) -> bool {
        let now = Instant::now();
        self.state
            .lock()
            .items
            .get(key)
            .is_some_and(|item| !item.is_expired(now))
    }

    /// Bookkeeping for `key` without touching access statistics.
    pub fn inspect(&self, key: &str) -> Option<CacheItemInfo> {
        self.state.lock().items.get(key).map(|item| item.info(key))
    }

    pub fn delete(&self, key: &str) -> bool {
        self.state.lock().remove(key).is_some()
    }

    /// Remove every entry and reset all counters.
    pub fn clear(&self) {
        *self.state.lock() = CacheState::new();
    }

    /// Run a full cleanup pass against the configured bounds.
    pub fn cleanup(&self) -> CleanupReport {
        let started = std::time::Instant::now();
        let (report, entries) = {
            let mut state = self.state.lock();
            let report = state.cleanup(Instant::now(), self.config.max_size, self.config.max_entries);
            (report, state.items.len())
        };
        telemetry::record_cache_cleanup(entries, report.evicted as u64);
        telemetry::record(
            self.metrics.as_ref(),
            "cache",
            "cleanup",
            started.elapsed().as_secs_f64() * 1000.0,
            telemetry::context([
                ("expired", report.expired.to_string()),
                ("evicted", report.evicted.to_string()),
            ]),
        );
        report
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.state.lock();
        let (hit_rate, miss_rate) = state.counters.rates();
        CacheStats {
            total_entries: state.items.len(),
            total_size: state.total_size,
            hit_rate,
            miss_rate,
            eviction_count: state.counters.evictions,
            expired_count: state.counters.expirations,
            avg_access_time: state.counters.avg_access_time(),
            memory_usage: if self.config.max_size == 0 {
                0.0
            } else {
                state.total_size as f64 / self.config.max_size as f64
            },
        }
    }

    pub fn len(&self) -> usize {
        self.state.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.state.lock().items.is_empty()
    }
}

impl<V> CacheStore<V>
where
    V: Clone + Serialize + Send + 'static,
{
    /// Run [`cleanup`](Self::cleanup) every `cleanup_interval` until
    /// `shutdown` fires.
    pub fn spawn_cleanup_loop(self: &Arc<Self>, shutdown: CancellationToken) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(cache.config.cleanup_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        info!("cache cleanup loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        let report = cache.cleanup();
                        if report.expired + report.evicted > 0 {
                            debug!(expired = report.expired, evicted = report.evicted, "cache cleanup");
                        }
                    }
                }
            }
        })
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod tests;
