//! Cache hit/miss accounting.

use std::collections::VecDeque;
use std::time::Duration;

use serde::Serialize;

/// Number of `get` durations kept for the running average.
const ACCESS_SAMPLE_WINDOW: usize = 100;

/// Point-in-time cache statistics.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CacheStats {
    pub total_entries: usize,
    pub total_size: usize,
    pub hit_rate: f64,
    pub miss_rate: f64,
    pub eviction_count: u64,
    pub expired_count: u64,
    pub avg_access_time: Duration,
    /// `total_size / max_size`.
    pub memory_usage: f64,
}

#[derive(Debug, Default)]
pub(crate) struct Counters {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub expirations: u64,
    access_times: VecDeque<Duration>,
}

impl Counters {
    pub fn record_access(&mut self, elapsed: Duration) {
        if self.access_times.len() == ACCESS_SAMPLE_WINDOW {
            self.access_times.pop_front();
        }
        self.access_times.push_back(elapsed);
    }

    pub fn avg_access_time(&self) -> Duration {
        if self.access_times.is_empty() {
            return Duration::ZERO;
        }
        let total: Duration = self.access_times.iter().sum();
        total / self.access_times.len() as u32
    }

    /// `(hit_rate, miss_rate)`, both 0 before any lookup.
    pub fn rates(&self) -> (f64, f64) {
        let lookups = self.hits + self.misses;
        if lookups == 0 {
            return (0.0, 0.0);
        }
        let lookups = lookups as f64;
        (self.hits as f64 / lookups, self.misses as f64 / lookups)
    }
}
