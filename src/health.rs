//! Health reporting for the execution core.
//!
//! Derives an overall state from the shutdown state, scheduler backlog and
//! cache pressure.

use std::time::Instant;

use serde::{Deserialize, Serialize};

use crate::cache::{CacheConfig, CacheStats};
use crate::scheduler::SchedulerStatus;
use crate::shutdown::ShutdownState;

/// Overall health status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthState {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Detailed health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthReport {
    pub state: HealthState,
    pub ready: bool,
    pub accepting_tasks: bool,
    pub queue_depth: usize,
    pub running_tasks: usize,
    pub concurrency_limit: usize,
    pub cache_entries: usize,
    pub cache_size_bytes: usize,
    /// Fraction of the cache size bound in use.
    pub cache_memory_usage: f64,
    pub cache_hit_rate: f64,
    pub uptime_secs: u64,
}

/// Health check configuration.
#[derive(Debug, Clone)]
pub struct HealthConfig {
    /// Backlog at which the core reports itself degraded and not ready.
    pub max_queue_depth: usize,
    /// Fraction of either cache bound at which the cache counts as
    /// under pressure.
    pub cache_pressure: f64,
}

impl Default for HealthConfig {
    fn default() -> Self {
        Self {
            max_queue_depth: 1000,
            cache_pressure: 0.9,
        }
    }
}

/// Aggregates health information from the core's components.
pub struct HealthChecker {
    config: HealthConfig,
    start_time: Instant,
}

impl HealthChecker {
    pub fn new(config: HealthConfig) -> Self {
        Self {
            config,
            start_time: Instant::now(),
        }
    }

    /// Ready: accepting tasks with a backlog under the limit.
    pub fn is_ready(&self, shutdown_state: ShutdownState, scheduler: &SchedulerStatus) -> bool {
        shutdown_state == ShutdownState::Running && scheduler.queue_length < self.config.max_queue_depth
    }

    /// Generate full health report.
    pub fn report(
        &self,
        shutdown_state: ShutdownState,
        scheduler: &SchedulerStatus,
        cache: &CacheStats,
        cache_config: &CacheConfig,
    ) -> HealthReport {
        let state = if shutdown_state != ShutdownState::Running {
            HealthState::Unhealthy
        } else if scheduler.queue_length >= self.config.max_queue_depth
            || self.cache_under_pressure(cache, cache_config)
        {
            HealthState::Degraded
        } else {
            HealthState::Healthy
        };

        HealthReport {
            state,
            ready: self.is_ready(shutdown_state, scheduler),
            accepting_tasks: shutdown_state == ShutdownState::Running,
            queue_depth: scheduler.queue_length,
            running_tasks: scheduler.running_tasks,
            concurrency_limit: scheduler.max_concurrent,
            cache_entries: cache.total_entries,
            cache_size_bytes: cache.total_size,
            cache_memory_usage: cache.memory_usage,
            cache_hit_rate: cache.hit_rate,
            uptime_secs: self.start_time.elapsed().as_secs(),
        }
    }

    fn cache_under_pressure(&self, cache: &CacheStats, config: &CacheConfig) -> bool {
        let threshold = self.config.cache_pressure;
        let entries = cache.total_entries as f64 / config.max_entries.max(1) as f64;
        cache.memory_usage >= threshold || entries >= threshold
    }
}

impl Default for HealthChecker {
    fn default() -> Self {
        Self::new(HealthConfig::default())
    }
}
