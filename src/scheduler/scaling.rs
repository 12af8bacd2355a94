//! Feedback-driven concurrency scaling.
//!
//! The scheduler polls a [`ResourceSampler`] on a fixed interval and moves
//! its concurrency limit one step at a time. High CPU or high load
//! *throttles* (lowers the limit); low CPU together with low load
//! *expands* it.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// One CPU observation, usage in percent (0-100).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CpuSample {
    pub usage: f64,
}

/// One memory observation, bytes in use.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySample {
    pub used: u64,
}

/// Samples collected over a window, oldest first.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceTrends {
    pub cpu: Vec<CpuSample>,
    pub memory: Vec<MemorySample>,
}

impl ResourceTrends {
    /// Most recent CPU usage; 0 when the window is empty.
    pub fn latest_cpu(&self) -> f64 {
        self.cpu.last().map_or(0.0, |s| s.usage)
    }
}

#[derive(Debug, Error)]
pub enum SamplerError {
    #[error("Resource monitor unavailable: {0}")]
    Unavailable(String),
}

/// Source of periodic resource samples.
#[async_trait]
pub trait ResourceSampler: Send + Sync {
    async fn resource_trends(&self, window: Duration) -> Result<ResourceTrends, SamplerError>;
}

/// Sampler that never reports anything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSampler;

#[async_trait]
impl ResourceSampler for NullSampler {
    async fn resource_trends(&self, _window: Duration) -> Result<ResourceTrends, SamplerError> {
        Ok(ResourceTrends::default())
    }
}

/// Outcome of one scaling evaluation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScaleDecision {
    /// Lower the limit: CPU or load is high.
    Throttle,
    /// Raise the limit: CPU and load are both low.
    Expand,
    Hold,
}

/// Thresholds and step size for scaling.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScalingPolicy {
    /// Load (running / limit) above which the limit is lowered.
    pub throttle_load: f64,
    /// Load below which the limit may be raised.
    pub expand_load: f64,
    /// CPU percent above which the limit is lowered.
    pub throttle_cpu: f64,
    /// CPU percent below which the limit may be raised.
    pub expand_cpu: f64,
    pub step: usize,
}

impl Default for ScalingPolicy {
    fn default() -> Self {
        Self {
            throttle_load: 0.8,
            expand_load: 0.3,
            throttle_cpu: 80.0,
            expand_cpu: 50.0,
            step: 1,
        }
    }
}

impl ScalingPolicy {
    pub fn decide(&self, cpu_usage: f64, load: f64) -> ScaleDecision {
        if cpu_usage > self.throttle_cpu || load > self.throttle_load {
            ScaleDecision::Throttle
        } else if cpu_usage < self.expand_cpu && load < self.expand_load {
            ScaleDecision::Expand
        } else {
            ScaleDecision::Hold
        }
    }

    /// New limit after `decision`, clamped to `[min, max]`.
    pub fn apply(&self, decision: ScaleDecision, limit: usize, min: usize, max: usize) -> usize {
        let next = match decision {
            ScaleDecision::Throttle => limit.saturating_sub(self.step),
            ScaleDecision::Expand => limit.saturating_add(self.step),
            ScaleDecision::Hold => limit,
        };
        next.clamp(min, max)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn high_cpu_or_load_throttles() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.decide(85.0, 0.1), ScaleDecision::Throttle);
        assert_eq!(policy.decide(10.0, 0.9), ScaleDecision::Throttle);
    }

    #[test]
    fn expand_needs_both_low_cpu_and_low_load() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.decide(20.0, 0.1), ScaleDecision::Expand);
        assert_eq!(policy.decide(60.0, 0.1), ScaleDecision::Hold);
        assert_eq!(policy.decide(20.0, 0.5), ScaleDecision::Hold);
    }

    #[test]
    fn thresholds_are_exclusive() {
        let policy = ScalingPolicy::default();
        assert_eq!(policy.decide(80.0, 0.8), ScaleDecision::Hold);
        assert_eq!(policy.decide(50.0, 0.2), ScaleDecision::Hold);
    }

    #[test]
    fn apply_clamps_to_bounds() {
        let policy = ScalingPolicy { step: 3, ..Default::default() };
        assert_eq!(policy.apply(ScaleDecision::Throttle, 2, 1, 10), 1);
        assert_eq!(policy.apply(ScaleDecision::Expand, 9, 1, 10), 10);
        assert_eq!(policy.apply(ScaleDecision::Hold, 5, 1, 10), 5);
    }

    #[test]
    fn limit_stays_in_bounds_for_any_sample_sequence() {
        let policy = ScalingPolicy::default();
        let (min, max) = (2, 6);
        let mut limit = 4;
        // Deterministic pseudo-random walk over cpu/load space.
        let mut seed: u64 = 0x2545_f491_4f6c_dd1d;
        for _ in 0..10_000 {
            seed ^= seed << 13;
            seed ^= seed >> 7;
            seed ^= seed << 17;
            let cpu = (seed % 101) as f64;
            let load = ((seed >> 8) % 150) as f64 / 100.0;
            limit = policy.apply(policy.decide(cpu, load), limit, min, max);
            assert!((min..=max).contains(&limit));
        }
    }
}
