//! Metrics sink consumed by the scheduler, cache, deadline and pipeline.
//!
//! Recording is fire-and-forget: a failing sink is logged and never fails
//! the operation that produced the observation.

use std::collections::BTreeMap;
use std::sync::Arc;

use thiserror::Error;

use super::store::MetricsStore;

/// Free-form key/value context attached to an observation.
pub type MetricContext = BTreeMap<String, String>;

#[derive(Debug, Error)]
pub enum MetricsError {
    #[error("Metrics sink unavailable: {0}")]
    Unavailable(String),
    #[error("Metric rejected: {0}")]
    Rejected(String),
}

/// Destination for operation timings.
pub trait MetricsSink: Send + Sync {
    fn record_metric(
        &self,
        category: &str,
        name: &str,
        duration_ms: f64,
        context: &MetricContext,
    ) -> Result<(), MetricsError>;
}

/// Record through `sink`, swallowing (and logging) sink failures.
pub fn record(
    sink: &dyn MetricsSink,
    category: &str,
    name: &str,
    duration_ms: f64,
    context: MetricContext,
) {
    if let Err(e) = sink.record_metric(category, name, duration_ms, &context) {
        tracing::warn!(category, name, error = %e, "failed to record metric");
    }
}

/// Build a context map from string pairs.
pub fn context<const N: usize>(pairs: [(&str, String); N]) -> MetricContext {
    pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect()
}

/// Sink that discards everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn record_metric(&self, _: &str, _: &str, _: f64, _: &MetricContext) -> Result<(), MetricsError> {
        Ok(())
    }
}

/// Forwards to the `metrics` facade and keeps a copy in a [`MetricsStore`].
#[derive(Clone, Default)]
pub struct FacadeMetrics {
    store: Arc<MetricsStore>,
}

impl FacadeMetrics {
    pub fn new(store: Arc<MetricsStore>) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &Arc<MetricsStore> {
        &self.store
    }
}

impl MetricsSink for FacadeMetrics {
    fn record_metric(
        &self,
        category: &str,
        name: &str,
        duration_ms: f64,
        context: &MetricContext,
    ) -> Result<(), MetricsError> {
        if !duration_ms.is_finite() || duration_ms < 0.0 {
            return Err(MetricsError::Rejected(format!("{category}.{name}: {duration_ms}")));
        }
        ::metrics::histogram!(
            "exec_core_operation_duration_ms",
            "category" => category.to_string(),
            "name" => name.to_string()
        )
        .record(duration_ms);

        let key = format!("{category}.{name}");
        self.store.record_histogram(&key, duration_ms);
        if context.get("outcome").map(String::as_str) == Some("error") {
            ::metrics::counter!(
                "exec_core_operation_errors_total",
                "category" => category.to_string(),
                "name" => name.to_string()
            )
            .increment(1);
            self.store.increment_counter(&format!("{key}.errors"), 1);
        }
        Ok(())
    }
}

/// Queue depth gauge.
pub fn record_queue_depth(queue: &str, depth: usize) {
    ::metrics::gauge!("exec_core_queue_depth", "queue" => queue.to_string()).set(depth as f64);
}

/// Running task gauge.
pub fn record_running_tasks(queue: &str, running: usize) {
    ::metrics::gauge!("exec_core_running_tasks", "queue" => queue.to_string()).set(running as f64);
}

/// Current concurrency limit gauge.
pub fn record_concurrency_limit(queue: &str, limit: usize) {
    ::metrics::gauge!("exec_core_concurrency_limit", "queue" => queue.to_string()).set(limit as f64);
}

/// Cache entry gauge and eviction counter.
pub fn record_cache_cleanup(entries: usize, evicted: u64) {
    ::metrics::gauge!("exec_core_cache_entries").set(entries as f64);
    if evicted > 0 {
        ::metrics::counter!("exec_core_cache_evictions_total").increment(evicted);
    }
}
