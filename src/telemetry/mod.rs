//! Telemetry for the execution core.
//!
//! Structured logging through `tracing`, operation timings through the
//! [`MetricsSink`] collaborator, and an in-process [`MetricsStore`].

mod logging;
mod metrics;
mod spans;
mod store;

pub use logging::{init_logging, LogConfig, LogError, LogFormat};
pub use metrics::{
    context, record, record_cache_cleanup, record_concurrency_limit, record_queue_depth,
    record_running_tasks, FacadeMetrics, MetricContext, MetricsError, MetricsSink, NoopMetrics,
};
pub use spans::{RequestSpan, SpanExt, TaskSpan};
pub use store::{HistogramSummary, MetricsSnapshot, MetricsStore};
