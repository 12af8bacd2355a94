//! Span utilities for pipeline requests and scheduled tasks.

use tracing::{info_span, Span};

/// Extension trait for recording outcomes into a span.
pub trait SpanExt {
    /// Record the result of an operation into the span.
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display;

    /// Record elapsed milliseconds.
    fn record_latency(&self, latency_ms: u64);
}

impl SpanExt for Span {
    fn record_result<T, E>(&self, result: &Result<T, E>)
    where
        E: std::fmt::Display,
    {
        match result {
            Ok(_) => {
                self.record("status", "ok");
            }
            Err(e) => {
                self.record("status", "error");
                self.record("error.message", e.to_string().as_str());
            }
        }
    }

    fn record_latency(&self, latency_ms: u64) {
        self.record("latency_ms", latency_ms);
    }
}

/// Factory for pipeline request spans.
pub struct RequestSpan;

impl RequestSpan {
    /// Fields `status`, `error.message` and `latency_ms` are filled in
    /// through [`SpanExt`] once the request settles.
    pub fn new(request_id: &str, url: &str) -> Span {
        info_span!(
            "pipeline_request",
            request_id = %request_id,
            url = %url,
            attempt = tracing::field::Empty,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}

/// Factory for scheduler task spans.
pub struct TaskSpan;

impl TaskSpan {
    pub fn new(queue: &str, task_id: u64, priority: &str) -> Span {
        info_span!(
            "scheduled_task",
            queue = %queue,
            task_id,
            priority = %priority,
            status = tracing::field::Empty,
            error.message = tracing::field::Empty,
            latency_ms = tracing::field::Empty,
        )
    }
}
