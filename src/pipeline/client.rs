//! The request pipeline: cache, interceptors, batching, bounded queue.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::RwLock;
use serde::de::DeserializeOwned;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::batch::Batcher;
use super::error::RequestError;
use super::interceptor::Interceptor;
use super::request::{Request, RequestConfig, Response};
use super::transport::Transport;
use crate::cache::{CacheConfig, CacheStore, SetOptions};
use crate::deadline;
use crate::scheduler::{NullSampler, Scheduler, SchedulerConfig, SchedulerStatus, TaskOptions};
use crate::telemetry::{self, MetricsSink, NoopMetrics, RequestSpan, SpanExt};

/// Default bound on requests in flight.
pub const DEFAULT_MAX_CONCURRENT_REQUESTS: usize = 6;

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub max_concurrent_requests: usize,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            max_concurrent_requests: DEFAULT_MAX_CONCURRENT_REQUESTS,
            cache: CacheConfig::default(),
        }
    }
}

/// Issues requests through a transport with caching, interceptors,
/// deferred batching and a bounded, prioritized queue.
///
/// Concurrent identical requests are not coalesced: each one that misses
/// the cache reaches the transport.
pub struct RequestPipeline {
    transport: Arc<dyn Transport>,
    cache: Arc<CacheStore<serde_json::Value>>,
    queue: Scheduler,
    interceptors: RwLock<Vec<Arc<dyn Interceptor>>>,
    active: DashMap<String, CancellationToken>,
    batcher: Batcher,
    metrics: Arc<dyn MetricsSink>,
}

impl RequestPipeline {
    pub fn new(transport: Arc<dyn Transport>, config: PipelineConfig) -> Self {
        Self::with_metrics(transport, config, Arc::new(NoopMetrics))
    }

    pub fn with_metrics(
        transport: Arc<dyn Transport>,
        config: PipelineConfig,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let cache = Arc::new(CacheStore::with_metrics(config.cache, Arc::clone(&metrics)));
        Self::with_cache(transport, cache, config.max_concurrent_requests, metrics)
    }

    /// Build around an existing response cache.
    pub fn with_cache(
        transport: Arc<dyn Transport>,
        cache: Arc<CacheStore<serde_json::Value>>,
        max_concurrent_requests: usize,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        let queue = Scheduler::with_collaborators(
            SchedulerConfig::fixed("requests", max_concurrent_requests),
            Arc::new(NullSampler),
            Arc::clone(&metrics),
        );
        Self {
            transport,
            cache,
            queue,
            interceptors: RwLock::new(Vec::new()),
            active: DashMap::new(),
            batcher: Batcher::default(),
            metrics,
        }
    }

    pub fn add_interceptor(&self, interceptor: Arc<dyn Interceptor>) {
        self.interceptors.write().push(interceptor);
    }

    pub fn cache(&self) -> &Arc<CacheStore<serde_json::Value>> {
        &self.cache
    }

    pub fn queue_status(&self) -> SchedulerStatus {
        self.queue.status()
    }

    /// Ids of requests that missed the cache, including those waiting in
    /// a batch bucket. Request ids are expected to be unique among
    /// in-flight requests.
    pub fn active_requests(&self) -> Vec<String> {
        self.active.iter().map(|e| e.key().clone()).collect()
    }

    /// Requests waiting in a batch bucket.
    pub fn pending_batched(&self) -> usize {
        self.batcher.pending()
    }

    /// Cancel one request. A batched or queued request never reaches the
    /// transport; an in-flight one is dropped at its next await point.
    pub fn cancel_request(&self, request_id: &str) -> bool {
        match self.active.remove(request_id) {
            Some((_, token)) => {
                token.cancel();
                info!(request_id, "request cancelled");
                true
            }
            None => false,
        }
    }

    /// Cancel every active request and drop pending batch buckets.
    /// Returns how many requests were cancelled.
    pub fn cancel_all_requests(&self) -> usize {
        let ids = self.active_requests();
        let mut cancelled = 0;
        for id in ids {
            if let Some((_, token)) = self.active.remove(&id) {
                token.cancel();
                cancelled += 1;
            }
        }
        let batched = self.batcher.cancel_all();
        info!(cancelled, batched, "all requests cancelled");
        cancelled
    }

    /// Stop the request queue, cancelling anything still waiting for a slot.
    pub async fn shutdown(&self, timeout: Duration) -> crate::shutdown::ShutdownResult {
        self.cancel_all_requests();
        self.queue.shutdown(timeout).await
    }

    /// Issue a request and decode the JSON body into `T`.
    pub async fn request<T: DeserializeOwned>(&self, url: &str, config: RequestConfig) -> Result<T, RequestError> {
        let value = self.request_value(url, config).await?;
        serde_json::from_value(value).map_err(|e| RequestError::Parse(e.to_string()))
    }

    /// Issue a request and return the parsed JSON body.
    pub async fn request_value(
        &self,
        url: &str,
        config: RequestConfig,
    ) -> Result<serde_json::Value, RequestError> {
        let cache_key = config.cache_key.clone().unwrap_or_else(|| url.to_string());
        if config.use_cache {
            if let Some(value) = self.cache.get(&cache_key) {
                debug!(url, cache_key = %cache_key, "served from cache");
                return Ok(value);
            }
        }

        let request_id = config
            .request_id
            .clone()
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        let token = CancellationToken::new();
        self.active.insert(request_id.clone(), token.clone());
        let _active = ActiveEntry {
            active: &self.active,
            id: &request_id,
        };

        if config.batch {
            let batch_key = config.batch_key.as_deref().unwrap_or(url);
            self.batcher.join(batch_key, config.batch_delay, &token).await?;
        }

        let span = RequestSpan::new(&request_id, url);
        let started = Instant::now();
        let result = self
            .execute(url, config, &cache_key, &token)
            .instrument(span.clone())
            .await;

        let latency_ms = started.elapsed().as_millis() as u64;
        span.record_result(&result);
        span.record_latency(latency_ms);
        telemetry::record(
            self.metrics.as_ref(),
            "pipeline",
            "request",
            latency_ms as f64,
            telemetry::context([
                ("url", url.to_string()),
                ("outcome", if result.is_ok() { "ok" } else { "error" }.to_string()),
            ]),
        );
        result
    }

    /// Attempts plus recovery and retry.
    async fn execute(
        &self,
        url: &str,
        config: RequestConfig,
        cache_key: &str,
        token: &CancellationToken,
    ) -> Result<serde_json::Value, RequestError> {
        let mut retries_left = config.retries;
        let mut attempt = 0u32;

        loop {
            attempt += 1;
            tracing::Span::current().record("attempt", attempt);

            let error = match self.attempt(url, config.clone(), token).await {
                Ok(response) => return self.finish(&response, &config, cache_key),
                Err(RequestError::Cancelled) => return Err(RequestError::Cancelled),
                Err(e) => e,
            };

            if let Some(response) = self.recover(&error, &config).await {
                debug!(url, %error, "error recovered by interceptor");
                return self.finish(&response, &config, cache_key);
            }

            if retries_left == 0 {
                return Err(error);
            }
            retries_left -= 1;

            let delay = deadline::calculate_retry_delay(config.retry_delay, attempt);
            warn!(url, attempt, delay_ms = delay.as_millis() as u64, %error, "request failed, retrying");
            tokio::select! {
                biased;
                () = token.cancelled() => return Err(RequestError::Cancelled),
                () = tokio::time::sleep(delay) => {}
            }
        }
    }

    /// One pass through request interceptors, the queue, the transport
    /// and response interceptors.
    async fn attempt(
        &self,
        url: &str,
        config: RequestConfig,
        token: &CancellationToken,
    ) -> Result<Response, RequestError> {
        let interceptors = self.interceptors.read().clone();

        let mut config = config;
        for interceptor in &interceptors {
            config = interceptor.on_request(config).await?;
        }

        let request = Request::from_config(url, &config);
        let transport = Arc::clone(&self.transport);
        let on_download = config.on_download_progress.clone();
        let send_token = token.clone();
        let mut options = TaskOptions::priority(config.priority);
        options.timeout = config.timeout;

        let handle = self.queue.add_task(
            move || {
                let transport = Arc::clone(&transport);
                let request = request.clone();
                let token = send_token.clone();
                let on_download = on_download.clone();
                async move {
                    let raw = transport.send(request, token).await?;
                    raw.read(on_download.as_ref()).await
                }
            },
            options,
        );
        let task_id = handle.id();

        let response = tokio::select! {
            biased;
            () = token.cancelled() => {
                self.queue.cancel_task(task_id);
                return Err(RequestError::Cancelled);
            }
            result = handle => result?,
        };

        let mut response = response;
        for interceptor in &interceptors {
            response = interceptor.on_response(response).await?;
        }

        if !response.status.is_success() {
            return Err(RequestError::Http {
                status: response.status.as_u16(),
            });
        }
        Ok(response)
    }

    async fn recover(&self, error: &RequestError, config: &RequestConfig) -> Option<Response> {
        let interceptors = self.interceptors.read().clone();
        for interceptor in &interceptors {
            if let Some(response) = interceptor.on_error(error, config).await {
                return Some(response);
            }
        }
        None
    }

    fn finish(
        &self,
        response: &Response,
        config: &RequestConfig,
        cache_key: &str,
    ) -> Result<serde_json::Value, RequestError> {
        let value = response.parse_json()?;
        if config.use_cache {
            self.cache.set(
                cache_key,
                value.clone(),
                SetOptions {
                    ttl: config.cache_ttl,
                    metadata: None,
                },
            );
        }
        Ok(value)
    }
}

/// Removes the request from the active map once it settles.
struct ActiveEntry<'a> {
    active: &'a DashMap<String, CancellationToken>,
    id: &'a str,
}

impl Drop for ActiveEntry<'_> {
    fn drop(&mut self) {
        self.active.remove(self.id);
    }
}

#[cfg(test)]
#[path = "client_tests.rs"]
mod tests;
