//! Adaptive execution core.
//!
//! Runs application work under bounded, resource-aware concurrency:
//!
//! - [`scheduler`]: priority task queue whose concurrency limit follows
//!   CPU and load samples from an injected [`ResourceSampler`].
//! - [`deadline`]: timeout, retry with backoff and fallback for any async
//!   operation.
//! - [`cache`]: bounded TTL + LRU cache.
//! - [`pipeline`]: request pipeline combining the three with interceptors,
//!   deferred batching and cancellation.
//!
//! Components are built once through [`ExecCore::new`] and shared by
//! reference; there is no global state.

pub mod cache;
pub mod cli;
pub mod config;
pub mod deadline;
pub mod health;
pub mod pipeline;
pub mod scheduler;
pub mod shutdown;
pub mod telemetry;

use std::sync::Arc;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use cache::CacheStore;
use health::{HealthChecker, HealthConfig, HealthReport};
use pipeline::{RequestPipeline, Transport};
use scheduler::{NullSampler, ResourceSampler, Scheduler};
use shutdown::ShutdownResult;
use telemetry::{MetricsSink, NoopMetrics};

pub use config::CoreConfig;

/// External services the core depends on.
#[derive(Clone)]
pub struct Collaborators {
    pub transport: Arc<dyn Transport>,
    pub sampler: Arc<dyn ResourceSampler>,
    pub metrics: Arc<dyn MetricsSink>,
}

impl Collaborators {
    /// No resource samples and no metrics.
    pub fn new(transport: Arc<dyn Transport>) -> Self {
        Self {
            transport,
            sampler: Arc::new(NullSampler),
            metrics: Arc::new(NoopMetrics),
        }
    }

    pub fn with_sampler(mut self, sampler: Arc<dyn ResourceSampler>) -> Self {
        self.sampler = sampler;
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<dyn MetricsSink>) -> Self {
        self.metrics = metrics;
        self
    }
}

/// The execution core instance.
pub struct ExecCore {
    config: CoreConfig,
    scheduler: Scheduler,
    cache: Arc<CacheStore<serde_json::Value>>,
    pipeline: Arc<RequestPipeline>,
    health: HealthChecker,
    background: CancellationToken,
    loops: Mutex<Vec<JoinHandle<()>>>,
}

impl ExecCore {
    /// Create a new core with the given configuration.
    ///
    /// Nothing runs until [`start`](Self::start) is called.
    pub fn new(config: CoreConfig, collaborators: Collaborators) -> Self {
        let Collaborators {
            transport,
            sampler,
            metrics,
        } = collaborators;

        let scheduler =
            Scheduler::with_collaborators(config.scheduler.clone(), sampler, Arc::clone(&metrics));
        let cache = Arc::new(CacheStore::with_metrics(config.cache.clone(), Arc::clone(&metrics)));
        let pipeline = Arc::new(RequestPipeline::with_cache(
            transport,
            Arc::clone(&cache),
            config.max_concurrent_requests,
            metrics,
        ));

        Self {
            config,
            scheduler,
            cache,
            pipeline,
            health: HealthChecker::new(HealthConfig::default()),
            background: CancellationToken::new(),
            loops: Mutex::new(Vec::new()),
        }
    }

    /// Spawn the scaling and cache cleanup loops. Calling it again is a
    /// no-op. Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut loops = self.loops.lock();
        if !loops.is_empty() || self.background.is_cancelled() {
            return;
        }
        loops.push(self.scheduler.spawn_scaling_loop(self.background.clone()));
        loops.push(self.cache.spawn_cleanup_loop(self.background.clone()));
        info!(
            min_concurrent = self.config.scheduler.min_concurrent,
            max_concurrent = self.config.scheduler.max_concurrent,
            max_concurrent_requests = self.config.max_concurrent_requests,
            "execution core started"
        );
    }

    pub fn config(&self) -> &CoreConfig {
        &self.config
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn cache(&self) -> &Arc<CacheStore<serde_json::Value>> {
        &self.cache
    }

    pub fn pipeline(&self) -> &Arc<RequestPipeline> {
        &self.pipeline
    }

    pub fn health(&self) -> HealthReport {
        self.health.report(
            self.scheduler.shutdown_state(),
            &self.scheduler.status(),
            &self.cache.stats(),
            &self.config.cache,
        )
    }

    /// Stop background loops, cancel queued work and wait for running
    /// tasks and requests up to the configured shutdown timeout.
    pub async fn shutdown(&self) -> ShutdownResult {
        info!("execution core shutting down");
        self.background.cancel();

        let timeout = self.config.shutdown_timeout;
        let (requests, tasks) = tokio::join!(self.pipeline.shutdown(timeout), self.scheduler.shutdown(timeout));

        let loops: Vec<_> = self.loops.lock().drain(..).collect();
        for handle in loops {
            if let Err(e) = handle.await {
                warn!(error = %e, "background loop ended abnormally");
            }
        }

        match (requests, tasks) {
            (ShutdownResult::Complete, ShutdownResult::Complete) => {
                info!("execution core stopped");
                ShutdownResult::Complete
            }
            (a, b) => {
                let remaining: u32 = [a, b]
                    .iter()
                    .map(|r| match r {
                        ShutdownResult::Timeout { remaining } => *remaining,
                        ShutdownResult::Complete => 0,
                    })
                    .sum();
                warn!(remaining, "shutdown timed out with work in flight");
                ShutdownResult::Timeout { remaining }
            }
        }
    }
}
