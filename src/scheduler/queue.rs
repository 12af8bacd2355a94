//! Priority task scheduler with an adaptive concurrency limit.

use std::collections::HashMap;
use std::fmt::Display;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::{BoxFuture, FutureExt};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn, Instrument};

use super::priority::{Priority, PriorityQueue};
use super::scaling::{NullSampler, ResourceSampler, ScaleDecision, ScalingPolicy};
use super::task::{TaskError, TaskHandle, TaskId, TaskOptions, TaskResult, TaskStatus};
use crate::deadline;
use crate::shutdown::{ShutdownCoordinator, ShutdownGuard, ShutdownResult, ShutdownState};
use crate::telemetry::{self, MetricsSink, NoopMetrics, TaskSpan};

/// Configuration for a scheduler instance.
#[derive(Debug, Clone)]
pub struct SchedulerConfig {
    /// Label used in logs and metrics.
    pub name: String,
    pub min_concurrent: usize,
    pub max_concurrent: usize,
    /// Starting limit; clamped into `[min_concurrent, max_concurrent]`.
    pub initial_concurrent: usize,
    pub scale_interval: Duration,
    /// Window passed to the resource sampler on each scaling tick.
    pub sample_window: Duration,
    pub policy: ScalingPolicy,
    /// Retry `n` of a failed task waits `retry_base * 2^n`.
    pub retry_base: Duration,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        let max_concurrent = (num_cpus::get() * 2).max(2);
        Self {
            name: "tasks".to_string(),
            min_concurrent: 1,
            max_concurrent,
            initial_concurrent: max_concurrent,
            scale_interval: Duration::from_secs(5),
            sample_window: Duration::from_secs(60),
            policy: ScalingPolicy::default(),
            retry_base: Duration::from_secs(1),
        }
    }
}

impl SchedulerConfig {
    /// A queue pinned at `limit` concurrent tasks.
    pub fn fixed(name: impl Into<String>, limit: usize) -> Self {
        let limit = limit.max(1);
        Self {
            name: name.into(),
            min_concurrent: limit,
            max_concurrent: limit,
            initial_concurrent: limit,
            ..Default::default()
        }
    }
}

/// Snapshot of the scheduler's load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SchedulerStatus {
    pub queue_length: usize,
    pub running_tasks: usize,
    /// Current concurrency limit.
    pub max_concurrent: usize,
}

/// Type-erased task body; resolves to the status it ended in.
type Job = Box<dyn FnOnce(CancellationToken) -> BoxFuture<'static, TaskStatus> + Send>;

struct QueuedTask {
    id: TaskId,
    priority: Priority,
    enqueued_at: Instant,
    cancel: CancellationToken,
    job: Job,
}

struct RunningTask {
    status: TaskStatus,
    cancel: CancellationToken,
}

struct SchedulerState {
    queue: PriorityQueue<QueuedTask>,
    running: HashMap<TaskId, RunningTask>,
    limit: usize,
}

struct SchedulerInner {
    config: SchedulerConfig,
    state: Mutex<SchedulerState>,
    next_id: AtomicU64,
    admission_pending: AtomicBool,
    sampler: Arc<dyn ResourceSampler>,
    metrics: Arc<dyn MetricsSink>,
    shutdown: ShutdownCoordinator,
}

/// Priority task queue whose admission is bounded by a concurrency limit.
///
/// Cloning is cheap; clones share the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

impl Scheduler {
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_collaborators(config, Arc::new(NullSampler), Arc::new(NoopMetrics))
    }

    pub fn with_collaborators(
        mut config: SchedulerConfig,
        sampler: Arc<dyn ResourceSampler>,
        metrics: Arc<dyn MetricsSink>,
    ) -> Self {
        config.min_concurrent = config.min_concurrent.max(1);
        config.max_concurrent = config.max_concurrent.max(config.min_concurrent);
        let limit = config
            .initial_concurrent
            .clamp(config.min_concurrent, config.max_concurrent);

        Self {
            inner: Arc::new(SchedulerInner {
                config,
                state: Mutex::new(SchedulerState {
                    queue: PriorityQueue::new(),
                    running: HashMap::new(),
                    limit,
                }),
                next_id: AtomicU64::new(1),
                admission_pending: AtomicBool::new(false),
                sampler,
                metrics,
                shutdown: ShutdownCoordinator::new(),
            }),
        }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.inner.config
    }

    /// Queue `execute` and return a handle resolving with its outcome.
    ///
    /// `execute` is invoked once per attempt. Admission runs on the next
    /// scheduler tick, so tasks enqueued together are started in priority
    /// order. Must be called from within a tokio runtime.
    pub fn add_task<T, E, F, Fut>(&self, execute: F, options: TaskOptions) -> TaskHandle<T, E>
    where
        F: FnMut() -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Display + Send + 'static,
    {
        let id = TaskId(self.inner.next_id.fetch_add(1, Ordering::Relaxed));
        let cancel = CancellationToken::new();
        let (tx, rx) = oneshot::channel();
        let handle = TaskHandle::new(id, rx, cancel.clone());

        if !self.inner.shutdown.is_accepting() {
            let _ = tx.send(Err(TaskError::ShuttingDown));
            return handle;
        }

        let retry_base = self.inner.config.retry_base;
        let job: Job = Box::new(move |token: CancellationToken| {
            run_attempts(id, execute, options, retry_base, token, tx).boxed()
        });

        let queue_length = {
            let mut state = self.inner.state.lock();
            state.queue.push(
                QueuedTask {
                    id,
                    priority: options.priority,
                    enqueued_at: Instant::now(),
                    cancel,
                    job,
                },
                options.priority,
            );
            state.queue.len()
        };
        debug!(queue = %self.inner.config.name, %id, priority = %options.priority, queue_length, "task queued");
        telemetry::record_queue_depth(&self.inner.config.name, queue_length);

        self.inner.schedule_admission();
        handle
    }

    /// Cancel a queued or running task. Returns false for unknown ids.
    ///
    /// A queued task is removed outright. A running task has its attempt
    /// dropped at the next await point; work it already handed elsewhere
    /// is not recalled.
    pub fn cancel_task(&self, id: TaskId) -> bool {
        let removed = {
            let mut state = self.inner.state.lock();
            if let Some(task) = state.queue.remove_where(|t| t.id == id) {
                Some(task)
            } else if let Some(running) = state.running.get_mut(&id) {
                if running.status.is_terminal() {
                    return false;
                }
                running.status = TaskStatus::Cancelled;
                running.cancel.cancel();
                info!(queue = %self.inner.config.name, %id, "running task cancelled");
                return true;
            } else {
                None
            }
        };

        match removed {
            Some(task) => {
                task.cancel.cancel();
                info!(queue = %self.inner.config.name, %id, "queued task cancelled");
                true
            }
            None => false,
        }
    }

    pub fn status(&self) -> SchedulerStatus {
        let state = self.inner.state.lock();
        SchedulerStatus {
            queue_length: state.queue.len(),
            running_tasks: state.running.len(),
            max_concurrent: state.limit,
        }
    }

    /// Status of a task still owned by the scheduler.
    pub fn task_status(&self, id: TaskId) -> Option<TaskStatus> {
        let state = self.inner.state.lock();
        if let Some(running) = state.running.get(&id) {
            return Some(running.status);
        }
        let queued = state.queue.iter().any(|t| t.id == id);
        queued.then_some(TaskStatus::Pending)
    }

    pub fn concurrency_limit(&self) -> usize {
        self.inner.state.lock().limit
    }

    /// One scaling iteration: sample resources and move the limit a step.
    pub async fn rebalance(&self) -> ScaleDecision {
        let config = &self.inner.config;
        let trends = match self.inner.sampler.resource_trends(config.sample_window).await {
            Ok(trends) => trends,
            Err(e) => {
                warn!(queue = %config.name, error = %e, "resource sample failed, keeping limit");
                return ScaleDecision::Hold;
            }
        };
        let cpu = trends.latest_cpu();

        let (decision, previous, limit, load) = {
            let mut state = self.inner.state.lock();
            let load = state.running.len() as f64 / state.limit as f64;
            let decision = config.policy.decide(cpu, load);
            let previous = state.limit;
            state.limit =
                config
                    .policy
                    .apply(decision, previous, config.min_concurrent, config.max_concurrent);
            (decision, previous, state.limit, load)
        };

        if limit != previous {
            info!(queue = %config.name, ?decision, cpu, load, previous, limit, "concurrency limit adjusted");
            telemetry::record_concurrency_limit(&config.name, limit);
        }
        if limit > previous {
            self.inner.admit();
        }
        decision
    }

    /// Run [`rebalance`](Self::rebalance) every `scale_interval` until
    /// `shutdown` fires.
    pub fn spawn_scaling_loop(&self, shutdown: CancellationToken) -> JoinHandle<()> {
        let scheduler = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(scheduler.inner.config.scale_interval);
            ticker.tick().await;
            loop {
                tokio::select! {
                    biased;
                    () = shutdown.cancelled() => {
                        info!(queue = %scheduler.inner.config.name, "scaling loop stopped");
                        break;
                    }
                    _ = ticker.tick() => {
                        scheduler.rebalance().await;
                    }
                }
            }
        })
    }

    /// Stop accepting tasks, cancel everything still queued and wait up to
    /// `timeout` for running tasks to finish.
    pub async fn shutdown(&self, timeout: Duration) -> ShutdownResult {
        self.inner.shutdown.begin_drain();
        let dropped = {
            let mut state = self.inner.state.lock();
            state.queue.drain()
        };
        for task in &dropped {
            task.cancel.cancel();
        }
        info!(
            queue = %self.inner.config.name,
            cancelled = dropped.len(),
            in_flight = self.inner.shutdown.in_flight_count(),
            "scheduler draining"
        );
        drop(dropped);
        self.inner.shutdown.initiate(timeout).await
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.shutdown.is_accepting()
    }

    pub fn shutdown_state(&self) -> ShutdownState {
        self.inner.shutdown.state()
    }
}

impl SchedulerInner {
    /// Coalesce admission requests into one spawned pass.
    fn schedule_admission(self: &Arc<Self>) {
        if self.admission_pending.swap(true, Ordering::AcqRel) {
            return;
        }
        match tokio::runtime::Handle::try_current() {
            Ok(runtime) => {
                let inner = Arc::clone(self);
                runtime.spawn(async move {
                    inner.admission_pending.store(false, Ordering::Release);
                    inner.admit();
                });
            }
            Err(_) => {
                self.admission_pending.store(false, Ordering::Release);
                warn!(queue = %self.config.name, "no tokio runtime, tasks stay queued");
            }
        }
    }

    /// Start queued tasks while under the limit.
    fn admit(self: &Arc<Self>) {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            return;
        };

        let (started, queue_length, running) = {
            let mut state = self.state.lock();
            let mut started = Vec::new();
            while state.running.len() < state.limit {
                let Some(task) = state.queue.pop() else { break };
                state.running.insert(
                    task.id,
                    RunningTask {
                        status: TaskStatus::Running,
                        cancel: task.cancel.clone(),
                    },
                );
                started.push(task);
            }
            (started, state.queue.len(), state.running.len())
        };

        if started.is_empty() {
            return;
        }
        telemetry::record_queue_depth(&self.config.name, queue_length);
        telemetry::record_running_tasks(&self.config.name, running);

        for task in started {
            let slot = RunningSlot {
                inner: Arc::clone(self),
                id: task.id,
                priority: task.priority,
                enqueued_at: task.enqueued_at,
                started_at: Instant::now(),
                status: TaskStatus::Failed,
                _guard: self.shutdown.track_unchecked(),
            };
            let span = TaskSpan::new(&self.config.name, task.id.0, task.priority.as_str());
            runtime.spawn(
                async move {
                    let mut slot = slot;
                    slot.status = (task.job)(task.cancel).await;
                }
                .instrument(span),
            );
        }
    }

    fn release(self: &Arc<Self>, slot: &RunningSlot) {
        let running = {
            let mut state = self.state.lock();
            state.running.remove(&slot.id);
            state.running.len()
        };
        telemetry::record_running_tasks(&self.config.name, running);

        let now = Instant::now();
        let run_ms = now.duration_since(slot.started_at).as_secs_f64() * 1000.0;
        let wait_ms = slot.started_at.duration_since(slot.enqueued_at).as_millis();
        debug!(queue = %self.config.name, id = %slot.id, status = slot.status.as_str(), run_ms, "task finished");
        telemetry::record(
            self.metrics.as_ref(),
            "scheduler",
            "task",
            run_ms,
            telemetry::context([
                ("queue", self.config.name.clone()),
                ("priority", slot.priority.to_string()),
                ("status", slot.status.as_str().to_string()),
                ("wait_ms", wait_ms.to_string()),
                (
                    "outcome",
                    if slot.status == TaskStatus::Completed { "ok" } else { "error" }.to_string(),
                ),
            ]),
        );

        // Admitting inline would spawn from inside a drop, which recurses
        // through every queued task when the runtime is shutting down.
        self.schedule_admission();
    }
}

/// Occupies one running slot; frees it and admits the next task on drop,
/// including when the task body panics.
struct RunningSlot {
    inner: Arc<SchedulerInner>,
    id: TaskId,
    priority: Priority,
    enqueued_at: Instant,
    started_at: Instant,
    status: TaskStatus,
    _guard: ShutdownGuard,
}

impl Drop for RunningSlot {
    fn drop(&mut self) {
        let inner = Arc::clone(&self.inner);
        inner.release(self);
    }
}

/// Retry loop for one task: each attempt races the timeout, failed
/// attempts back off exponentially, cancellation wins over everything.
async fn run_attempts<T, E, F, Fut>(
    id: TaskId,
    mut execute: F,
    options: TaskOptions,
    retry_base: Duration,
    cancel: CancellationToken,
    tx: oneshot::Sender<TaskResult<T, E>>,
) -> TaskStatus
where
    F: FnMut() -> Fut + Send,
    Fut: Future<Output = Result<T, E>> + Send,
    E: Display,
{
    let attempts = options.retries.saturating_add(1);
    let operation_id = id.to_string();
    let mut attempt = 0u32;

    let result: TaskResult<T, E> = loop {
        attempt += 1;
        let outcome = async {
            match options.timeout {
                Some(timeout) => deadline::race(execute(), timeout, &operation_id)
                    .await
                    .map_err(TaskError::from),
                None => execute().await.map_err(TaskError::Failed),
            }
        };

        let outcome = tokio::select! {
            biased;
            () = cancel.cancelled() => break Err(TaskError::Cancelled),
            outcome = outcome => outcome,
        };

        match outcome {
            Ok(value) => break Ok(value),
            Err(e) if attempt < attempts => {
                let delay = retry_base.saturating_mul(1u32 << attempt.min(16));
                warn!(%id, attempt, delay_ms = delay.as_millis() as u64, error = %e, "task attempt failed, retrying");
                tokio::select! {
                    biased;
                    () = cancel.cancelled() => break Err(TaskError::Cancelled),
                    () = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => break Err(e),
        }
    };

    let status = match &result {
        Ok(_) => TaskStatus::Completed,
        Err(TaskError::Cancelled) => TaskStatus::Cancelled,
        Err(_) => TaskStatus::Failed,
    };
    if let Err(e) = &result {
        if status == TaskStatus::Failed {
            warn!(%id, attempts = attempt, error = %e, "task failed");
        }
    }
    let _ = tx.send(result);
    status
}

#[cfg(test)]
#[path = "queue_tests.rs"]
mod tests;
