//! Task scheduling for the execution core.
//!
//! Priority queuing, admission under an adaptive concurrency limit,
//! per-task timeout and retry, and cooperative cancellation.

mod priority;
mod queue;
mod scaling;
mod task;

pub use priority::{Priority, PriorityQueue};
pub use queue::{Scheduler, SchedulerConfig, SchedulerStatus};
pub use scaling::{
    CpuSample, MemorySample, NullSampler, ResourceSampler, ResourceTrends, SamplerError,
    ScaleDecision, ScalingPolicy,
};
pub use task::{TaskError, TaskHandle, TaskId, TaskOptions, TaskStatus};
