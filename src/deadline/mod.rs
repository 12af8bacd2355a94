//! Deadline enforcement for async operations.
//!
//! Wraps an operation with a timeout, optional retries with exponential
//! backoff plus jitter, and an optional fallback value.

mod error;
mod retry;

pub use error::{DeadlineError, TimeoutError};
pub use retry::{
    calculate_retry_delay, race, with_timeout, with_timeout_batch, Fallback, TimeoutConfig,
    TimeoutHook, DEFAULT_RETRY_DELAY, MAX_JITTER, MAX_RETRY_DELAY,
};
