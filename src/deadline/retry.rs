//! Timeout racing with retry, exponential backoff and fallback.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use futures::future::{join_all, BoxFuture};
use rand::Rng;
use tracing::{debug, warn};

use super::error::{DeadlineError, TimeoutError};

/// Default base delay between retries.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(1000);
/// Upper bound of the random jitter added to each retry delay.
pub const MAX_JITTER: Duration = Duration::from_millis(1000);
/// Retry delays never exceed this.
pub const MAX_RETRY_DELAY: Duration = Duration::from_millis(30_000);

/// Invoked before retrying an attempt that timed out.
pub type TimeoutHook = Arc<dyn Fn(&TimeoutError) + Send + Sync>;
/// Produces a substitute value once retries are exhausted.
pub type Fallback<T> = Arc<dyn Fn() -> BoxFuture<'static, T> + Send + Sync>;

/// Deadline and retry settings for [`with_timeout`].
///
/// A bare `Duration` converts into a config with no retries.
pub struct TimeoutConfig<T> {
    pub timeout: Duration,
    pub retries: u32,
    pub retry_delay: Duration,
    pub on_timeout: Option<TimeoutHook>,
    pub fallback: Option<Fallback<T>>,
}

impl<T> TimeoutConfig<T> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            timeout,
            retries: 0,
            retry_delay: DEFAULT_RETRY_DELAY,
            on_timeout: None,
            fallback: None,
        }
    }

    pub fn retries(mut self, retries: u32) -> Self {
        self.retries = retries;
        self
    }

    pub fn retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn on_timeout<H>(mut self, hook: H) -> Self
    where
        H: Fn(&TimeoutError) + Send + Sync + 'static,
    {
        self.on_timeout = Some(Arc::new(hook));
        self
    }

    pub fn fallback<F, Fut>(mut self, fallback: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = T> + Send + 'static,
    {
        self.fallback = Some(Arc::new(move || Box::pin(fallback())));
        self
    }
}

impl<T> Clone for TimeoutConfig<T> {
    fn clone(&self) -> Self {
        Self {
            timeout: self.timeout,
            retries: self.retries,
            retry_delay: self.retry_delay,
            on_timeout: self.on_timeout.clone(),
            fallback: self.fallback.clone(),
        }
    }
}

impl<T> std::fmt::Debug for TimeoutConfig<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimeoutConfig")
            .field("timeout", &self.timeout)
            .field("retries", &self.retries)
            .field("retry_delay", &self.retry_delay)
            .field("on_timeout", &self.on_timeout.is_some())
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl<T> From<Duration> for TimeoutConfig<T> {
    fn from(timeout: Duration) -> Self {
        Self::new(timeout)
    }
}

/// Delay before retry number `attempt` (1-based):
/// `min(base * 2^(attempt-1) + jitter, 30s)` with jitter in `[0, 1s]`.
pub fn calculate_retry_delay(base: Duration, attempt: u32) -> Duration {
    let exponent = attempt.saturating_sub(1).min(31);
    let backoff = base
        .checked_mul(1u32 << exponent)
        .unwrap_or(MAX_RETRY_DELAY);
    let jitter_ms = rand::thread_rng().gen_range(0..=MAX_JITTER.as_millis() as u64);
    (backoff + Duration::from_millis(jitter_ms)).min(MAX_RETRY_DELAY)
}

/// Race a single attempt against `timeout`.
pub async fn race<T, E, Fut>(
    attempt: Fut,
    timeout: Duration,
    operation_id: &str,
) -> Result<T, DeadlineError<E>>
where
    Fut: Future<Output = Result<T, E>>,
{
    match tokio::time::timeout(timeout, attempt).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(e)) => Err(DeadlineError::Failed(e)),
        Err(_) => Err(TimeoutError::new(timeout, operation_id).into()),
    }
}

/// Run `operation` under `config`, retrying failed or timed-out attempts.
///
/// `operation` is called once per attempt. When every attempt fails the
/// fallback result is returned if one is configured, otherwise the last
/// error.
pub async fn with_timeout<T, E, F, Fut>(
    mut operation: F,
    config: impl Into<TimeoutConfig<T>>,
) -> Result<T, DeadlineError<E>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let config = config.into();
    let operation_id = uuid::Uuid::new_v4().to_string();
    let attempts = config.retries.saturating_add(1);
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        let err = match race(operation(), config.timeout, &operation_id).await {
            Ok(value) => {
                debug!(%operation_id, attempt, "operation completed");
                return Ok(value);
            }
            Err(e) => e,
        };

        if attempt < attempts {
            if let (DeadlineError::Timeout(timeout), Some(hook)) = (&err, &config.on_timeout) {
                hook(timeout);
            }
            let delay = calculate_retry_delay(config.retry_delay, attempt);
            warn!(
                %operation_id,
                attempt,
                remaining = attempts - attempt,
                delay_ms = delay.as_millis() as u64,
                error = %err,
                "attempt failed, retrying"
            );
            tokio::time::sleep(delay).await;
            continue;
        }

        if let Some(fallback) = &config.fallback {
            warn!(%operation_id, attempts, error = %err, "retries exhausted, using fallback");
            return Ok(fallback().await);
        }
        return Err(err);
    }
}

/// Apply [`with_timeout`] to each operation independently and wait for all.
///
/// Results are returned in input order; one failure does not affect the
/// others.
pub async fn with_timeout_batch<T, E, F, Fut>(
    operations: Vec<F>,
    config: impl Into<TimeoutConfig<T>>,
) -> Vec<Result<T, DeadlineError<E>>>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: std::fmt::Display,
{
    let config = config.into();
    join_all(
        operations
            .into_iter()
            .map(|op| with_timeout(op, config.clone())),
    )
    .await
}

#[cfg(test)]
#[path = "retry_tests.rs"]
mod tests;
