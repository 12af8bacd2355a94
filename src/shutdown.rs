//! Graceful shutdown coordination.
//!
//! A small state machine (Running → Draining → Stopped) plus RAII guards
//! counting in-flight work, so a shutdown can wait for running tasks to
//! finish before returning.

use std::sync::atomic::{AtomicU32, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::Notify;

/// Shutdown state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ShutdownState {
    Running,
    Draining,
    Stopped,
}

impl ShutdownState {
    fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Running,
            1 => Self::Draining,
            _ => Self::Stopped,
        }
    }
}

/// Result of a shutdown operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ShutdownResult {
    Complete,
    Timeout { remaining: u32 },
}

struct Shared {
    state: AtomicU8,
    in_flight: AtomicU32,
    drained: Notify,
}

/// Tracks in-flight work and gates new admissions during shutdown.
#[derive(Clone)]
pub struct ShutdownCoordinator {
    shared: Arc<Shared>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: AtomicU8::new(ShutdownState::Running as u8),
                in_flight: AtomicU32::new(0),
                drained: Notify::new(),
            }),
        }
    }

    pub fn state(&self) -> ShutdownState {
        ShutdownState::from_u8(self.shared.state.load(Ordering::Acquire))
    }

    pub fn is_accepting(&self) -> bool {
        self.state() == ShutdownState::Running
    }

    /// Count a unit of in-flight work. Returns `None` once shutdown began.
    pub fn track(&self) -> Option<ShutdownGuard> {
        if !self.is_accepting() {
            return None;
        }
        Some(self.track_unchecked())
    }

    /// Count work that was admitted before shutdown began and must be
    /// waited for regardless of the current state.
    pub fn track_unchecked(&self) -> ShutdownGuard {
        self.shared.in_flight.fetch_add(1, Ordering::SeqCst);
        ShutdownGuard {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn in_flight_count(&self) -> u32 {
        self.shared.in_flight.load(Ordering::SeqCst)
    }

    /// Stop accepting work without waiting.
    pub fn begin_drain(&self) {
        let _ = self.shared.state.compare_exchange(
            ShutdownState::Running as u8,
            ShutdownState::Draining as u8,
            Ordering::AcqRel,
            Ordering::Acquire,
        );
    }

    /// Stop accepting work and wait up to `timeout` for in-flight work.
    pub async fn initiate(&self, timeout: Duration) -> ShutdownResult {
        self.begin_drain();
        let result = self.wait_for_drain(timeout).await;
        self.shared
            .state
            .store(ShutdownState::Stopped as u8, Ordering::Release);
        result
    }

    async fn wait_for_drain(&self, timeout: Duration) -> ShutdownResult {
        let deadline = tokio::time::Instant::now() + timeout;

        loop {
            // Register interest before checking the count so a guard
            // dropped in between still wakes us.
            let notified = self.shared.drained.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let count = self.in_flight_count();
            if count == 0 {
                return ShutdownResult::Complete;
            }

            tokio::select! {
                () = &mut notified => continue,
                () = tokio::time::sleep_until(deadline) => {
                    return match self.in_flight_count() {
                        0 => ShutdownResult::Complete,
                        remaining => ShutdownResult::Timeout { remaining },
                    };
                }
            }
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Releases one in-flight slot when dropped.
pub struct ShutdownGuard {
    shared: Arc<Shared>,
}

impl Drop for ShutdownGuard {
    fn drop(&mut self) {
        self.shared.in_flight.fetch_sub(1, Ordering::SeqCst);
        self.shared.drained.notify_waiters();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn completes_immediately_when_idle() {
        let coordinator = ShutdownCoordinator::new();
        assert_eq!(coordinator.initiate(Duration::from_secs(1)).await, ShutdownResult::Complete);
        assert_eq!(coordinator.state(), ShutdownState::Stopped);
    }

    #[tokio::test]
    async fn rejects_new_work_once_draining() {
        let coordinator = ShutdownCoordinator::new();
        coordinator.begin_drain();
        assert!(coordinator.track().is_none());
        assert_eq!(coordinator.state(), ShutdownState::Draining);
    }

    #[tokio::test(start_paused = true)]
    async fn waits_for_guards_to_drop() {
        let coordinator = ShutdownCoordinator::new();
        let guard = coordinator.track().unwrap();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(50)).await;
            drop(guard);
        });

        let result = coordinator.initiate(Duration::from_secs(5)).await;
        assert_eq!(result, ShutdownResult::Complete);
        assert_eq!(coordinator.in_flight_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn reports_remaining_on_timeout() {
        let coordinator = ShutdownCoordinator::new();
        let _guard = coordinator.track().unwrap();

        let result = coordinator.initiate(Duration::from_millis(100)).await;
        assert_eq!(result, ShutdownResult::Timeout { remaining: 1 });
    }
}
