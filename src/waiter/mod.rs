//! Bounded polling for eventually consistent conditions.
//!
//! [`Waiter`] is the only retry loop in the agent. Each pass sleeps for the
//! configured interval and then runs the caller's check; the first check
//! returning `Some` ends the wait with that value.

use std::future::Future;
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;

/// Errors raised by [`Waiter::wait`].
#[derive(Debug, Error, Eq, PartialEq)]
pub enum WaitError<E> {
    /// Every attempt finished without the condition holding.
    #[error("condition not met after {attempts} attempts")]
    Timeout {
        /// Number of checks performed.
        attempts: u32,
    },
    /// A check failed outright; waiting stops immediately.
    #[error("condition check failed: {0}")]
    Check(E),
}

/// Polling policy for one call site.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Waiter {
    interval: Duration,
    max_attempts: u32,
    progress_every: Option<u32>,
}

impl Waiter {
    /// Creates a waiter that checks up to `max_attempts` times, sleeping
    /// `interval` before each check.
    #[must_use]
    pub const fn new(interval: Duration, max_attempts: u32) -> Self {
        Self {
            interval,
            max_attempts,
            progress_every: None,
        }
    }

    /// Logs a progress line every `every` attempts.
    #[must_use]
    pub const fn with_progress_every(mut self, every: u32) -> Self {
        self.progress_every = Some(every);
        self
    }

    /// Interval between checks.
    #[must_use]
    pub const fn interval(&self) -> Duration {
        self.interval
    }

    /// Maximum number of checks.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether `attempt` (1-based) should report progress.
    #[must_use]
    pub fn reports_progress(&self, attempt: u32) -> bool {
        self.progress_every
            .filter(|every| *every > 0)
            .is_some_and(|every| attempt.checked_rem(every) == Some(0))
    }

    /// Polls `check` until it yields a value or attempts run out.
    ///
    /// `check` receives the 1-based attempt number.
    ///
    /// # Errors
    ///
    /// Returns [`WaitError::Timeout`] after `max_attempts` checks without a
    /// value, or [`WaitError::Check`] when a check fails.
    pub async fn wait<T, E, F, Fut>(&self, mut check: F) -> Result<T, WaitError<E>>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<Option<T>, E>>,
    {
        for attempt in 1..=self.max_attempts {
            sleep(self.interval).await;
            if let Some(value) = check(attempt).await.map_err(WaitError::Check)? {
                tracing::debug!(attempt, "wait condition met");
                return Ok(value);
            }
            if self.reports_progress(attempt) {
                tracing::info!(attempt, max_attempts = self.max_attempts, "still waiting");
            }
        }
        Err(WaitError::Timeout {
            attempts: self.max_attempts,
        })
    }
}
