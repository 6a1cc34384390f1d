//! Retry with exponential backoff for rate-limited calls
//!
//! Only one status code is retried. The wait before attempt `n + 1` is the
//! server's retry-after hint when it gives one, otherwise
//! `initial_backoff * 2^(n - 1)`, capped at `max_backoff`.

use std::time::Duration;

use crate::constants::RETRYABLE_STATUS;

/// An error that may carry a transport status code
pub trait StatusError {
    fn status(&self) -> Option<u16>;

    /// Wait requested by the server before retrying
    fn retry_after(&self) -> Option<Duration> {
        None
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub retry_status: u16,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(30),
            retry_status: RETRYABLE_STATUS,
        }
    }
}

impl RetryPolicy {
    /// Backoff after the given failed attempt (1-based)
    pub fn backoff(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.initial_backoff
            .saturating_mul(factor)
            .min(self.max_backoff)
    }

    fn should_retry<E: StatusError>(&self, error: &E, attempt: u32) -> bool {
        attempt < self.max_attempts && error.status() == Some(self.retry_status)
    }

    /// Run `op` until it succeeds, fails with a non-retryable error, or runs
    /// out of attempts, sleeping through `sleep` between attempts
    pub fn run_with_sleep<T, E, F, S>(&self, mut op: F, mut sleep: S) -> Result<T, E>
    where
        E: StatusError,
        F: FnMut(u32) -> Result<T, E>,
        S: FnMut(Duration),
    {
        let mut attempt = 1;
        loop {
            match op(attempt) {
                Ok(value) => return Ok(value),
                Err(e) if self.should_retry(&e, attempt) => {
                    let wait = e
                        .retry_after()
                        .unwrap_or_else(|| self.backoff(attempt));
                    tracing::debug!(
                        "Attempt {} of {} rate limited, retrying in {:?}",
                        attempt,
                        self.max_attempts,
                        wait
                    );
                    sleep(wait);
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }

    /// Run `op` with blocking sleeps between attempts
    pub fn run<T, E, F>(&self, op: F) -> Result<T, E>
    where
        E: StatusError,
        F: FnMut(u32) -> Result<T, E>,
    {
        self.run_with_sleep(op, std::thread::sleep)
    }
}
