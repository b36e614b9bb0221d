// Retry with exponential backoff, optionally routed through a circuit breaker.
//
// After failed attempt n the policy sleeps backoff_base * 2^(n-1) before
// attempt n+1, for at most `max_retries` extra attempts. The sleep blocks the
// calling thread; async callers should run the whole execution on a blocking
// thread.
//
// An open breaker ends the loop at once with no backoff. `attempts` counts
// calls that reached `f`, except that a rejection on the very first attempt
// counts as 1.

use std::fmt::Display;
use std::thread;
use std::time::Duration;

use log::{info, warn};

use crate::circuit_breaker::CircuitBreaker;
use crate::error::{CircuitError, RetryError};

pub const DEFAULT_MAX_RETRIES: u32 = 3;
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Result of a retried call plus how many attempts it took
#[derive(Debug)]
pub struct RetryOutcome<T, E> {
    pub result: Result<T, RetryError<E>>,
    /// Calls that reached `f`, at least 1
    pub attempts: u32,
}

/// Retry policy for transient failures
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    max_retries: u32,
    backoff_base: Duration,
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff_base: Duration) -> Self {
        Self {
            max_retries,
            backoff_base,
        }
    }

    /// Single attempt, no retries
    pub fn none() -> Self {
        Self::new(0, Duration::ZERO)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn backoff_base(&self) -> Duration {
        self.backoff_base
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }

    /// Sleep after the given failed attempt (1-based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1);
        2u32.checked_pow(exp)
            .and_then(|factor| self.backoff_base.checked_mul(factor))
            .unwrap_or(Duration::MAX)
    }

    /// Execute `f` with retry logic. `f` receives the 1-based attempt number.
    pub fn execute<T, E, F>(&self, breaker: Option<&CircuitBreaker>, mut f: F) -> RetryOutcome<T, E>
    where
        E: Display,
        F: FnMut(u32) -> Result<T, E>,
    {
        let max_attempts = self.max_attempts();
        let mut attempt = 0;

        loop {
            attempt += 1;
            let result = match breaker {
                Some(breaker) => breaker.call(|| f(attempt)),
                None => f(attempt).map_err(CircuitError::Inner),
            };

            match result {
                Ok(value) => {
                    if attempt > 1 {
                        info!("succeeded on attempt {}/{}", attempt, max_attempts);
                    }
                    return RetryOutcome {
                        result: Ok(value),
                        attempts: attempt,
                    };
                }
                Err(CircuitError::Open { retry_after }) => {
                    let attempts = if attempt == 1 { 1 } else { attempt - 1 };
                    warn!(
                        "circuit open on attempt {}, not retrying (retry after {:?})",
                        attempt, retry_after
                    );
                    return RetryOutcome {
                        result: Err(RetryError::CircuitOpen { retry_after }),
                        attempts,
                    };
                }
                Err(CircuitError::Inner(err)) => {
                    if attempt >= max_attempts {
                        warn!("attempt {}/{} failed: {}, giving up", attempt, max_attempts, err);
                        return RetryOutcome {
                            result: Err(RetryError::Exhausted {
                                attempts: attempt,
                                last_error: err,
                            }),
                            attempts: attempt,
                        };
                    }

                    let delay = self.delay_for(attempt);
                    warn!(
                        "attempt {}/{} failed: {}, retrying in {:?}",
                        attempt, max_attempts, err, delay
                    );
                    thread::sleep(delay);
                }
            }
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES, DEFAULT_BACKOFF_BASE)
    }
}
