// Failure-count circuit breaker guarding one downstream dependency.
//
// States:
//   Closed   -> calls pass through, consecutive failures are counted
//   Open     -> calls are rejected until `timeout` has elapsed
//   HalfOpen -> calls pass through as probes; success closes, failure reopens
//
// Transitions happen only inside `call`: Closed->Open when failure_count
// reaches the threshold, Open->HalfOpen when a call arrives after the
// timeout, HalfOpen->Closed on the next success, HalfOpen->Open on the next
// failure.
//
// State lives behind a mutex that is never held while the protected
// function runs. Every trip to Open (and every reset) starts a new
// generation; results from calls admitted in an earlier generation are
// dropped, so a slow call cannot close or clear a breaker that opened after
// it started. Breakers are process-local; share one by passing the same
// `Arc<CircuitBreaker>` to every call site that should share fate.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use log::{info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::CircuitError;

pub const DEFAULT_FAILURE_THRESHOLD: u32 = 5;
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

/// Breaker settings
#[derive(Debug, Clone, PartialEq)]
pub struct CircuitBreakerConfig {
    /// Consecutive failures that open the breaker
    pub failure_threshold: u32,
    /// How long the breaker stays open before letting a probe through
    pub timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: DEFAULT_FAILURE_THRESHOLD,
            timeout: DEFAULT_TIMEOUT,
        }
    }
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitStatus {
    pub state: CircuitState,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub timeout_secs: f64,
    pub last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug)]
struct BreakerState {
    state: CircuitState,
    failure_count: u32,
    opened_at: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
    generation: u64,
}

impl BreakerState {
    fn closed() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            last_failure_time: None,
            generation: 0,
        }
    }

    fn trip(&mut self) {
        self.state = CircuitState::Open;
        self.opened_at = Some(Instant::now());
        self.generation = self.generation.wrapping_add(1);
    }
}

#[derive(Debug)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: Mutex<BreakerState>,
}

impl CircuitBreaker {
    /// A threshold of 0 is treated as 1
    pub fn new(failure_threshold: u32, timeout: Duration) -> Self {
        Self::with_config(CircuitBreakerConfig {
            failure_threshold,
            timeout,
        })
    }

    pub fn with_config(mut config: CircuitBreakerConfig) -> Self {
        config.failure_threshold = config.failure_threshold.max(1);
        Self {
            config,
            inner: Mutex::new(BreakerState::closed()),
        }
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Run `f` through the breaker. Rejected without calling `f` while open.
    pub fn call<T, E, F>(&self, f: F) -> Result<T, CircuitError<E>>
    where
        F: FnOnce() -> Result<T, E>,
    {
        let generation = self
            .try_acquire()
            .map_err(|retry_after| CircuitError::Open { retry_after })?;

        match f() {
            Ok(value) => {
                self.record_success(generation);
                Ok(value)
            }
            Err(err) => {
                self.record_failure(generation);
                Err(CircuitError::Inner(err))
            }
        }
    }

    /// Admits a call, moving Open->HalfOpen once the timeout has elapsed.
    /// Returns the admitting generation, or the remaining open time when
    /// rejected.
    fn try_acquire(&self) -> Result<u64, Duration> {
        let mut inner = self.inner.lock();
        if inner.state != CircuitState::Open {
            return Ok(inner.generation);
        }

        let elapsed = inner.opened_at.map(|t| t.elapsed()).unwrap_or(self.config.timeout);
        if elapsed >= self.config.timeout {
            inner.state = CircuitState::HalfOpen;
            info!("circuit breaker half-open after {:?}, probing", elapsed);
            Ok(inner.generation)
        } else {
            Err(self.config.timeout - elapsed)
        }
    }

    fn record_success(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.failure_count = 0;
        if inner.state == CircuitState::HalfOpen {
            inner.state = CircuitState::Closed;
            inner.opened_at = None;
            info!("circuit breaker closed after successful probe");
        }
    }

    fn record_failure(&self, generation: u64) {
        let mut inner = self.inner.lock();
        if inner.generation != generation {
            return;
        }
        inner.failure_count = inner.failure_count.saturating_add(1);
        inner.last_failure_time = Some(Utc::now());

        match inner.state {
            CircuitState::HalfOpen => {
                inner.trip();
                warn!("circuit breaker re-opened: probe failed");
            }
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.trip();
                warn!(
                    "circuit breaker opened after {} consecutive failures",
                    inner.failure_count
                );
            }
            _ => {}
        }
    }

    pub fn state(&self) -> CircuitState {
        self.inner.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.inner.lock().failure_count
    }

    /// Consistent snapshot taken under the state lock
    pub fn status(&self) -> CircuitStatus {
        let inner = self.inner.lock();
        CircuitStatus {
            state: inner.state,
            failure_count: inner.failure_count,
            failure_threshold: self.config.failure_threshold,
            timeout_secs: self.config.timeout.as_secs_f64(),
            last_failure_time: inner.last_failure_time,
        }
    }

    /// Force the breaker closed and clear its counters
    pub fn reset(&self) {
        let mut inner = self.inner.lock();
        let generation = inner.generation.wrapping_add(1);
        *inner = BreakerState::closed();
        inner.generation = generation;
        info!("circuit breaker reset");
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::with_config(CircuitBreakerConfig::default())
    }
}
