// Error taxonomy for the gate.
// Validation failures, open circuits and exhausted retries are reported
// through `ExecutionResult` by `MakerChecker::execute`; only audit write
// failures escape as errors there. `Protected::call` surfaces all of them
// through `ExecutionError`.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

use crate::types::Violation;

/// Errors raised by the protected-call wrapper
#[derive(Debug, Error)]
pub enum ExecutionError {
    #[error("validation failed: {message}")]
    Validation {
        message: String,
        violations: Vec<Violation>,
    },

    #[error("circuit breaker open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration, attempts: u32 },

    #[error("action failed after {attempts} attempt(s): {last_error}")]
    ExhaustedRetries { attempts: u32, last_error: String },

    #[error(transparent)]
    Audit(#[from] AuditError),
}

/// Audit sink failures. Never swallowed.
#[derive(Debug, Error)]
pub enum AuditError {
    #[error("failed to open audit log {path}: {source}")]
    Open {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append audit record: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Configuration errors
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("audit sink is required")]
    MissingAuditSink,

    #[error("failed to read config file {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Error from a call routed through a `CircuitBreaker`
#[derive(Debug, Error, PartialEq)]
pub enum CircuitError<E> {
    #[error("circuit open, retry after {retry_after:?}")]
    Open { retry_after: Duration },

    #[error("{0}")]
    Inner(E),
}

/// Error from `RetryPolicy::execute`
#[derive(Debug, Error, PartialEq)]
pub enum RetryError<E> {
    #[error("circuit open, retry after {retry_after:?}")]
    CircuitOpen { retry_after: Duration },

    #[error("exhausted {attempts} attempt(s): {last_error}")]
    Exhausted { attempts: u32, last_error: E },
}
