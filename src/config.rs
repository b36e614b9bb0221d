//! # Gate Configuration
//!
//! Recognized options with their defaults. Loaded from JSON; every field is
//! optional. Durations are given in seconds.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audit_record::AuditLog;
use crate::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use crate::error::{AuditError, ConfigError};
use crate::retry::RetryPolicy;
use crate::rules::DEFAULT_BULK_THRESHOLD;

const MAX_RETRIES_LIMIT: u32 = 10;

/// Configuration for a gate instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Consecutive failures before the breaker opens
    pub failure_threshold: u32,
    /// Seconds the breaker stays open before probing
    pub timeout: f64,
    /// Extra attempts after the first failure
    pub max_retries: u32,
    /// Base backoff in seconds, doubled after every failed attempt
    pub backoff_base: f64,
    /// `targets` count above which `confirmed=true` is required
    pub bulk_confirmation_threshold: usize,
    /// JSON-Lines audit file
    pub audit_log_path: PathBuf,
    /// Fsync the audit file after every record
    pub audit_durable: bool,
    /// Operator recorded in audit entries
    pub operator_id: String,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            timeout: 60.0,
            max_retries: 3,
            backoff_base: 1.0,
            bulk_confirmation_threshold: DEFAULT_BULK_THRESHOLD,
            audit_log_path: PathBuf::from("audit.jsonl"),
            audit_durable: false,
            operator_id: "unknown".to_string(),
        }
    }
}

impl GateConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        let config: GateConfig = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json_str(&raw)
    }

    /// Validate config
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.failure_threshold == 0 {
            return Err(ConfigError::Invalid(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }

        if !self.timeout.is_finite() || self.timeout < 0.0 {
            return Err(ConfigError::Invalid(
                "timeout must be a non-negative number of seconds".to_string(),
            ));
        }

        if !self.backoff_base.is_finite() || self.backoff_base < 0.0 {
            return Err(ConfigError::Invalid(
                "backoff_base must be a non-negative number of seconds".to_string(),
            ));
        }

        if self.max_retries > MAX_RETRIES_LIMIT {
            return Err(ConfigError::Invalid(format!(
                "max_retries should not exceed {}",
                MAX_RETRIES_LIMIT
            )));
        }

        if self.operator_id.trim().is_empty() {
            return Err(ConfigError::Invalid("operator_id must not be empty".to_string()));
        }
        Ok(())
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            failure_threshold: self.failure_threshold,
            timeout: seconds(self.timeout),
        }
    }

    /// Build a fresh breaker. Share it with `Arc` where call sites should
    /// share fate.
    pub fn circuit_breaker(&self) -> CircuitBreaker {
        CircuitBreaker::with_config(self.circuit_breaker_config())
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy::new(self.max_retries, seconds(self.backoff_base))
    }

    pub fn open_audit_log(&self) -> Result<AuditLog, AuditError> {
        Ok(AuditLog::open(&self.audit_log_path)?.durable(self.audit_durable))
    }
}

/// Negative and NaN clamp to zero, overflow saturates
fn seconds(value: f64) -> Duration {
    Duration::try_from_secs_f64(value.max(0.0)).unwrap_or(Duration::MAX)
}
