//! # Core Types
//!
//! Shared vocabulary for the gate:
//! - `RiskLevel` ordering used to select mandatory rules
//! - `InputData` describing a proposed action
//! - `Violation` and `ValidationResult` produced by every checker

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ConfigError;

/// Field map describing a proposed action. Borrowed immutably for a whole
/// `execute()` call.
pub type InputData = Map<String, Value>;

// ================================================================================================
// RISK LEVEL
// ================================================================================================

/// Consequence classification of an action. Ordered from least to most risky.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    /// Read-only or otherwise harmless
    None,
    Low,
    #[default]
    Medium,
    /// Requires a rollback plan
    High,
    /// Requires a rollback plan
    Critical,
}

impl RiskLevel {
    /// Returns all levels in ascending order
    pub fn all() -> [RiskLevel; 5] {
        [
            RiskLevel::None,
            RiskLevel::Low,
            RiskLevel::Medium,
            RiskLevel::High,
            RiskLevel::Critical,
        ]
    }

    /// Whether actions at this level must carry a `rollback_plan`
    pub fn requires_rollback(&self) -> bool {
        *self >= RiskLevel::High
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::None => "none",
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RiskLevel {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "none" => Ok(RiskLevel::None),
            "low" => Ok(RiskLevel::Low),
            "medium" => Ok(RiskLevel::Medium),
            "high" => Ok(RiskLevel::High),
            "critical" => Ok(RiskLevel::Critical),
            other => Err(ConfigError::Invalid(format!("unknown risk level '{}'", other))),
        }
    }
}

// ================================================================================================
// VALIDATION RESULTS
// ================================================================================================

/// A single failed check
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Violation {
    /// Stable name of the rule or detector that raised it
    pub rule_name: String,
    /// Operator-facing message, e.g. `"rollback_plan: missing"`
    pub message: String,
    /// Input field the violation refers to, when there is one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub field: Option<String>,
}

impl Violation {
    pub fn new(rule_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            rule_name: rule_name.into(),
            message: message.into(),
            field: None,
        }
    }

    pub fn for_field(
        rule_name: impl Into<String>,
        field: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            rule_name: rule_name.into(),
            message: message.into(),
            field: Some(field.into()),
        }
    }
}

impl fmt::Display for Violation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}

/// Outcome of one `validate()` call. `passed` holds exactly when there are no
/// violations.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub passed: bool,
    pub violations: Vec<Violation>,
}

impl ValidationResult {
    pub fn pass() -> Self {
        Self {
            passed: true,
            violations: Vec::new(),
        }
    }

    pub fn from_violations(violations: Vec<Violation>) -> Self {
        Self {
            passed: violations.is_empty(),
            violations,
        }
    }

    pub fn add_violation(&mut self, violation: Violation) {
        self.passed = false;
        self.violations.push(violation);
    }

    /// Appends the other result's violations after ours
    pub fn merge(&mut self, other: ValidationResult) {
        if !other.passed {
            self.passed = false;
        }
        self.violations.extend(other.violations);
    }

    pub fn messages(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.message.as_str()).collect()
    }

    /// All messages joined for a single-line error
    pub fn error_message(&self) -> String {
        self.messages().join("; ")
    }

    pub fn has_violation_for(&self, field: &str) -> bool {
        self.violations
            .iter()
            .any(|v| v.field.as_deref() == Some(field))
    }
}

impl Default for ValidationResult {
    fn default() -> Self {
        Self::pass()
    }
}
