//! # Checkers
//!
//! The `Checker` capability plus the two generic implementations:
//! - `RuleBasedChecker`: ordered rule registry, reports every failing rule
//! - `CompositeChecker`: runs child checkers in order and merges their results
//!
//! Neither short-circuits. Operators get the full violation set in one pass.

use std::sync::Arc;

use crate::rules::Rule;
use crate::types::{InputData, RiskLevel, ValidationResult};

/// Validates a proposed action at a given risk level
pub trait Checker: Send + Sync {
    fn validate(&self, input: &InputData, risk_level: RiskLevel) -> ValidationResult;

    /// Name used in logs
    fn name(&self) -> &str {
        "checker"
    }
}

impl<C: Checker + ?Sized> Checker for Box<C> {
    fn validate(&self, input: &InputData, risk_level: RiskLevel) -> ValidationResult {
        (**self).validate(input, risk_level)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

impl<C: Checker + ?Sized> Checker for Arc<C> {
    fn validate(&self, input: &InputData, risk_level: RiskLevel) -> ValidationResult {
        (**self).validate(input, risk_level)
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}

// ================================================================================================
// RULE BASED CHECKER
// ================================================================================================

/// Runs registered rules in registration order
#[derive(Debug, Clone, Default)]
pub struct RuleBasedChecker {
    rules: Vec<Rule>,
}

impl RuleBasedChecker {
    pub fn new() -> Self {
        Self { rules: Vec::new() }
    }

    pub fn add_rule(&mut self, rule: Rule) -> &mut Self {
        self.rules.push(rule);
        self
    }

    pub fn with_rule(mut self, rule: Rule) -> Self {
        self.rules.push(rule);
        self
    }

    pub fn rules(&self) -> &[Rule] {
        &self.rules
    }

    pub fn rule_names(&self) -> Vec<&str> {
        self.rules.iter().map(Rule::name).collect()
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }
}

impl FromIterator<Rule> for RuleBasedChecker {
    fn from_iter<I: IntoIterator<Item = Rule>>(iter: I) -> Self {
        Self {
            rules: iter.into_iter().collect(),
        }
    }
}

impl Checker for RuleBasedChecker {
    fn validate(&self, input: &InputData, risk_level: RiskLevel) -> ValidationResult {
        ValidationResult::from_violations(
            self.rules
                .iter()
                .flat_map(|rule| rule.evaluate(input, risk_level))
                .collect(),
        )
    }

    fn name(&self) -> &str {
        "rule_based"
    }
}

// ================================================================================================
// COMPOSITE CHECKER
// ================================================================================================

/// Logical AND of several checkers. Violations are reported in child order,
/// each child's violations in its own order.
#[derive(Default)]
pub struct CompositeChecker {
    checkers: Vec<Box<dyn Checker>>,
}

impl CompositeChecker {
    pub fn new() -> Self {
        Self {
            checkers: Vec::new(),
        }
    }

    pub fn add_checker<C: Checker + 'static>(&mut self, checker: C) -> &mut Self {
        self.checkers.push(Box::new(checker));
        self
    }

    pub fn with_checker<C: Checker + 'static>(mut self, checker: C) -> Self {
        self.checkers.push(Box::new(checker));
        self
    }

    pub fn len(&self) -> usize {
        self.checkers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.checkers.is_empty()
    }
}

impl Checker for CompositeChecker {
    fn validate(&self, input: &InputData, risk_level: RiskLevel) -> ValidationResult {
        let mut result = ValidationResult::pass();
        for checker in &self.checkers {
            result.merge(checker.validate(input, risk_level));
        }
        // passed is defined by the merged violation set, not by child flags
        result.passed = result.violations.is_empty();
        result
    }

    fn name(&self) -> &str {
        "composite"
    }
}
