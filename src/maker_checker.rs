//! # Maker/Checker Orchestrator
//!
//! Ties a `Proposer` (builds the action plan) and a `Checker` (validates it)
//! to the execution protocol:
//! 1. Propose the plan from the caller's input
//! 2. Validate it at the configured risk level, plus mandatory rules
//! 3. On pass, run the action through retry and the optional circuit breaker
//! 4. Append exactly one audit record, whatever the outcome
//!
//! Validation is done once, before the retry loop. Retries only re-invoke the
//! action with the same plan.

use std::borrow::Cow;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Instant;

use log::{error, info, warn};
use serde::{Deserialize, Serialize};

use crate::audit_record::{AuditRecord, AuditSink};
use crate::checker::Checker;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::GateConfig;
use crate::error::{AuditError, ConfigError, ExecutionError, RetryError};
use crate::retry::{RetryOutcome, RetryPolicy};
use crate::rules::{bulk_confirmation, rollback_required, Rule, DEFAULT_BULK_THRESHOLD};
use crate::types::{InputData, RiskLevel, ValidationResult, Violation};

// ================================================================================================
// PROPOSER
// ================================================================================================

/// Builds the action plan that will be validated and executed
pub trait Proposer: Send + Sync {
    fn propose<'a>(&self, action_name: &str, input: &'a InputData) -> Cow<'a, InputData>;
}

/// Uses the caller's input as the plan
#[derive(Debug, Clone, Copy, Default)]
pub struct IdentityProposer;

impl Proposer for IdentityProposer {
    fn propose<'a>(&self, _action_name: &str, input: &'a InputData) -> Cow<'a, InputData> {
        Cow::Borrowed(input)
    }
}

impl<F> Proposer for F
where
    F: Fn(&str, &InputData) -> InputData + Send + Sync,
{
    fn propose<'a>(&self, action_name: &str, input: &'a InputData) -> Cow<'a, InputData> {
        Cow::Owned(self(action_name, input))
    }
}

// ================================================================================================
// EXECUTION RESULT
// ================================================================================================

/// Why an execution did not succeed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    Validation,
    CircuitOpen,
    ExhaustedRetries,
}

/// Outcome of one `execute()` call
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionResult {
    pub success: bool,
    pub error: Option<String>,
    pub execution_time_ms: u64,
    /// Times the action ran; 0 when validation rejected it, 1 when the
    /// breaker rejected the first attempt
    pub iterations_required: u32,
    pub action_name: String,
    pub risk_level: RiskLevel,
    /// Every violation when validation failed
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub violations: Vec<Violation>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failure: Option<FailureKind>,
}

impl ExecutionResult {
    fn rejected(action_name: &str, risk_level: RiskLevel, validation: &ValidationResult) -> Self {
        Self {
            success: false,
            error: Some(validation.error_message()),
            execution_time_ms: 0,
            iterations_required: 0,
            action_name: action_name.to_string(),
            risk_level,
            violations: validation.violations.clone(),
            failure: Some(FailureKind::Validation),
        }
    }

    fn succeeded(action_name: &str, risk_level: RiskLevel, elapsed_ms: u64, attempts: u32) -> Self {
        Self {
            success: true,
            error: None,
            execution_time_ms: elapsed_ms,
            iterations_required: attempts,
            action_name: action_name.to_string(),
            risk_level,
            violations: Vec::new(),
            failure: None,
        }
    }

    fn failed(
        action_name: &str,
        risk_level: RiskLevel,
        elapsed_ms: u64,
        attempts: u32,
        kind: FailureKind,
        error: String,
    ) -> Self {
        Self {
            success: false,
            error: Some(error),
            execution_time_ms: elapsed_ms,
            iterations_required: attempts,
            action_name: action_name.to_string(),
            risk_level,
            violations: Vec::new(),
            failure: Some(kind),
        }
    }

    pub fn violation_messages(&self) -> Vec<&str> {
        self.violations.iter().map(|v| v.message.as_str()).collect()
    }
}

// ================================================================================================
// MAKER CHECKER
// ================================================================================================

/// Gate for one class of action at a fixed risk level
pub struct MakerChecker {
    checker: Box<dyn Checker>,
    proposer: Box<dyn Proposer>,
    risk_level: RiskLevel,
    retry_policy: RetryPolicy,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    audit_sink: Arc<dyn AuditSink>,
    operator_id: String,
    mandatory_rules: Vec<Rule>,
}

impl MakerChecker {
    pub fn builder<C: Checker + 'static>(checker: C, risk_level: RiskLevel) -> MakerCheckerBuilder {
        MakerCheckerBuilder::new(checker, risk_level)
    }

    pub fn risk_level(&self) -> RiskLevel {
        self.risk_level
    }

    pub fn operator_id(&self) -> &str {
        &self.operator_id
    }

    pub fn retry_policy(&self) -> &RetryPolicy {
        &self.retry_policy
    }

    pub fn circuit_breaker(&self) -> Option<&Arc<CircuitBreaker>> {
        self.circuit_breaker.as_ref()
    }

    /// Propose and validate without executing or auditing
    pub fn check(&self, action_name: &str, input: &InputData) -> ValidationResult {
        let plan = self.proposer.propose(action_name, input);
        self.validate_plan(&plan)
    }

    /// Run the full protocol. Rejections and execution failures are reported
    /// in the returned `ExecutionResult`; only a failed audit write is an
    /// `Err`.
    pub fn execute<T, E, F>(
        &self,
        action_name: &str,
        input: &InputData,
        execute_fn: F,
    ) -> Result<ExecutionResult, AuditError>
    where
        E: Display,
        F: FnMut(&InputData) -> Result<T, E>,
    {
        let (result, outcome) = self.run(action_name, input, execute_fn);
        match outcome {
            Err(ExecutionError::Audit(err)) => Err(err),
            _ => Ok(result),
        }
    }

    /// Wrap `f` so every call goes through this gate
    pub fn protect<F>(self, action_name: impl Into<String>, f: F) -> Protected<F> {
        Protected {
            gate: self,
            action_name: action_name.into(),
            f,
        }
    }

    fn validate_plan(&self, plan: &InputData) -> ValidationResult {
        let mut result = self.checker.validate(plan, self.risk_level);

        // mandatory rules only add what the checker has not already reported
        // for the same field
        for rule in &self.mandatory_rules {
            for violation in rule.evaluate(plan, self.risk_level) {
                let reported = violation
                    .field
                    .as_deref()
                    .is_some_and(|field| result.has_violation_for(field));
                if !reported {
                    result.add_violation(violation);
                }
            }
        }
        result
    }

    fn run<T, E, F>(
        &self,
        action_name: &str,
        input: &InputData,
        mut execute_fn: F,
    ) -> (ExecutionResult, Result<T, ExecutionError>)
    where
        E: Display,
        F: FnMut(&InputData) -> Result<T, E>,
    {
        let plan = self.proposer.propose(action_name, input);
        let validation = self.validate_plan(&plan);

        if !validation.passed {
            warn!(
                "{} rejected by {} checker at {} risk with {} violation(s): {}",
                action_name,
                self.checker.name(),
                self.risk_level,
                validation.violations.len(),
                validation.error_message()
            );
            let result = ExecutionResult::rejected(action_name, self.risk_level, &validation);
            let outcome = Err(ExecutionError::Validation {
                message: validation.error_message(),
                violations: validation.violations,
            });
            return self.finish(result, outcome);
        }

        let start = Instant::now();
        let RetryOutcome { result: retried, attempts } = self
            .retry_policy
            .execute(self.circuit_breaker.as_deref(), |_attempt| execute_fn(&*plan));
        let elapsed_ms = start.elapsed().as_millis() as u64;

        let (result, outcome) = match retried {
            Ok(value) => {
                info!(
                    "{} succeeded at {} risk after {} attempt(s) in {}ms",
                    action_name, self.risk_level, attempts, elapsed_ms
                );
                (
                    ExecutionResult::succeeded(action_name, self.risk_level, elapsed_ms, attempts),
                    Ok(value),
                )
            }
            Err(RetryError::CircuitOpen { retry_after }) => {
                let err = ExecutionError::CircuitOpen {
                    retry_after,
                    attempts,
                };
                warn!("{} not executed: {}", action_name, err);
                (
                    ExecutionResult::failed(
                        action_name,
                        self.risk_level,
                        elapsed_ms,
                        attempts,
                        FailureKind::CircuitOpen,
                        err.to_string(),
                    ),
                    Err(err),
                )
            }
            Err(RetryError::Exhausted { attempts, last_error }) => {
                let err = ExecutionError::ExhaustedRetries {
                    attempts,
                    last_error: last_error.to_string(),
                };
                warn!("{} failed: {}", action_name, err);
                (
                    ExecutionResult::failed(
                        action_name,
                        self.risk_level,
                        elapsed_ms,
                        attempts,
                        FailureKind::ExhaustedRetries,
                        err.to_string(),
                    ),
                    Err(err),
                )
            }
        };

        self.finish(result, outcome)
    }

    /// Writes the audit record. A write failure replaces the outcome.
    fn finish<T>(
        &self,
        result: ExecutionResult,
        outcome: Result<T, ExecutionError>,
    ) -> (ExecutionResult, Result<T, ExecutionError>) {
        let record = AuditRecord::from_result(&result, self.operator_id.as_str());
        match self.audit_sink.append(&record) {
            Ok(()) => (result, outcome),
            Err(err) => {
                error!("audit write failed for {}: {}", record.summary(), err);
                (result, Err(ExecutionError::Audit(err)))
            }
        }
    }
}

/// Builder for MakerChecker
pub struct MakerCheckerBuilder {
    checker: Box<dyn Checker>,
    proposer: Box<dyn Proposer>,
    risk_level: RiskLevel,
    retry_policy: RetryPolicy,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    audit_sink: Option<Arc<dyn AuditSink>>,
    operator_id: String,
    bulk_confirmation_threshold: usize,
}

impl MakerCheckerBuilder {
    pub fn new<C: Checker + 'static>(checker: C, risk_level: RiskLevel) -> Self {
        Self {
            checker: Box::new(checker),
            proposer: Box::new(IdentityProposer),
            risk_level,
            retry_policy: RetryPolicy::default(),
            circuit_breaker: None,
            audit_sink: None,
            operator_id: "unknown".to_string(),
            bulk_confirmation_threshold: DEFAULT_BULK_THRESHOLD,
        }
    }

    /// Apply retry, bulk threshold and operator settings. The breaker is not
    /// created here; pass one with `circuit_breaker`.
    pub fn config(mut self, config: &GateConfig) -> Self {
        self.retry_policy = config.retry_policy();
        self.bulk_confirmation_threshold = config.bulk_confirmation_threshold;
        self.operator_id = config.operator_id.clone();
        self
    }

    pub fn proposer<P: Proposer + 'static>(mut self, proposer: P) -> Self {
        self.proposer = Box::new(proposer);
        self
    }

    pub fn retry_policy(mut self, policy: RetryPolicy) -> Self {
        self.retry_policy = policy;
        self
    }

    /// Every gate given the same breaker shares its state
    pub fn circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn audit_sink(mut self, sink: Arc<dyn AuditSink>) -> Self {
        self.audit_sink = Some(sink);
        self
    }

    pub fn operator_id(mut self, operator_id: impl Into<String>) -> Self {
        self.operator_id = operator_id.into();
        self
    }

    pub fn bulk_confirmation_threshold(mut self, threshold: usize) -> Self {
        self.bulk_confirmation_threshold = threshold;
        self
    }

    pub fn build(self) -> Result<MakerChecker, ConfigError> {
        let audit_sink = self.audit_sink.ok_or(ConfigError::MissingAuditSink)?;
        if self.operator_id.trim().is_empty() {
            return Err(ConfigError::Invalid("operator_id must not be empty".to_string()));
        }

        Ok(MakerChecker {
            checker: self.checker,
            proposer: self.proposer,
            risk_level: self.risk_level,
            retry_policy: self.retry_policy,
            circuit_breaker: self.circuit_breaker,
            audit_sink,
            operator_id: self.operator_id,
            mandatory_rules: vec![
                rollback_required(),
                bulk_confirmation(self.bulk_confirmation_threshold),
            ],
        })
    }
}

// ================================================================================================
// PROTECTED WRAPPER
// ================================================================================================

/// A function gated by a `MakerChecker`. Calls return the function's value
/// on success and an `ExecutionError` otherwise.
pub struct Protected<F> {
    gate: MakerChecker,
    action_name: String,
    f: F,
}

impl<F> Protected<F> {
    pub fn call<T, E>(&self, input: &InputData) -> Result<T, ExecutionError>
    where
        E: Display,
        F: Fn(&InputData) -> Result<T, E>,
    {
        self.call_with_result(input).1
    }

    /// Like `call`, also returning the execution result that was audited
    pub fn call_with_result<T, E>(&self, input: &InputData) -> (ExecutionResult, Result<T, ExecutionError>)
    where
        E: Display,
        F: Fn(&InputData) -> Result<T, E>,
    {
        self.gate.run(&self.action_name, input, |plan| (self.f)(plan))
    }

    pub fn action_name(&self) -> &str {
        &self.action_name
    }

    pub fn gate(&self) -> &MakerChecker {
        &self.gate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audit_record::{AuditLog, MemoryAuditLog};
    use crate::checker::{CompositeChecker, RuleBasedChecker};
    use crate::network_safety::NetworkSafetyChecker;
    use crate::rules::{required_fields, valid_ip};
    use serde_json::{json, Value};
    use std::cell::Cell;
    use std::time::Duration;

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap()
    }

    fn site_checker() -> RuleBasedChecker {
        RuleBasedChecker::new()
            .with_rule(required_fields(["site_id", "rollback_plan"]))
            .with_rule(valid_ip("target_ip"))
    }

    fn gate_with<C: Checker + 'static>(checker: C, risk: RiskLevel) -> (MakerChecker, Arc<MemoryAuditLog>) {
        let audit = Arc::new(MemoryAuditLog::new());
        let gate = MakerChecker::builder(checker, risk)
            .retry_policy(RetryPolicy::new(3, Duration::ZERO))
            .audit_sink(audit.clone())
            .operator_id("netops-bot")
            .build()
            .unwrap();
        (gate, audit)
    }

    struct FailingSink;

    impl AuditSink for FailingSink {
        fn append(&self, _record: &AuditRecord) -> Result<(), AuditError> {
            Err(AuditError::Write(std::io::Error::new(
                std::io::ErrorKind::Other,
                "disk full",
            )))
        }
    }

    #[test]
    fn test_high_risk_without_rollback_is_rejected_and_audited() {
        let (gate, audit) = gate_with(site_checker(), RiskLevel::High);
        let invoked = Cell::new(false);

        let result = gate
            .execute(
                "push_config",
                &input(json!({"site_id": "abc", "target_ip": "192.168.1.1"})),
                |_| {
                    invoked.set(true);
                    Ok::<_, String>(())
                },
            )
            .unwrap();

        assert!(!result.success);
        assert_eq!(result.violation_messages(), vec!["rollback_plan: missing"]);
        assert_eq!(result.error.as_deref(), Some("rollback_plan: missing"));
        assert_eq!(result.iterations_required, 0);
        assert_eq!(result.failure, Some(FailureKind::Validation));
        assert!(!invoked.get());

        let records = audit.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].action_name, "push_config");
        assert_eq!(records[0].operator_id, "netops-bot");
        assert_eq!(records[0].risk_level, RiskLevel::High);
    }

    #[test]
    fn test_high_risk_with_rollback_executes_once() {
        let (gate, audit) = gate_with(site_checker(), RiskLevel::High);
        let calls = Cell::new(0);

        let result = gate
            .execute(
                "push_config",
                &input(json!({
                    "site_id": "abc",
                    "target_ip": "192.168.1.1",
                    "rollback_plan": "revert to backup-2025-01-01"
                })),
                |plan| {
                    calls.set(calls.get() + 1);
                    assert_eq!(plan["site_id"], "abc");
                    Ok::<_, String>("pushed")
                },
            )
            .unwrap();

        assert!(result.success);
        assert!(result.error.is_none());
        assert_eq!(result.iterations_required, 1);
        assert_eq!(calls.get(), 1);
        assert_eq!(audit.len(), 1);
        assert!(audit.records()[0].success);
    }

    #[test]
    fn test_transient_failures_are_retried() {
        let (gate, audit) = gate_with(RuleBasedChecker::new(), RiskLevel::Low);
        let calls = Cell::new(0);

        let result = gate
            .execute("sync_vlans", &InputData::new(), |_| {
                calls.set(calls.get() + 1);
                if calls.get() < 3 {
                    Err("api timeout")
                } else {
                    Ok(())
                }
            })
            .unwrap();
        assert!(result.success);
        assert_eq!(result.iterations_required, 3);

        let result = gate
            .execute("sync_vlans", &InputData::new(), |_| Err::<(), _>("api down"))
            .unwrap();
        assert!(!result.success);
        assert_eq!(result.iterations_required, 4);
        assert_eq!(result.failure, Some(FailureKind::ExhaustedRetries));
        assert!(result.error.unwrap().contains("api down"));

        let records = audit.records();
        assert_eq!(records.len(), 2);
        assert_eq!(records[1].iterations_required, 4);
    }

    #[test]
    fn test_shared_breaker_spans_gates() {
        let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(60)));
        let audit = Arc::new(MemoryAuditLog::new());
        let build = || {
            MakerChecker::builder(RuleBasedChecker::new(), RiskLevel::Medium)
                .retry_policy(RetryPolicy::none())
                .circuit_breaker(Arc::clone(&breaker))
                .audit_sink(audit.clone())
                .build()
                .unwrap()
        };
        let first = build();
        let second = build();

        for _ in 0..3 {
            let result = first
                .execute("push_acl", &InputData::new(), |_| Err::<(), _>("503"))
                .unwrap();
            assert_eq!(result.failure, Some(FailureKind::ExhaustedRetries));
        }

        let invoked = Cell::new(false);
        let result = second
            .execute("push_acl", &InputData::new(), |_| {
                invoked.set(true);
                Ok::<_, String>(())
            })
            .unwrap();
        assert!(!invoked.get());
        assert!(!result.success);
        assert_eq!(result.failure, Some(FailureKind::CircuitOpen));
        assert_eq!(result.iterations_required, 1);
        assert_eq!(audit.len(), 4);
        assert!(second.circuit_breaker().is_some());
    }

    #[test]
    fn test_iterations_match_calls_when_breaker_opens_mid_retry() {
        let breaker = Arc::new(CircuitBreaker::new(2, Duration::from_secs(60)));
        let audit = Arc::new(MemoryAuditLog::new());
        let gate = MakerChecker::builder(RuleBasedChecker::new(), RiskLevel::Low)
            .retry_policy(RetryPolicy::new(5, Duration::ZERO))
            .circuit_breaker(breaker)
            .audit_sink(audit.clone())
            .build()
            .unwrap();

        let calls = Cell::new(0);
        let result = gate
            .execute("push_acl", &InputData::new(), |_| {
                calls.set(calls.get() + 1);
                Err::<(), _>("503")
            })
            .unwrap();
        assert_eq!(calls.get(), 2);
        assert_eq!(result.iterations_required, 2);
        assert_eq!(result.failure, Some(FailureKind::CircuitOpen));
        assert_eq!(audit.records()[0].iterations_required, 2);
    }

    #[test]
    fn test_mandatory_rules_apply_without_checker_rules() {
        let (gate, _) = gate_with(RuleBasedChecker::new(), RiskLevel::Critical);
        let result = gate.check("wipe_device", &input(json!({"device": "fw-1"})));
        assert_eq!(result.violations.len(), 1);
        assert_eq!(result.violations[0].rule_name, "rollback_required");

        let (gate, audit) = gate_with(RuleBasedChecker::new(), RiskLevel::Low);
        let targets: Vec<String> = (0..11).map(|i| format!("sw-{}", i)).collect();
        let unconfirmed = input(json!({"targets": targets}));
        let result = gate.execute("bulk_push", &unconfirmed, |_| Ok::<_, String>(())).unwrap();
        assert!(!result.success);
        assert_eq!(result.violations[0].rule_name, "bulk_confirmation");

        let confirmed = input(json!({"targets": targets, "confirmed": true}));
        let result = gate.execute("bulk_push", &confirmed, |_| Ok::<_, String>(())).unwrap();
        assert!(result.success);
        assert_eq!(audit.len(), 2);
        // check() never audits
        assert_eq!(gate.check("bulk_push", &unconfirmed).violations.len(), 1);
        assert_eq!(audit.len(), 2);
    }

    #[test]
    fn test_configured_bulk_threshold() {
        let audit = Arc::new(MemoryAuditLog::new());
        let config = GateConfig {
            bulk_confirmation_threshold: 2,
            operator_id: "change-bot".to_string(),
            ..GateConfig::default()
        };
        let gate = MakerChecker::builder(RuleBasedChecker::new(), RiskLevel::Low)
            .config(&config)
            .audit_sink(audit)
            .build()
            .unwrap();
        assert_eq!(gate.operator_id(), "change-bot");
        assert_eq!(gate.retry_policy().max_retries(), 3);

        let result = gate.check("bulk_push", &input(json!({"targets": ["a", "b", "c"]})));
        assert!(!result.passed);
    }

    #[test]
    fn test_composite_checker_reports_every_violation() {
        let checker = CompositeChecker::new()
            .with_checker(site_checker())
            .with_checker(NetworkSafetyChecker::new());
        let (gate, _) = gate_with(checker, RiskLevel::High);

        let result = gate
            .execute(
                "open_firewall",
                &input(json!({
                    "site_id": "abc",
                    "rollback_plan": "delete rule 10",
                    "target_ip": "10.0.0.300",
                    "firewall_rules": [{"action": "allow", "source": "any", "port": 3389, "protocol": "tcp"}]
                })),
                |_| Ok::<_, String>(()),
            )
            .unwrap();
        assert_eq!(result.violations.len(), 2);
        assert_eq!(result.violations[0].rule_name, "valid_ip");
        assert_eq!(result.violations[1].rule_name, "dangerous_port_exposure");
        assert!(result.error.unwrap().contains("; "));
    }

    #[test]
    fn test_audit_failure_propagates() {
        let gate = MakerChecker::builder(RuleBasedChecker::new(), RiskLevel::Low)
            .retry_policy(RetryPolicy::none())
            .audit_sink(Arc::new(FailingSink))
            .build()
            .unwrap();

        let err = gate
            .execute("noop", &InputData::new(), |_| Ok::<_, String>(()))
            .unwrap_err();
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_builder_requires_audit_sink() {
        let result = MakerChecker::builder(RuleBasedChecker::new(), RiskLevel::Low).build();
        assert!(matches!(result, Err(ConfigError::MissingAuditSink)));
    }

    #[test]
    fn test_proposer_output_is_validated_and_executed() {
        let audit = Arc::new(MemoryAuditLog::new());
        let gate = MakerChecker::builder(site_checker(), RiskLevel::Medium)
            .proposer(|action: &str, input: &InputData| {
                let mut plan = input.clone();
                plan.insert("site_id".to_string(), json!(format!("{}-site", action)));
                plan
            })
            .audit_sink(audit)
            .build()
            .unwrap();

        let seen = std::cell::RefCell::new(String::new());
        let result = gate
            .execute("hq", &input(json!({"rollback_plan": "undo"})), |plan| {
                *seen.borrow_mut() = plan["site_id"].as_str().unwrap().to_string();
                Ok::<_, String>(())
            })
            .unwrap();
        assert!(result.success);
        assert_eq!(*seen.borrow(), "hq-site");
    }

    #[test]
    fn test_every_execute_writes_one_line_to_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("audit.jsonl");
        let gate = MakerChecker::builder(site_checker(), RiskLevel::High)
            .retry_policy(RetryPolicy::new(1, Duration::ZERO))
            .audit_sink(Arc::new(AuditLog::open(&path).unwrap()))
            .operator_id("ops")
            .build()
            .unwrap();

        let good = input(json!({"site_id": "a", "rollback_plan": "undo", "target_ip": "10.0.0.1"}));
        let bad = input(json!({"site_id": "a"}));
        gate.execute("push", &good, |_| Ok::<_, String>(())).unwrap();
        gate.execute("push", &bad, |_| Ok::<_, String>(())).unwrap();
        gate.execute("push", &good, |_| Err::<(), _>("refused")).unwrap();

        let lines: Vec<Value> = std::fs::read_to_string(&path)
            .unwrap()
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        let success: Vec<_> = lines.iter().map(|l| l["success"].as_bool().unwrap()).collect();
        assert_eq!(success, vec![true, false, false]);
        let iterations: Vec<_> = lines.iter().map(|l| l["iterations_required"].as_u64().unwrap()).collect();
        assert_eq!(iterations, vec![1, 0, 2]);
        assert!(lines.iter().all(|l| l["operator_id"] == "ops" && l["risk_level"] == "high"));
    }

    #[test]
    fn test_concurrent_executions_each_audited() {
        let (gate, audit) = gate_with(site_checker(), RiskLevel::Low);
        let gate = Arc::new(gate);
        let handles: Vec<_> = (0..8)
            .map(|i| {
                let gate = Arc::clone(&gate);
                std::thread::spawn(move || {
                    let data = input(json!({"site_id": format!("s{}", i), "rollback_plan": "undo"}));
                    gate.execute("push", &data, |_| Ok::<_, String>(())).unwrap().success
                })
            })
            .collect();
        for handle in handles {
            assert!(handle.join().unwrap());
        }
        assert_eq!(audit.len(), 8);
    }

    #[test]
    fn test_protected_returns_value_or_error() {
        let (gate, audit) = gate_with(site_checker(), RiskLevel::High);
        let push = gate.protect("push_config", |plan: &InputData| {
            Ok::<_, String>(format!("pushed to {}", plan["site_id"].as_str().unwrap_or("?")))
        });
        assert_eq!(push.action_name(), "push_config");

        let ok = push.call(&input(json!({"site_id": "abc", "rollback_plan": "undo"})));
        assert_eq!(ok.unwrap(), "pushed to abc");

        let err = push.call(&input(json!({"site_id": "abc"}))).unwrap_err();
        match err {
            ExecutionError::Validation { violations, .. } => {
                assert_eq!(violations[0].message, "rollback_plan: missing");
            }
            other => panic!("unexpected error {:?}", other),
        }

        let (result, outcome) = push.call_with_result(&input(json!({"site_id": "x", "rollback_plan": "u"})));
        assert!(result.success);
        assert!(outcome.is_ok());
        assert_eq!(audit.len(), 3);
        assert_eq!(push.gate().risk_level(), RiskLevel::High);
    }
}
