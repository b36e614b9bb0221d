pub mod types;
pub mod error;
pub mod rules;
pub mod checker;
pub mod network_safety;
pub mod circuit_breaker;
pub mod retry;
pub mod audit_record;
pub mod config;
pub mod maker_checker;

pub use types::{InputData, RiskLevel, ValidationResult, Violation};

pub use error::{AuditError, CircuitError, ConfigError, ExecutionError, RetryError};

// Re-export rule constructors
pub use rules::{
    bulk_confirmation, in_list, max_length, no_empty_strings, positive_number,
    required_fields, rollback_required, valid_cidr, valid_ip, valid_mac, Rule, RuleFn,
    RuleKind, DEFAULT_BULK_THRESHOLD,
};

pub use checker::{
    Checker,                // Validation seam
    CompositeChecker,       // Runs child checkers in order
    RuleBasedChecker,       // Ordered rule list
};

pub use network_safety::{NetworkSafetyChecker, DANGEROUS_PORTS};

pub use circuit_breaker::{
    CircuitBreaker,         // Shared failure-count breaker
    CircuitBreakerConfig,   // Threshold and open timeout
    CircuitState,           // Closed / Open / HalfOpen
    CircuitStatus,          // Snapshot for reporting
};

pub use retry::{RetryOutcome, RetryPolicy};

pub use audit_record::{AuditLog, AuditRecord, AuditSink, MemoryAuditLog};

pub use config::GateConfig;

pub use maker_checker::{
    ExecutionResult,        // Outcome of one execute() call
    FailureKind,            // Why an execution failed
    IdentityProposer,       // Input is the plan
    MakerChecker,           // Orchestrator
    MakerCheckerBuilder,    // Builder for MakerChecker
    Proposer,               // Plan construction seam
    Protected,              // Gated function wrapper
};
