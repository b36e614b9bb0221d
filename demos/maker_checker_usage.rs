// demos/maker_checker_usage.rs
//
// Walks through gating a network change with MakerChecker
// Run with: cargo run --example maker_checker_usage

use std::sync::Arc;
use std::time::Duration;

use action_gate::{
    required_fields, valid_ip, AuditLog, CircuitBreaker, CompositeChecker, GateConfig,
    InputData, MakerChecker, MemoryAuditLog, NetworkSafetyChecker, RetryPolicy, RiskLevel,
    RuleBasedChecker,
};
use serde_json::json;

fn to_input(value: serde_json::Value) -> InputData {
    value.as_object().cloned().unwrap_or_default()
}

fn site_checker() -> RuleBasedChecker {
    RuleBasedChecker::new()
        .with_rule(required_fields(["site_id", "rollback_plan"]))
        .with_rule(valid_ip("target_ip"))
}

/// Simulates pushing a config to a device
fn push_config(plan: &InputData) -> Result<String, String> {
    let site = plan.get("site_id").and_then(|v| v.as_str()).unwrap_or("?");
    Ok(format!("config pushed to {}", site))
}

/// Example 1: A high-risk change is rejected until it carries a rollback plan
fn example_rollback_gate() {
    println!("\n=== Example 1: Rollback Gate ===");

    let audit = Arc::new(MemoryAuditLog::new());
    let gate = MakerChecker::builder(site_checker(), RiskLevel::High)
        .audit_sink(audit.clone())
        .operator_id("netops-bot")
        .build()
        .expect("gate config");

    let rejected = gate
        .execute(
            "push_config",
            &to_input(json!({"site_id": "abc", "target_ip": "192.168.1.1"})),
            push_config,
        )
        .expect("audit write");
    println!("✗ Rejected: {:?}", rejected.violation_messages());

    let accepted = gate
        .execute(
            "push_config",
            &to_input(json!({
                "site_id": "abc",
                "target_ip": "192.168.1.1",
                "rollback_plan": "revert to backup-2025-01-01"
            })),
            push_config,
        )
        .expect("audit write");
    println!(
        "✓ Accepted after {} attempt(s) in {}ms",
        accepted.iterations_required, accepted.execution_time_ms
    );

    for record in audit.records() {
        println!("  audit: {}", record.summary());
    }
}

/// Example 2: Transient failures are retried with backoff
fn example_retries() {
    println!("\n=== Example 2: Retries ===");

    let gate = MakerChecker::builder(RuleBasedChecker::new(), RiskLevel::Low)
        .retry_policy(RetryPolicy::new(3, Duration::from_millis(10)))
        .audit_sink(Arc::new(MemoryAuditLog::new()))
        .build()
        .expect("gate config");

    let mut calls = 0;
    let result = gate
        .execute("sync_vlans", &InputData::new(), |_| {
            calls += 1;
            if calls < 3 {
                Err(format!("controller timeout #{}", calls))
            } else {
                Ok(())
            }
        })
        .expect("audit write");
    println!(
        "✓ success={} after {} attempt(s)",
        result.success, result.iterations_required
    );
}

/// Example 3: Two gates share one breaker
fn example_shared_breaker() {
    println!("\n=== Example 3: Shared Circuit Breaker ===");

    let breaker = Arc::new(CircuitBreaker::new(3, Duration::from_secs(30)));
    let audit = Arc::new(MemoryAuditLog::new());
    let gate = |risk| {
        MakerChecker::builder(RuleBasedChecker::new(), risk)
            .retry_policy(RetryPolicy::none())
            .circuit_breaker(Arc::clone(&breaker))
            .audit_sink(audit.clone())
            .build()
            .expect("gate config")
    };
    let acl = gate(RiskLevel::Medium);
    let routes = gate(RiskLevel::Low);

    for _ in 0..3 {
        let _ = acl.execute("push_acl", &InputData::new(), |_| Err::<(), _>("controller 503"));
    }
    println!("  breaker after failures: {:?}", breaker.status().state);

    let result = routes
        .execute("push_routes", &InputData::new(), |_| Ok::<_, String>(()))
        .expect("audit write");
    println!("✗ push_routes: {}", result.error.unwrap_or_default());
}

/// Example 4: Config-driven gate with a network safety check and a file audit log
fn example_from_config() {
    println!("\n=== Example 4: Config and File Audit Log ===");

    let dir = tempfile::tempdir().expect("temp dir");
    let mut config = GateConfig::from_json_str(
        r#"{"failure_threshold": 2, "timeout": 5, "max_retries": 1, "backoff_base": 0.01, "operator_id": "change-bot"}"#,
    )
    .expect("valid config");
    config.audit_log_path = dir.path().join("audit.jsonl");

    let audit: Arc<AuditLog> = Arc::new(config.open_audit_log().expect("audit log"));
    let checker = CompositeChecker::new()
        .with_checker(site_checker())
        .with_checker(NetworkSafetyChecker::new());
    let gate = MakerChecker::builder(checker, RiskLevel::High)
        .config(&config)
        .circuit_breaker(Arc::new(config.circuit_breaker()))
        .audit_sink(audit.clone())
        .build()
        .expect("gate config");

    let result = gate
        .execute(
            "open_firewall",
            &to_input(json!({
                "site_id": "branch-7",
                "rollback_plan": "delete rule 10",
                "firewall_rules": [{"action": "allow", "source": "any", "port": "22", "protocol": "tcp"}]
            })),
            push_config,
        )
        .expect("audit write");
    for violation in &result.violations {
        println!("✗ {}", violation);
    }

    let lines = std::fs::read_to_string(audit.path()).unwrap_or_default();
    println!("  {}", lines.trim_end());
}

fn main() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              MakerChecker Gate Examples                    ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    example_rollback_gate();
    example_retries();
    example_shared_breaker();
    example_from_config();
}
