// demos/network_safety_usage.rs
//
// Shows what the network safety checker flags
// Run with: cargo run --example network_safety_usage

use action_gate::{Checker, InputData, NetworkSafetyChecker, RiskLevel};
use serde_json::json;

fn report(title: &str, checker: &NetworkSafetyChecker, value: serde_json::Value) -> usize {
    let input: InputData = value.as_object().cloned().unwrap_or_default();
    let result = checker.validate(&input, RiskLevel::Medium);
    println!("\n--- {} ---", title);
    if result.passed {
        println!("✓ no issues");
    }
    for violation in &result.violations {
        println!("✗ [{}] {}", violation.rule_name, violation.message);
    }
    result.violations.len()
}

/// Example 1: Management ports exposed to the internet
fn example_dangerous_ports() -> usize {
    let checker = NetworkSafetyChecker::new();
    report(
        "Dangerous ports",
        &checker,
        json!({
            "firewall_rules": [
                {"action": "allow", "source": "0.0.0.0/0", "port": "20-25", "protocol": "tcp"},
                {"action": "allow", "source": "10.0.0.0/8", "port": 3389},
                {"action": "allow", "source": "any", "port": 443}
            ]
        }),
    )
}

/// Example 2: Private address on a WAN interface and an allow-all entry
fn example_interfaces_and_allow_all() -> usize {
    let checker = NetworkSafetyChecker::new();
    report(
        "Interfaces and allow-all",
        &checker,
        json!({
            "interfaces": [
                {"name": "wan0", "zone": "wan", "ip": "192.168.10.1"},
                {"name": "lan0", "zone": "lan", "ip": "192.168.20.1"}
            ],
            "firewall_rules": {"action": "permit", "source": "any", "destination": "any"}
        }),
    )
}

/// Example 3: Site policy adds its own dangerous ports
fn example_site_policy() -> usize {
    let checker = NetworkSafetyChecker::new().with_dangerous_ports([5900, 6379]);
    let ports: Vec<u16> = checker.dangerous_ports().collect();
    println!("\nDangerous ports: {:?}", ports);
    report(
        "Site policy",
        &checker,
        json!({"action": "allow", "source": "internet", "port": [6379, 8080]}),
    )
}

fn main() {
    println!("╔════════════════════════════════════════════════════════════╗");
    println!("║              Network Safety Checker Examples               ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    example_dangerous_ports();
    example_interfaces_and_allow_all();
    example_site_policy();
}
