//! # Network Safety Checker
//!
//! Rule-free inspector for network anti-patterns in a proposed change:
//! - dangerous management/file-sharing ports allowed from a public source
//! - RFC1918 addresses configured on a public-facing interface
//! - unconditional allow-all firewall entries
//!
//! Firewall entries are read from `firewall_rules` (array of objects). When
//! that field is absent and the input itself has an `action`, the input is
//! inspected as a single entry. Interfaces are read from
//! `interfaces`. Malformed entries are skipped, never reported as errors.

use std::collections::BTreeSet;
use std::net::Ipv4Addr;

use log::debug;
use serde_json::{Map, Value};

use crate::checker::Checker;
use crate::rules::{parse_cidr, parse_ipv4};
use crate::types::{InputData, RiskLevel, ValidationResult, Violation};

/// Ports that must never be reachable from a public scope
pub const DANGEROUS_PORTS: [u16; 6] = [22, 23, 3389, 445, 135, 139];

const ANY_KEYWORDS: [&str; 6] = ["any", "*", "all", "0.0.0.0/0", "::/0", "0.0.0.0"];
const PUBLIC_KEYWORDS: [&str; 3] = ["internet", "public", "external"];
const PUBLIC_ZONES: [&str; 5] = ["public", "wan", "external", "internet", "outside"];
const PERMISSIVE_ACTIONS: [&str; 4] = ["allow", "permit", "accept", "pass"];

/// Blocks that are never reachable from the internet. Multicast, reserved
/// and broadcast are merged into 224/3.
const NON_GLOBAL_BLOCKS: [(Ipv4Addr, u8); 11] = [
    (Ipv4Addr::new(0, 0, 0, 0), 8),
    (Ipv4Addr::new(10, 0, 0, 0), 8),
    (Ipv4Addr::new(100, 64, 0, 0), 10),
    (Ipv4Addr::new(127, 0, 0, 0), 8),
    (Ipv4Addr::new(169, 254, 0, 0), 16),
    (Ipv4Addr::new(172, 16, 0, 0), 12),
    (Ipv4Addr::new(192, 0, 2, 0), 24),
    (Ipv4Addr::new(192, 168, 0, 0), 16),
    (Ipv4Addr::new(198, 51, 100, 0), 24),
    (Ipv4Addr::new(203, 0, 113, 0), 24),
    (Ipv4Addr::new(224, 0, 0, 0), 3),
];

/// Ports an entry applies to. Inclusive ranges.
#[derive(Debug, Clone, PartialEq, Eq)]
enum PortSpec {
    Any,
    Ranges(Vec<(u16, u16)>),
}

impl PortSpec {
    fn contains(&self, port: u16) -> bool {
        match self {
            PortSpec::Any => true,
            PortSpec::Ranges(ranges) => ranges.iter().any(|(lo, hi)| port >= *lo && port <= *hi),
        }
    }

    fn from_value(value: Option<&Value>) -> PortSpec {
        let mut ranges = Vec::new();
        match value {
            None | Some(Value::Null) => return PortSpec::Any,
            Some(Value::Number(n)) => {
                if let Some(p) = n.as_u64().and_then(|p| u16::try_from(p).ok()) {
                    ranges.push((p, p));
                }
            }
            Some(Value::String(s)) => {
                for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
                    if is_any_keyword(part) {
                        return PortSpec::Any;
                    }
                    if let Some(range) = parse_port_range(part) {
                        ranges.push(range);
                    }
                }
            }
            Some(Value::Array(items)) => {
                for item in items {
                    match PortSpec::from_value(Some(item)) {
                        PortSpec::Any => return PortSpec::Any,
                        PortSpec::Ranges(r) => ranges.extend(r),
                    }
                }
            }
            Some(_) => {}
        }
        PortSpec::Ranges(ranges)
    }
}

fn parse_port_range(s: &str) -> Option<(u16, u16)> {
    match s.split_once('-') {
        Some((lo, hi)) => {
            let lo = lo.trim().parse::<u16>().ok()?;
            let hi = hi.trim().parse::<u16>().ok()?;
            (lo <= hi).then_some((lo, hi))
        }
        None => s.parse::<u16>().ok().map(|p| (p, p)),
    }
}

/// Detects network exposure anti-patterns. Stateless.
#[derive(Debug, Clone)]
pub struct NetworkSafetyChecker {
    dangerous_ports: BTreeSet<u16>,
}

impl NetworkSafetyChecker {
    pub fn new() -> Self {
        Self {
            dangerous_ports: DANGEROUS_PORTS.into_iter().collect(),
        }
    }

    /// Extend the dangerous port set for site policy. The built-in ports are
    /// always kept.
    pub fn with_dangerous_ports<I: IntoIterator<Item = u16>>(mut self, ports: I) -> Self {
        self.dangerous_ports.extend(ports);
        self
    }

    pub fn dangerous_ports(&self) -> impl Iterator<Item = u16> + '_ {
        self.dangerous_ports.iter().copied()
    }

    fn check_firewall_entry(&self, label: &str, entry: &Map<String, Value>, out: &mut Vec<Violation>) {
        if !is_permissive(entry.get("action")) {
            return;
        }

        let ports = PortSpec::from_value(
            entry
                .get("port")
                .or_else(|| entry.get("ports"))
                .or_else(|| entry.get("dst_port")),
        );

        if is_any(entry.get("source"))
            && is_any(entry.get("destination"))
            && ports == PortSpec::Any
            && is_any(entry.get("protocol"))
        {
            out.push(Violation::new(
                "allow_all_rule",
                format!("{}: unconditional allow-all entry", label),
            ));
            return;
        }

        if !is_public_source(entry.get("source")) {
            return;
        }
        let source = describe(entry.get("source"));
        for port in self.dangerous_ports.iter().copied().filter(|p| ports.contains(*p)) {
            out.push(Violation::for_field(
                "dangerous_port_exposure",
                "firewall_rules",
                format!(
                    "{}: port {} ({}) exposed to public source {}",
                    label,
                    port,
                    port_name(port),
                    source
                ),
            ));
        }
    }

    fn check_interface(&self, label: &str, iface: &Map<String, Value>, out: &mut Vec<Violation>) {
        if !is_public_facing(iface) {
            return;
        }
        for key in ["ip", "address", "cidr"] {
            let Some(Value::String(raw)) = iface.get(key) else {
                continue;
            };
            let addr = parse_ipv4(raw).or_else(|| parse_cidr(raw).map(|(addr, _)| addr));
            if addr.is_some_and(|a| a.is_private()) {
                let name = iface
                    .get("name")
                    .and_then(Value::as_str)
                    .map(|n| format!(" ({})", n))
                    .unwrap_or_default();
                out.push(Violation::for_field(
                    "private_address_on_public_interface",
                    "interfaces",
                    format!(
                        "{}{}: private address {} on public-facing interface",
                        label, name, raw
                    ),
                ));
            }
        }
    }
}

impl Default for NetworkSafetyChecker {
    fn default() -> Self {
        Self::new()
    }
}

impl Checker for NetworkSafetyChecker {
    fn validate(&self, input: &InputData, _risk_level: RiskLevel) -> ValidationResult {
        let mut violations = Vec::new();

        match input.get("firewall_rules") {
            Some(Value::Array(entries)) => {
                for (i, entry) in entries.iter().enumerate() {
                    if let Value::Object(entry) = entry {
                        self.check_firewall_entry(&format!("firewall_rules[{}]", i), entry, &mut violations);
                    }
                }
            }
            Some(Value::Object(entry)) => {
                self.check_firewall_entry("firewall_rules", entry, &mut violations);
            }
            Some(_) => {}
            None => {
                if input.contains_key("action") {
                    self.check_firewall_entry("input", input, &mut violations);
                }
            }
        }

        if let Some(Value::Array(interfaces)) = input.get("interfaces") {
            for (i, iface) in interfaces.iter().enumerate() {
                if let Value::Object(iface) = iface {
                    self.check_interface(&format!("interfaces[{}]", i), iface, &mut violations);
                }
            }
        }

        if !violations.is_empty() {
            debug!("network safety found {} issue(s)", violations.len());
        }
        ValidationResult::from_violations(violations)
    }

    fn name(&self) -> &str {
        "network_safety"
    }
}

// ================================================================================================
// SCOPE CLASSIFICATION
// ================================================================================================

fn is_any_keyword(s: &str) -> bool {
    let s = s.trim().to_ascii_lowercase();
    ANY_KEYWORDS.contains(&s.as_str())
}

/// Unrestricted match: absent, null, or an "any" keyword
fn is_any(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => is_any_keyword(s),
        Some(Value::Array(items)) => items.iter().any(|v| is_any(Some(v))),
        Some(_) => false,
    }
}

fn is_permissive(action: Option<&Value>) -> bool {
    match action {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => PERMISSIVE_ACTIONS.contains(&s.trim().to_ascii_lowercase().as_str()),
        Some(_) => false,
    }
}

/// Source reachable from the internet: "any", a public keyword, or a
/// globally routable address/network
fn is_public_source(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => {
            let s = s.trim();
            if is_any_keyword(s) || PUBLIC_KEYWORDS.contains(&s.to_ascii_lowercase().as_str()) {
                return true;
            }
            if let Some(addr) = parse_ipv4(s) {
                return is_global(addr, 32);
            }
            match parse_cidr(s) {
                Some((addr, prefix)) => is_global(addr, prefix),
                None => false,
            }
        }
        Some(Value::Array(items)) => items.iter().any(|v| is_public_source(Some(v))),
        Some(_) => false,
    }
}

/// True unless the whole `addr/prefix` range sits inside one non-global block
fn is_global(addr: Ipv4Addr, prefix: u8) -> bool {
    let network = u32::from(addr) & prefix_mask(prefix);
    !NON_GLOBAL_BLOCKS.iter().any(|(block, len)| {
        prefix >= *len && network & prefix_mask(*len) == u32::from(*block)
    })
}

fn prefix_mask(prefix: u8) -> u32 {
    match prefix {
        0 => 0,
        p => u32::MAX << (32 - u32::from(p.min(32))),
    }
}

fn is_public_facing(iface: &Map<String, Value>) -> bool {
    if matches!(iface.get("public"), Some(Value::Bool(true))) {
        return true;
    }
    ["zone", "role", "type"].iter().any(|key| {
        iface
            .get(*key)
            .and_then(Value::as_str)
            .map(|z| PUBLIC_ZONES.contains(&z.trim().to_ascii_lowercase().as_str()))
            .unwrap_or(false)
    })
}

fn describe(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => "any".to_string(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

fn port_name(port: u16) -> &'static str {
    match port {
        22 => "ssh",
        23 => "telnet",
        135 => "msrpc",
        139 => "netbios-ssn",
        445 => "smb",
        3389 => "rdp",
        _ => "restricted",
    }
}
