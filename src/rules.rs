// Named validation rules over action input.
// Every rule is a pure function of (input, risk level) and carries a stable
// name so checkers can report, list and test rules individually.
//
// Format rules (ip, cidr, mac, list, length, number) only look at fields that
// are present and non-null. Presence is enforced by `required_fields`.

use std::fmt;
use std::net::Ipv4Addr;
use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;

use crate::types::{InputData, RiskLevel, Violation};

/// Default `targets` count above which explicit confirmation is needed
pub const DEFAULT_BULK_THRESHOLD: usize = 10;

static MAC_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?:[0-9A-Fa-f]{2}:){5}[0-9A-Fa-f]{2}$|^(?:[0-9A-Fa-f]{2}-){5}[0-9A-Fa-f]{2}$")
        .expect("static MAC pattern compiles")
});

/// Signature of caller-supplied rule bodies
pub type RuleFnBody = dyn Fn(&InputData, RiskLevel) -> Result<(), String> + Send + Sync;

/// Caller-supplied rule body
#[derive(Clone)]
pub struct RuleFn(Arc<RuleFnBody>);

impl fmt::Debug for RuleFn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("RuleFn(..)")
    }
}

/// What a rule checks
#[derive(Debug, Clone)]
pub enum RuleKind {
    /// Each listed field must be present and non-null
    RequiredFields(Vec<String>),
    /// A present string must not be blank
    NoEmptyStrings(String),
    ValidIp(String),
    ValidCidr(String),
    ValidMac(String),
    InList { field: String, allowed: Vec<Value> },
    MaxLength { field: String, max: usize },
    PositiveNumber(String),
    /// High/Critical actions must carry a non-blank `rollback_plan`
    RollbackRequired,
    /// More than `threshold` targets require `confirmed == true`
    BulkConfirmation { threshold: usize },
    Custom(RuleFn),
}

/// A named validation rule
#[derive(Debug, Clone)]
pub struct Rule {
    name: String,
    kind: RuleKind,
}

impl Rule {
    pub fn new(name: impl Into<String>, kind: RuleKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }

    /// Wrap a closure as a rule. `Err(message)` is reported as one violation.
    pub fn custom<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(&InputData, RiskLevel) -> Result<(), String> + Send + Sync + 'static,
    {
        Self::new(name, RuleKind::Custom(RuleFn(Arc::new(f))))
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> &RuleKind {
        &self.kind
    }

    /// Evaluate the rule, returning every violation it finds
    pub fn evaluate(&self, input: &InputData, risk_level: RiskLevel) -> Vec<Violation> {
        let name = self.name.as_str();
        match &self.kind {
            RuleKind::RequiredFields(fields) => fields
                .iter()
                .filter(|f| matches!(input.get(f.as_str()), None | Some(Value::Null)))
                .map(|f| Violation::for_field(name, f, format!("{}: missing", f)))
                .collect(),

            RuleKind::NoEmptyStrings(field) => check_present(input, field, |value| match value {
                Value::String(s) if s.trim().is_empty() => Err("must not be empty".to_string()),
                _ => Ok(()),
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::ValidIp(field) => check_present(input, field, |value| match value {
                Value::String(s) if parse_ipv4(s).is_some() => Ok(()),
                other => Err(format!("invalid IPv4 address {}", other)),
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::ValidCidr(field) => check_present(input, field, |value| match value {
                Value::String(s) if parse_cidr(s).is_some() => Ok(()),
                other => Err(format!("invalid CIDR {}", other)),
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::ValidMac(field) => check_present(input, field, |value| match value {
                Value::String(s) if MAC_RE.is_match(s) => Ok(()),
                other => Err(format!("invalid MAC address {}", other)),
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::InList { field, allowed } => check_present(input, field, |value| {
                if allowed.contains(value) {
                    Ok(())
                } else {
                    Err(format!("{} not in allowed values {}", value, Value::from(allowed.clone())))
                }
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::MaxLength { field, max } => check_present(input, field, |value| {
                let len = match value {
                    Value::String(s) => s.chars().count(),
                    Value::Array(items) => items.len(),
                    _ => return Err("must be a string or array".to_string()),
                };
                if len > *max {
                    Err(format!("length {} exceeds maximum {}", len, max))
                } else {
                    Ok(())
                }
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::PositiveNumber(field) => check_present(input, field, |value| {
                let number = match value {
                    Value::Number(n) => n.as_f64(),
                    Value::String(s) => s.trim().parse::<f64>().ok(),
                    _ => None,
                };
                match number {
                    Some(n) if n.is_finite() && n > 0.0 => Ok(()),
                    _ => Err("must be a positive number".to_string()),
                }
            })
            .map(|msg| Violation::for_field(name, field, msg))
            .into_iter()
            .collect(),

            RuleKind::RollbackRequired => {
                if risk_level.requires_rollback() && is_blank(input.get("rollback_plan")) {
                    vec![Violation::for_field(
                        name,
                        "rollback_plan",
                        format!("rollback_plan: required for {} risk actions", risk_level),
                    )]
                } else {
                    Vec::new()
                }
            }

            RuleKind::BulkConfirmation { threshold } => {
                let count = target_count(input);
                let confirmed = matches!(input.get("confirmed"), Some(Value::Bool(true)));
                if count > *threshold && !confirmed {
                    vec![Violation::for_field(
                        name,
                        "targets",
                        format!(
                            "targets: {} targets exceed bulk threshold of {}, set confirmed=true",
                            count, threshold
                        ),
                    )]
                } else {
                    Vec::new()
                }
            }

            RuleKind::Custom(RuleFn(f)) => match f(input, risk_level) {
                Ok(()) => Vec::new(),
                Err(message) => vec![Violation::new(name, message)],
            },
        }
    }
}

/// Every listed field must be present and non-null
pub fn required_fields<I, S>(fields: I) -> Rule
where
    I: IntoIterator<Item = S>,
    S: Into<String>,
{
    Rule::new(
        "required_fields",
        RuleKind::RequiredFields(fields.into_iter().map(Into::into).collect()),
    )
}

pub fn no_empty_strings(field: impl Into<String>) -> Rule {
    Rule::new("no_empty_strings", RuleKind::NoEmptyStrings(field.into()))
}

pub fn valid_ip(field: impl Into<String>) -> Rule {
    Rule::new("valid_ip", RuleKind::ValidIp(field.into()))
}

pub fn valid_cidr(field: impl Into<String>) -> Rule {
    Rule::new("valid_cidr", RuleKind::ValidCidr(field.into()))
}

pub fn valid_mac(field: impl Into<String>) -> Rule {
    Rule::new("valid_mac", RuleKind::ValidMac(field.into()))
}

pub fn in_list<I, V>(field: impl Into<String>, allowed: I) -> Rule
where
    I: IntoIterator<Item = V>,
    V: Into<Value>,
{
    Rule::new(
        "in_list",
        RuleKind::InList {
            field: field.into(),
            allowed: allowed.into_iter().map(Into::into).collect(),
        },
    )
}

pub fn max_length(field: impl Into<String>, max: usize) -> Rule {
    Rule::new(
        "max_length",
        RuleKind::MaxLength {
            field: field.into(),
            max,
        },
    )
}

pub fn positive_number(field: impl Into<String>) -> Rule {
    Rule::new("positive_number", RuleKind::PositiveNumber(field.into()))
}

pub fn rollback_required() -> Rule {
    Rule::new("rollback_required", RuleKind::RollbackRequired)
}

pub fn bulk_confirmation(threshold: usize) -> Rule {
    Rule::new("bulk_confirmation", RuleKind::BulkConfirmation { threshold })
}

// ================================================================================================
// HELPERS
// ================================================================================================

/// Runs `check` on a present, non-null field and prefixes its error with the
/// field name
fn check_present<F>(input: &InputData, field: &str, check: F) -> Option<String>
where
    F: FnOnce(&Value) -> Result<(), String>,
{
    match input.get(field) {
        None | Some(Value::Null) => None,
        Some(value) => check(value).err().map(|msg| format!("{}: {}", field, msg)),
    }
}

fn is_blank(value: Option<&Value>) -> bool {
    match value {
        None | Some(Value::Null) => true,
        Some(Value::String(s)) => s.trim().is_empty(),
        Some(Value::Array(items)) => items.is_empty(),
        Some(Value::Object(map)) => map.is_empty(),
        Some(_) => false,
    }
}

pub(crate) fn target_count(input: &InputData) -> usize {
    match input.get("targets") {
        Some(Value::Array(items)) => items.len(),
        _ => 0,
    }
}

/// Strict dotted-quad IPv4 parse
pub(crate) fn parse_ipv4(s: &str) -> Option<Ipv4Addr> {
    let octets: Vec<&str> = s.split('.').collect();
    if octets.len() != 4 {
        return None;
    }
    let mut bytes = [0u8; 4];
    for (slot, octet) in bytes.iter_mut().zip(&octets) {
        if octet.is_empty() || octet.len() > 3 || !octet.bytes().all(|b| b.is_ascii_digit()) {
            return None;
        }
        *slot = octet.parse::<u8>().ok()?;
    }
    Some(Ipv4Addr::from(bytes))
}

/// `a.b.c.d/prefix` with prefix 0-32
pub(crate) fn parse_cidr(s: &str) -> Option<(Ipv4Addr, u8)> {
    let (addr, prefix) = s.split_once('/')?;
    if prefix.is_empty() || prefix.len() > 2 || !prefix.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let prefix = prefix.parse::<u8>().ok()?;
    if prefix > 32 {
        return None;
    }
    Some((parse_ipv4(addr)?, prefix))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn input(value: Value) -> InputData {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_required_fields_one_violation_per_missing_field() {
        let rule = required_fields(["site_id", "rollback_plan", "device"]);
        let data = input(json!({"site_id": "abc", "device": null}));

        let violations = rule.evaluate(&data, RiskLevel::Low);
        let messages: Vec<_> = violations.iter().map(|v| v.message.as_str()).collect();
        assert_eq!(messages, vec!["rollback_plan: missing", "device: missing"]);
        assert!(violations.iter().all(|v| v.rule_name == "required_fields"));
    }

    #[test]
    fn test_valid_ip() {
        let rule = valid_ip("target_ip");
        assert!(rule
            .evaluate(&input(json!({"target_ip": "192.168.1.1"})), RiskLevel::Low)
            .is_empty());
        for bad in ["192.168.1.256", "10.0.0", "not-an-ip", "1.2.3.4.5", "1..2.3"] {
            let violations = rule.evaluate(&input(json!({"target_ip": bad})), RiskLevel::Low);
            assert_eq!(violations.len(), 1, "{} should fail", bad);
        }
        assert_eq!(
            rule.evaluate(&input(json!({"target_ip": 42})), RiskLevel::Low).len(),
            1
        );
        // absent fields are left to required_fields
        assert!(rule.evaluate(&input(json!({})), RiskLevel::Low).is_empty());
    }

    #[test]
    fn test_valid_cidr() {
        let rule = valid_cidr("subnet");
        assert!(rule
            .evaluate(&input(json!({"subnet": "10.0.0.0/24"})), RiskLevel::Low)
            .is_empty());
        assert!(rule
            .evaluate(&input(json!({"subnet": "0.0.0.0/0"})), RiskLevel::Low)
            .is_empty());
        for bad in ["10.0.0.0/33", "10.0.0.0", "10.0.0.0/", "10.0.0/24", "10.0.0.0/+8"] {
            assert_eq!(
                rule.evaluate(&input(json!({"subnet": bad})), RiskLevel::Low).len(),
                1,
                "{} should fail",
                bad
            );
        }
    }

    #[test]
    fn test_valid_mac() {
        let rule = valid_mac("mac");
        for good in ["00:1A:2b:3C:4d:5E", "00-1a-2b-3c-4d-5e"] {
            assert!(rule.evaluate(&input(json!({"mac": good})), RiskLevel::Low).is_empty());
        }
        for bad in ["00:1A:2B:3C:4D", "00:1A:2B-3C:4D:5E", "zz:1A:2B:3C:4D:5E"] {
            assert_eq!(rule.evaluate(&input(json!({"mac": bad})), RiskLevel::Low).len(), 1);
        }
    }

    #[test]
    fn test_in_list_max_length_positive_number() {
        let data = input(json!({
            "vendor": "juniper",
            "hostname": "core-router-01-primary",
            "vlan": 0,
            "mtu": "1500"
        }));

        let vendor = in_list("vendor", ["cisco", "arista"]);
        assert_eq!(vendor.evaluate(&data, RiskLevel::Low).len(), 1);
        let vendor = in_list("vendor", ["cisco", "juniper"]);
        assert!(vendor.evaluate(&data, RiskLevel::Low).is_empty());

        assert_eq!(max_length("hostname", 10).evaluate(&data, RiskLevel::Low).len(), 1);
        assert!(max_length("hostname", 64).evaluate(&data, RiskLevel::Low).is_empty());

        assert_eq!(positive_number("vlan").evaluate(&data, RiskLevel::Low).len(), 1);
        assert!(positive_number("mtu").evaluate(&data, RiskLevel::Low).is_empty());
    }

    #[test]
    fn test_no_empty_strings() {
        let rule = no_empty_strings("description");
        let violations = rule.evaluate(&input(json!({"description": "  "})), RiskLevel::Low);
        assert_eq!(violations[0].message, "description: must not be empty");
        assert!(rule
            .evaluate(&input(json!({"description": "uplink"})), RiskLevel::Low)
            .is_empty());
    }

    #[test]
    fn test_rollback_required_binds_only_at_high_and_critical() {
        let rule = rollback_required();
        let missing = input(json!({"site_id": "abc"}));
        let empty = input(json!({"site_id": "abc", "rollback_plan": ""}));
        let present = input(json!({"rollback_plan": "revert to backup-2025-01-01"}));

        for level in RiskLevel::all() {
            let expected = if level.requires_rollback() { 1 } else { 0 };
            assert_eq!(rule.evaluate(&missing, level).len(), expected, "{}", level);
            assert_eq!(rule.evaluate(&empty, level).len(), expected, "{}", level);
            assert!(rule.evaluate(&present, level).is_empty());
        }
    }

    #[test]
    fn test_bulk_confirmation_boundary() {
        let rule = bulk_confirmation(10);
        let targets = |n: usize| Value::from((0..n).map(|i| format!("sw-{}", i)).collect::<Vec<_>>());

        let eleven = input(json!({"targets": targets(11)}));
        assert_eq!(rule.evaluate(&eleven, RiskLevel::Low).len(), 1);

        let confirmed = input(json!({"targets": targets(11), "confirmed": true}));
        assert!(rule.evaluate(&confirmed, RiskLevel::Low).is_empty());

        let truthy_string = input(json!({"targets": targets(11), "confirmed": "true"}));
        assert_eq!(rule.evaluate(&truthy_string, RiskLevel::Low).len(), 1);

        let ten = input(json!({"targets": targets(10)}));
        assert!(rule.evaluate(&ten, RiskLevel::Low).is_empty());
    }

    #[test]
    fn test_custom_rule_keeps_name() {
        let rule = Rule::custom("change_window", |data, _| match data.get("window") {
            Some(Value::String(w)) if w == "maintenance" => Ok(()),
            _ => Err("window: outside maintenance window".to_string()),
        });
        assert_eq!(rule.name(), "change_window");
        let violations = rule.evaluate(&input(json!({"window": "business"})), RiskLevel::Low);
        assert_eq!(violations[0].rule_name, "change_window");
        assert!(matches!(rule.kind(), RuleKind::Custom(_)));
    }
}
