//! Custom filter library for the template environment.
//!
//! These filters cover the needs of cluster playbooks: structural conversion
//! between JSON/YAML and template values, CIDR and IP-family helpers, semver
//! comparison, regex matching, numeric power and list difference. minijinja's
//! builtin string filters cover the rest.

use minijinja::value::{Value, ValueKind};
use minijinja::{Environment, Error as TemplateError, ErrorKind};
use std::net::{IpAddr, Ipv4Addr};

/// Upper bound on the number of addresses a single `ip_range` expansion may
/// produce. Wider CIDRs are almost certainly a playbook mistake.
const MAX_IP_RANGE: usize = 65_536;

/// Register all kubesmith filters on the environment.
pub fn register(env: &mut Environment<'_>) {
    env.add_filter("defined", defined);
    env.add_filter("version", version);
    env.add_filter("pow", pow);
    env.add_filter("match", regex_match);
    env.add_filter("to_json", to_json);
    env.add_filter("from_json", from_json);
    env.add_filter("to_yaml", to_yaml);
    env.add_filter("from_yaml", from_yaml);
    env.add_filter("difference", difference);
    env.add_filter("ip_range", ip_range);
    env.add_filter("ip_family", ip_family);
}

fn invalid(msg: impl Into<String>) -> TemplateError {
    TemplateError::new(ErrorKind::InvalidOperation, msg.into())
}

/// `{{ foo | defined }}` — whether the value is present and non-null.
fn defined(value: Value) -> bool {
    !value.is_undefined() && !value.is_none()
}

/// `{{ kube_version | version('>=1.24.0') }}` — semantic version comparison.
///
/// The requirement is an operator (`>=`, `<=`, `==`, `>`, `<`) followed by a
/// version. Both sides tolerate a leading `v` and missing minor/patch parts.
fn version(value: String, requirement: String) -> Result<bool, TemplateError> {
    let lhs = parse_version(&value)?;
    let requirement = requirement.trim();

    let (op, rhs) = if let Some(rest) = requirement.strip_prefix(">=") {
        (">=", rest)
    } else if let Some(rest) = requirement.strip_prefix("<=") {
        ("<=", rest)
    } else if let Some(rest) = requirement.strip_prefix("==") {
        ("==", rest)
    } else if let Some(rest) = requirement.strip_prefix('>') {
        (">", rest)
    } else if let Some(rest) = requirement.strip_prefix('<') {
        ("<", rest)
    } else {
        return Err(invalid(format!(
            "version requirement {requirement:?} must start with an operator"
        )));
    };
    let rhs = parse_version(rhs)?;

    Ok(match op {
        ">=" => lhs >= rhs,
        "<=" => lhs <= rhs,
        "==" => lhs == rhs,
        ">" => lhs > rhs,
        _ => lhs < rhs,
    })
}

/// Parse a loosely-formatted version (`v1.28`, `1.28.2-rc.1`) into semver.
fn parse_version(s: &str) -> Result<semver::Version, TemplateError> {
    let s = s.trim().trim_start_matches(['v', 'V']);
    if let Ok(v) = semver::Version::parse(s) {
        return Ok(v);
    }
    // Pad missing minor/patch components.
    let core = s.split(['-', '+']).next().unwrap_or(s);
    let mut parts: Vec<&str> = core.split('.').collect();
    while parts.len() < 3 {
        parts.push("0");
    }
    semver::Version::parse(&parts.join("."))
        .map_err(|e| invalid(format!("cannot parse version {s:?}: {e}")))
}

/// `{{ 2 | pow(10) }}` — numeric power.
fn pow(base: f64, exp: f64) -> f64 {
    base.powf(exp)
}

/// `{{ arch | match('^(amd64|arm64)$') }}` — regex match against the value.
fn regex_match(value: String, pattern: String) -> Result<bool, TemplateError> {
    let re = regex::Regex::new(&pattern)
        .map_err(|e| invalid(format!("invalid pattern {pattern:?}: {e}")))?;
    Ok(re.is_match(&value))
}

/// `{{ spec | to_json }}` — serialize a value to JSON text.
///
/// With an argument, pretty-prints and prefixes every line with that many
/// spaces (for embedding in indented YAML manifests).
fn to_json(value: Value, indent: Option<usize>) -> Result<String, TemplateError> {
    let json = serde_json::to_value(&value)
        .map_err(|e| invalid(format!("cannot serialize to json: {e}")))?;
    match indent {
        None => serde_json::to_string(&json).map_err(|e| invalid(e.to_string())),
        Some(n) => {
            let pretty =
                serde_json::to_string_pretty(&json).map_err(|e| invalid(e.to_string()))?;
            Ok(indent_lines(n, &pretty))
        }
    }
}

/// `{{ output.stdout | from_json }}` — parse JSON text into a value.
fn from_json(value: String) -> Result<Value, TemplateError> {
    let parsed: serde_json::Value = serde_json::from_str(&value)
        .map_err(|e| invalid(format!("cannot parse json: {e}")))?;
    Ok(Value::from_serialize(&parsed))
}

/// `{{ spec | to_yaml(2) }}` — serialize a value to YAML text.
///
/// Empty mappings serialize to none so that optional sections can be elided
/// from generated manifests.
fn to_yaml(value: Value, indent: Option<usize>) -> Result<Value, TemplateError> {
    if value.is_none() || value.is_undefined() {
        return Ok(Value::from(()));
    }
    let json = serde_json::to_value(&value)
        .map_err(|e| invalid(format!("cannot serialize to yaml: {e}")))?;
    let text = serde_yaml::to_string(&json).map_err(|e| invalid(e.to_string()))?;
    let text = text.trim_end();
    if text == "{}" {
        return Ok(Value::from(()));
    }
    Ok(Value::from(match indent {
        None => text.to_string(),
        Some(n) => indent_lines(n, text),
    }))
}

/// `{{ manifest | from_yaml }}` — parse YAML text into a value.
fn from_yaml(value: String) -> Result<Value, TemplateError> {
    let parsed: serde_json::Value = serde_yaml::from_str(&value)
        .map_err(|e| invalid(format!("cannot parse yaml: {e}")))?;
    Ok(Value::from_serialize(&parsed))
}

/// `{{ all_nodes | difference(done_nodes) }}` — items of the input sequence
/// that do not appear in the argument sequence, input order preserved.
fn difference(value: Vec<Value>, other: Vec<Value>) -> Vec<Value> {
    value.into_iter().filter(|v| !other.contains(v)).collect()
}

/// `{{ '10.233.0.0/18' | ip_range }}` — expand a comma-separated list of
/// addresses, `a-b` ranges and CIDR blocks into individual addresses.
///
/// An integer argument selects one address (negative indexes from the end),
/// a `"from:to"` string slices the list, no argument returns the whole list.
fn ip_range(value: String, param: Option<Value>) -> Result<Value, TemplateError> {
    let mut range = Vec::new();
    for part in value.split(',') {
        expand_ip_entry(part.trim(), &mut range)?;
    }
    if range.is_empty() {
        return Err(invalid(format!("ip_range {value:?} expands to nothing")));
    }

    match param {
        None => Ok(Value::from_serialize(&range)),
        Some(p) if p.kind() == ValueKind::Number => {
            let idx = i64::try_from(p.clone())
                .map_err(|_| invalid("ip_range index must be an integer"))?;
            Ok(Value::from(range[clamp_index(idx, range.len())].clone()))
        }
        Some(p) if p.kind() == ValueKind::String => {
            let spec = p.as_str().unwrap_or_default();
            let parts: Vec<&str> = spec.split(':').collect();
            match parts.as_slice() {
                [single] => {
                    let idx: i64 = single.trim().parse().map_err(|_| {
                        invalid(format!("ip_range index {single:?} is not a number"))
                    })?;
                    Ok(Value::from(range[clamp_index(idx, range.len())].clone()))
                }
                [from, to] => {
                    let from = from.trim().parse::<usize>().unwrap_or(0).min(range.len() - 1);
                    let to = if to.trim().is_empty() {
                        range.len() - 1
                    } else {
                        to.trim().parse::<usize>().unwrap_or(0)
                    };
                    let to = to.clamp(from, range.len() - 1);
                    Ok(Value::from_serialize(&range[from..to]))
                }
                _ => Err(invalid("ip_range slice must have the form 'from:to'")),
            }
        }
        Some(_) => Err(invalid("ip_range argument must be an index or a slice")),
    }
}

/// Clamp a possibly-negative index into `0..len`.
fn clamp_index(idx: i64, len: usize) -> usize {
    let idx = if idx < 0 { len as i64 + idx } else { idx };
    idx.clamp(0, len as i64 - 1) as usize
}

/// Expand one entry (`ip`, `a-b` range or CIDR) into the output list.
fn expand_ip_entry(entry: &str, out: &mut Vec<String>) -> Result<(), TemplateError> {
    if entry.is_empty() {
        return Ok(());
    }

    if let Some((base, prefix)) = entry.split_once('/') {
        let ip: Ipv4Addr = base
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid CIDR base address {base:?}")))?;
        let prefix: u32 = prefix
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid CIDR prefix {prefix:?}")))?;
        if prefix > 32 {
            return Err(invalid(format!("CIDR prefix /{prefix} out of range")));
        }
        let mask = if prefix == 0 { 0 } else { u32::MAX << (32 - prefix) };
        let network = u32::from(ip) & mask;
        let broadcast = network | !mask;
        // Host addresses only; /31 and /32 have no network/broadcast.
        let (first, last) = if prefix >= 31 {
            (network, broadcast)
        } else {
            (network + 1, broadcast - 1)
        };
        push_ip_span(first, last, out)?;
        return Ok(());
    }

    if let Some((from, to)) = entry.split_once('-') {
        let from: Ipv4Addr = from
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid range start {from:?}")))?;
        let to: Ipv4Addr = to
            .trim()
            .parse()
            .map_err(|_| invalid(format!("invalid range end {to:?}")))?;
        push_ip_span(u32::from(from), u32::from(to), out)?;
        return Ok(());
    }

    let ip: IpAddr = entry
        .parse()
        .map_err(|_| invalid(format!("invalid ip address {entry:?}")))?;
    out.push(ip.to_string());
    Ok(())
}

fn push_ip_span(first: u32, last: u32, out: &mut Vec<String>) -> Result<(), TemplateError> {
    if last < first {
        return Err(invalid("ip range end precedes start"));
    }
    if (last - first) as usize + out.len() >= MAX_IP_RANGE {
        return Err(invalid(format!("ip range expands past {MAX_IP_RANGE} addresses")));
    }
    for n in first..=last {
        out.push(Ipv4Addr::from(n).to_string());
    }
    Ok(())
}

/// `{{ address | ip_family }}` — `"ipv4"` or `"ipv6"`.
fn ip_family(value: String) -> Result<String, TemplateError> {
    match value.trim().parse::<IpAddr>() {
        Ok(IpAddr::V4(_)) => Ok("ipv4".to_string()),
        Ok(IpAddr::V6(_)) => Ok("ipv6".to_string()),
        Err(_) => Err(invalid(format!("{value:?} is not an ip address"))),
    }
}

/// Prefix every line with `n` spaces.
fn indent_lines(n: usize, text: &str) -> String {
    let pad = " ".repeat(n);
    text.lines()
        .map(|line| format!("{pad}{line}"))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::parse_string;
    use serde_json::json;

    fn ctx(value: serde_json::Value) -> crate::template::Vars {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_defined() {
        let vars = ctx(json!({"present": 1}));
        assert_eq!(parse_string(&vars, "{{ present | defined }}").unwrap(), "true");
        assert_eq!(parse_string(&vars, "{{ absent | defined }}").unwrap(), "false");
    }

    #[test]
    fn test_version_comparison() {
        let vars = ctx(json!({"kube_version": "v1.28.2"}));
        assert_eq!(
            parse_string(&vars, "{{ kube_version | version('>=1.24.0') }}").unwrap(),
            "true"
        );
        assert_eq!(
            parse_string(&vars, "{{ kube_version | version('<1.28') }}").unwrap(),
            "false"
        );
        assert_eq!(
            parse_string(&vars, "{{ kube_version | version('==1.28.2') }}").unwrap(),
            "true"
        );
    }

    #[test]
    fn test_pow() {
        let vars = ctx(json!({}));
        assert_eq!(parse_string(&vars, "{{ 2 | pow(10) }}").unwrap(), "1024.0");
    }

    #[test]
    fn test_match() {
        let vars = ctx(json!({"arch": "amd64"}));
        assert_eq!(
            parse_string(&vars, "{{ arch | match('^(amd64|arm64)$') }}").unwrap(),
            "true"
        );
        assert_eq!(parse_string(&vars, "{{ arch | match('^s390x$') }}").unwrap(), "false");
    }

    #[test]
    fn test_json_round_trip() {
        let vars = ctx(json!({"spec": {"replicas": 3}}));
        assert_eq!(
            parse_string(&vars, "{{ spec | to_json }}").unwrap(),
            r#"{"replicas":3}"#
        );
        assert_eq!(
            parse_string(&vars, "{{ '{\"a\": 1}' | from_json | to_json }}").unwrap(),
            r#"{"a":1}"#
        );
    }

    #[test]
    fn test_yaml_round_trip() {
        let vars = ctx(json!({"spec": {"name": "etcd"}}));
        assert_eq!(
            parse_string(&vars, "{{ spec | to_yaml }}").unwrap(),
            "name: etcd"
        );
        assert_eq!(
            parse_string(&vars, "{{ 'name: etcd' | from_yaml | to_json }}").unwrap(),
            r#"{"name":"etcd"}"#
        );
    }

    #[test]
    fn test_difference() {
        let vars = ctx(json!({"all": ["n1", "n2", "n3"], "done": ["n2"]}));
        assert_eq!(
            parse_string(&vars, "{{ all | difference(done) | to_json }}").unwrap(),
            r#"["n1","n3"]"#
        );
    }

    #[test]
    fn test_ip_range_cidr() {
        let vars = ctx(json!({}));
        assert_eq!(
            parse_string(&vars, "{{ '10.0.0.0/30' | ip_range | to_json }}").unwrap(),
            r#"["10.0.0.1","10.0.0.2"]"#
        );
    }

    #[test]
    fn test_ip_range_span_and_index() {
        let vars = ctx(json!({}));
        assert_eq!(
            parse_string(&vars, "{{ '10.0.0.1-10.0.0.3' | ip_range(0) }}").unwrap(),
            "10.0.0.1"
        );
        assert_eq!(
            parse_string(&vars, "{{ '10.0.0.1-10.0.0.3' | ip_range(-1) }}").unwrap(),
            "10.0.0.3"
        );
    }

    #[test]
    fn test_ip_family() {
        let vars = ctx(json!({}));
        assert_eq!(parse_string(&vars, "{{ '192.168.0.1' | ip_family }}").unwrap(), "ipv4");
        assert_eq!(parse_string(&vars, "{{ 'fd00::1' | ip_family }}").unwrap(), "ipv6");
    }
}
