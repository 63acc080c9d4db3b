//! Variable system for kubesmith.
//!
//! This module provides the merge engine and helpers shared by the variable
//! store and the module catalog:
//!
//! - [`combine_variables`]: deterministic right-biased deep merge, the single
//!   primitive behind both read-side precedence chains and write-side patches
//! - [`parse_variable`]: render-at-merge-time template resolution for values
//!   entering the runtime scope
//! - typed accessors ([`string_var`], [`int_var`], ...) used by modules to
//!   validate their own arguments

pub mod source;
pub mod store;

use serde_json::Value;

use crate::error::{Error, Result};
use crate::template;

pub use crate::template::Vars;

/// Reserved variable and group names.
pub mod keys {
    /// The synthetic control-node host present in every inventory.
    pub const LOCALHOST: &str = "localhost";
    /// Implicit group containing every inventory host plus [`LOCALHOST`].
    pub const GROUP_ALL: &str = "all";
    /// Implicit group of hosts not reachable from any explicit group.
    pub const GROUP_UNGROUPED: &str = "ungrouped";
    /// Loop item injected into the runtime scope during task iteration.
    pub const ITEM: &str = "item";
    /// The hostname as written in the inventory.
    pub const INVENTORY_NAME: &str = "inventory_name";
    /// The host's actual hostname (from gathered facts when available).
    pub const HOSTNAME: &str = "hostname";
    /// Default IPv4 address of the control node.
    pub const INTERNAL_IPV4: &str = "internal_ipv4";
    /// Default IPv6 address of the control node.
    pub const INTERNAL_IPV6: &str = "internal_ipv6";
    /// Resolved per-host variable maps for every host, by hostname.
    pub const INVENTORY_HOSTS: &str = "inventory_hosts";
    /// Resolved group membership, by group name.
    pub const GROUPS: &str = "groups";
    /// Host-scoped connector configuration.
    pub const CONNECTOR: &str = "connector";
    /// Gathered facts from the live host.
    pub const OS: &str = "os";
    /// Hostname reported by gathered facts, under [`OS`].
    pub const OS_HOSTNAME: &str = "hostname";
}

/// Merge two variable maps, the right-hand side taking precedence.
///
/// For every key present in either map: when both values are objects the
/// merge recurses, otherwise the override's value wins — including explicit
/// nulls. Folding this left-to-right over an ordered list of scopes builds a
/// full precedence chain.
pub fn combine_variables(base: &Vars, overrides: &Vars) -> Vars {
    let mut merged = base.clone();
    for (key, value) in overrides {
        let combined = match merged.get(key) {
            Some(existing) => combine_value(existing, value),
            None => value.clone(),
        };
        merged.insert(key.clone(), combined);
    }
    merged
}

fn combine_value(base: &Value, overrides: &Value) -> Value {
    match (base, overrides) {
        (Value::Object(base), Value::Object(overrides)) => {
            Value::Object(combine_variables(base, overrides))
        }
        (_, overrides) => overrides.clone(),
    }
}

/// Recursively render every templated string inside a value.
///
/// Rendered strings that read `true`/`false` (case-insensitive) become
/// booleans so that conditions registered into the runtime scope stay
/// comparable. The resolver is supplied by the caller, which closes over the
/// rendering context.
pub fn parse_variable<F>(value: &mut Value, parse: &F) -> Result<()>
where
    F: Fn(&str) -> Result<String>,
{
    match value {
        Value::Object(map) => {
            for (_, v) in map.iter_mut() {
                parse_variable(v, parse)?;
            }
        }
        Value::Array(seq) => {
            for v in seq.iter_mut() {
                parse_variable(v, parse)?;
            }
        }
        Value::String(s) if template::is_template_syntax(s) => {
            let rendered = parse(s)?;
            *value = if rendered.eq_ignore_ascii_case("true") {
                Value::Bool(true)
            } else if rendered.eq_ignore_ascii_case("false") {
                Value::Bool(false)
            } else {
                Value::String(rendered)
            };
        }
        _ => {}
    }

    Ok(())
}

/// Expand a loop declaration into its item list.
///
/// A literal sequence iterates directly. A templated string is rendered and
/// decoded as a JSON array when possible, falling back to a single-element
/// list holding the rendered text. Any other scalar is a single item.
pub fn value_to_items(ctx: &Vars, value: &Value) -> Vec<Value> {
    match value {
        Value::Array(seq) => seq.clone(),
        Value::String(s) => {
            let rendered = match template::parse_string(ctx, s) {
                Ok(r) => r,
                Err(_) => return vec![Value::String(s.clone())],
            };
            if let Ok(Value::Array(seq)) = serde_json::from_str::<Value>(&rendered) {
                return seq;
            }
            vec![Value::String(rendered)]
        }
        other => vec![other.clone()],
    }
}

/// Get a templated string argument by key.
pub fn string_var(ctx: &Vars, args: &Vars, key: &str) -> Result<String> {
    let value = args
        .get(key)
        .ok_or_else(|| Error::Variable(format!("cannot find variable {key:?}")))?;
    let s = value
        .as_str()
        .ok_or_else(|| Error::Variable(format!("variable {key:?} is not a string")))?;
    template::parse_string(ctx, s)
}

/// Get a templated string-list argument by key.
///
/// Accepts a literal sequence of strings or a single string rendering to a
/// JSON array.
pub fn string_slice_var(ctx: &Vars, args: &Vars, key: &str) -> Result<Vec<String>> {
    let value = args
        .get(key)
        .ok_or_else(|| Error::Variable(format!("cannot find variable {key:?}")))?;
    match value {
        Value::Array(seq) => {
            let mut out = Vec::with_capacity(seq.len());
            for item in seq {
                let s = item
                    .as_str()
                    .ok_or_else(|| Error::Variable(format!("variable {key:?} is not a string list")))?;
                out.push(template::parse_string(ctx, s)?);
            }
            Ok(out)
        }
        Value::String(s) => {
            let rendered = template::parse_string(ctx, s)?;
            if let Ok(list) = serde_json::from_str::<Vec<String>>(&rendered) {
                return Ok(list);
            }
            Ok(vec![rendered])
        }
        _ => Err(Error::Variable(format!("unsupported variable {key:?} type"))),
    }
}

/// Get a templated integer argument by key.
pub fn int_var(ctx: &Vars, args: &Vars, key: &str) -> Result<i64> {
    let value = args
        .get(key)
        .ok_or_else(|| Error::Variable(format!("cannot find variable {key:?}")))?;
    match value {
        Value::Number(n) => n
            .as_i64()
            .ok_or_else(|| Error::Variable(format!("variable {key:?} is not an integer"))),
        Value::String(s) => {
            let rendered = template::parse_string(ctx, s)?;
            rendered
                .trim()
                .parse()
                .map_err(|_| Error::Variable(format!("variable {key:?} is not an integer")))
        }
        _ => Err(Error::Variable(format!("unsupported variable {key:?} type"))),
    }
}

/// Get a boolean argument by key, tolerating templated strings.
pub fn bool_var(ctx: &Vars, args: &Vars, key: &str) -> Result<bool> {
    let value = args
        .get(key)
        .ok_or_else(|| Error::Variable(format!("cannot find variable {key:?}")))?;
    match value {
        Value::Bool(b) => Ok(*b),
        Value::String(s) => {
            let rendered = template::parse_string(ctx, s)?;
            match rendered.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" => Ok(true),
                "false" | "no" => Ok(false),
                _ => Err(Error::Variable(format!("variable {key:?} is not a boolean"))),
            }
        }
        _ => Err(Error::Variable(format!("unsupported variable {key:?} type"))),
    }
}

/// Look up a dotted path (`a.b.c`) inside a variable map.
pub fn get_value<'a>(vars: &'a Vars, path: &str) -> Option<&'a Value> {
    let mut parts = path.split('.');
    let mut current = vars.get(parts.next()?)?;
    for part in parts {
        current = current.as_object()?.get(part)?;
    }
    Some(current)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn vars(value: serde_json::Value) -> Vars {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_combine_scalar_override() {
        let merged = combine_variables(&vars(json!({"k": "v1"})), &vars(json!({"k": "v2"})));
        assert_eq!(Value::Object(merged), json!({"k": "v2"}));
    }

    #[test]
    fn test_combine_disjoint_keys() {
        let merged = combine_variables(&vars(json!({"a": 1})), &vars(json!({"b": 2})));
        assert_eq!(Value::Object(merged), json!({"a": 1, "b": 2}));
    }

    #[test]
    fn test_combine_recursive_maps() {
        let merged = combine_variables(
            &vars(json!({"a": {"x": 1, "shared": "old"}})),
            &vars(json!({"a": {"y": 2, "shared": "new"}})),
        );
        assert_eq!(
            Value::Object(merged),
            json!({"a": {"x": 1, "y": 2, "shared": "new"}})
        );
    }

    #[test]
    fn test_combine_null_overrides() {
        let merged = combine_variables(&vars(json!({"k": "v"})), &vars(json!({"k": null})));
        assert_eq!(Value::Object(merged), json!({"k": null}));
    }

    #[test]
    fn test_combine_map_replaced_by_scalar() {
        let merged = combine_variables(&vars(json!({"k": {"a": 1}})), &vars(json!({"k": "flat"})));
        assert_eq!(Value::Object(merged), json!({"k": "flat"}));
    }

    #[test]
    fn test_parse_variable_renders_strings() {
        let ctx = vars(json!({"name": "node1"}));
        let mut value = json!({"greeting": "hello {{ name }}", "plain": "untouched"});
        parse_variable(&mut value, &|s| template::parse_string(&ctx, s)).unwrap();
        assert_eq!(value, json!({"greeting": "hello node1", "plain": "untouched"}));
    }

    #[test]
    fn test_parse_variable_boolean_coercion() {
        let ctx = vars(json!({"enabled": true}));
        let mut value = json!({"flag": "{{ enabled }}"});
        parse_variable(&mut value, &|s| template::parse_string(&ctx, s)).unwrap();
        assert_eq!(value, json!({"flag": true}));
    }

    #[test]
    fn test_value_to_items_literal_sequence() {
        let ctx = vars(json!({}));
        assert_eq!(
            value_to_items(&ctx, &json!(["a", "b"])),
            vec![json!("a"), json!("b")]
        );
    }

    #[test]
    fn test_value_to_items_templated_array() {
        let ctx = vars(json!({"nodes": ["n1", "n2"]}));
        assert_eq!(
            value_to_items(&ctx, &json!("{{ nodes | to_json }}")),
            vec![json!("n1"), json!("n2")]
        );
    }

    #[test]
    fn test_value_to_items_plain_string() {
        let ctx = vars(json!({}));
        assert_eq!(value_to_items(&ctx, &json!("solo")), vec![json!("solo")]);
    }

    #[test]
    fn test_string_var_templated() {
        let ctx = vars(json!({"name": "etcd"}));
        let args = vars(json!({"msg": "unit {{ name }}"}));
        assert_eq!(string_var(&ctx, &args, "msg").unwrap(), "unit etcd");
        assert!(string_var(&ctx, &args, "missing").is_err());
    }

    #[test]
    fn test_int_var_accepts_string() {
        let ctx = vars(json!({"replicas": 3}));
        let args = vars(json!({"count": "{{ replicas }}", "port": 6443}));
        assert_eq!(int_var(&ctx, &args, "count").unwrap(), 3);
        assert_eq!(int_var(&ctx, &args, "port").unwrap(), 6443);
    }

    #[test]
    fn test_get_value_dotted_path() {
        let v = vars(json!({"os": {"release": {"ID": "ubuntu"}}}));
        assert_eq!(get_value(&v, "os.release.ID"), Some(&json!("ubuntu")));
        assert_eq!(get_value(&v, "os.missing"), None);
    }
}
