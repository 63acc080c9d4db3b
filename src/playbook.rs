//! Playbook model and parsing.
//!
//! A playbook is a YAML sequence of plays; each play targets host patterns
//! and carries a tree of blocks. A block is either a grouping node
//! (`block`/`rescue`/`always`) or a leaf task whose module is detected from
//! its unrecognized keys. Batch helpers for `serial` and `run_once` live
//! here too.

use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::vars::Vars;

/// A declarative tree of tasks targeting a set of hosts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Playbook {
    /// The plays, executed in order.
    pub plays: Vec<Play>,
}

impl Playbook {
    /// Load a playbook from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::playbook_parse(path, e.to_string()))?;
        Self::from_yaml(&content).map_err(|e| Error::playbook_parse(path, e.to_string()))
    }

    /// Parse a playbook from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        let playbook: Playbook = serde_yaml::from_str(content)?;
        for play in &playbook.plays {
            if play.hosts.is_empty() {
                return Err(Error::PlaybookValidation(format!(
                    "play {:?} has no hosts",
                    play.name
                )));
            }
        }
        Ok(playbook)
    }
}

/// One play: host patterns plus a task tree and play-level settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Play {
    /// Play name for logs.
    #[serde(default)]
    pub name: String,

    /// Host or group patterns this play targets.
    #[serde(default, deserialize_with = "one_or_many")]
    pub hosts: Vec<String>,

    /// Gather facts from each host before the first task.
    #[serde(default)]
    pub gather_facts: bool,

    /// Collapse the batch to a single host.
    #[serde(default)]
    pub run_once: bool,

    /// Serial batching: a count, a percentage string, or a list of either.
    #[serde(default)]
    pub serial: Option<Value>,

    /// Play-level variables, merged into the batch before its tasks run.
    #[serde(default)]
    pub vars: Vars,

    /// The task tree.
    #[serde(default)]
    pub tasks: Vec<Block>,
}

/// A node in the task tree: a grouping block or a leaf task.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Block {
    /// Node name for logs.
    #[serde(default)]
    pub name: String,

    /// Gating conditions, inherited downwards.
    #[serde(default, deserialize_with = "one_or_many")]
    pub when: Vec<String>,

    /// Conditions marking a host failed before dispatch (leaf tasks only).
    #[serde(default, deserialize_with = "one_or_many")]
    pub failed_when: Vec<String>,

    /// Loop declaration (leaf tasks only).
    #[serde(default, rename = "loop")]
    pub loop_: Option<Value>,

    /// Runtime variable receiving the result (leaf tasks only).
    #[serde(default)]
    pub register: Option<String>,

    /// Downgrade failures to Ignored; inherited downwards when unset.
    #[serde(default)]
    pub ignore_errors: Option<bool>,

    /// Collapse this node's batch to a single host.
    #[serde(default)]
    pub run_once: bool,

    /// Variables merged into the node's hosts before execution.
    #[serde(default)]
    pub vars: Vars,

    /// Child blocks; non-empty makes this a grouping node.
    #[serde(default)]
    pub block: Vec<Block>,

    /// Blocks run when the grouping node fails.
    #[serde(default)]
    pub rescue: Vec<Block>,

    /// Blocks run after the grouping node regardless of outcome.
    #[serde(default)]
    pub always: Vec<Block>,

    /// Unrecognized keys; the first one naming a registered module becomes
    /// the task's module invocation.
    #[serde(flatten)]
    pub unknown: IndexMap<String, Value>,
}

/// Accept either a single string or a sequence of strings.
fn one_or_many<'de, D>(deserializer: D) -> std::result::Result<Vec<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum OneOrMany {
        One(String),
        Many(Vec<String>),
    }

    Ok(match OneOrMany::deserialize(deserializer)? {
        OneOrMany::One(s) => vec![s],
        OneOrMany::Many(v) => v,
    })
}

/// Collapse batches under a `run_once` flag.
///
/// With the flag set, the whole batch list collapses to one batch holding
/// the explicit host list when given, else the first host of the first
/// batch. With the flag off, batches pass through unchanged.
pub fn collapse_run_once(
    batches: &[Vec<String>],
    run_once: bool,
    explicit: &[String],
) -> Vec<Vec<String>> {
    if !run_once {
        return batches.to_vec();
    }
    if !explicit.is_empty() {
        return vec![explicit.to_vec()];
    }
    match batches.iter().find(|b| !b.is_empty()) {
        Some(batch) => vec![vec![batch[0].clone()]],
        None => Vec::new(),
    }
}

/// Group hosts into serial batches.
///
/// `serial` may be absent (one batch of everything), a count, a percentage
/// string (`"30%"`, rounded up, minimum one host), or a list of either —
/// the last entry repeats for the remaining hosts.
pub fn group_hosts_by_serial(hosts: &[String], serial: Option<&Value>) -> Result<Vec<Vec<String>>> {
    let specs: Vec<&Value> = match serial {
        None | Some(Value::Null) => return Ok(vec![hosts.to_vec()]),
        Some(Value::Array(seq)) if seq.is_empty() => return Ok(vec![hosts.to_vec()]),
        Some(Value::Array(seq)) => seq.iter().collect(),
        Some(single) => vec![single],
    };

    let mut batches = Vec::new();
    let mut remaining = hosts;
    let mut spec_index = 0;
    while !remaining.is_empty() {
        let spec = specs[spec_index.min(specs.len() - 1)];
        let size = serial_batch_size(spec, hosts.len())?.min(remaining.len());
        batches.push(remaining[..size].to_vec());
        remaining = &remaining[size..];
        spec_index += 1;
    }
    Ok(batches)
}

fn serial_batch_size(spec: &Value, total: usize) -> Result<usize> {
    let size = match spec {
        Value::Number(n) => n
            .as_u64()
            .ok_or_else(|| Error::PlaybookValidation(format!("invalid serial value {n}")))?
            as usize,
        Value::String(s) => {
            let s = s.trim();
            if let Some(percent) = s.strip_suffix('%') {
                let percent: usize = percent.trim().parse().map_err(|_| {
                    Error::PlaybookValidation(format!("invalid serial percentage {s:?}"))
                })?;
                (total * percent).div_ceil(100).max(1)
            } else {
                s.parse().map_err(|_| {
                    Error::PlaybookValidation(format!("invalid serial value {s:?}"))
                })?
            }
        }
        other => {
            return Err(Error::PlaybookValidation(format!(
                "invalid serial value {other}"
            )))
        }
    };
    if size == 0 {
        return Err(Error::PlaybookValidation("serial batch size is zero".to_string()));
    }
    Ok(size)
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn test_parse_playbook_with_module_detection_keys() {
        let playbook = Playbook::from_yaml(
            r#"
- name: bootstrap
  hosts: all
  gather_facts: true
  tasks:
    - name: greet
      debug:
        msg: hello
      when: do_greet
    - name: grouped
      block:
        - name: inner
          command: /bin/true
      rescue:
        - name: cleanup
          command: /bin/false
"#,
        )
        .unwrap();
        let play = &playbook.plays[0];
        assert_eq!(play.hosts, vec!["all"]);
        assert!(play.gather_facts);
        assert_eq!(play.tasks[0].when, vec!["do_greet"]);
        assert_eq!(play.tasks[0].unknown["debug"], json!({"msg": "hello"}));
        assert_eq!(play.tasks[1].block.len(), 1);
        assert_eq!(play.tasks[1].rescue.len(), 1);
    }

    #[test]
    fn test_play_without_hosts_rejected() {
        assert!(Playbook::from_yaml("- name: empty\n  tasks: []\n").is_err());
    }

    #[test]
    fn test_collapse_run_once_with_explicit_hosts() {
        let batches = vec![vec!["h1".to_string(), "h2".to_string()]];
        assert_eq!(
            collapse_run_once(&batches, true, &["h1".to_string()]),
            vec![vec!["h1".to_string()]]
        );
    }

    #[test]
    fn test_collapse_run_once_flag_off_is_identity() {
        let batches = vec![vec!["h1".to_string(), "h2".to_string()]];
        assert_eq!(collapse_run_once(&batches, false, &[]), batches);
    }

    #[test]
    fn test_collapse_run_once_defaults_to_first_host() {
        let batches = vec![vec!["h1".to_string(), "h2".to_string()]];
        assert_eq!(collapse_run_once(&batches, true, &[]), vec![vec!["h1".to_string()]]);
    }

    #[test]
    fn test_serial_absent_single_batch() {
        let hosts: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(group_hosts_by_serial(&hosts, None).unwrap(), vec![hosts.clone()]);
    }

    #[test]
    fn test_serial_count() {
        let hosts: Vec<String> = vec!["a".into(), "b".into(), "c".into()];
        assert_eq!(
            group_hosts_by_serial(&hosts, Some(&json!(2))).unwrap(),
            vec![vec!["a".to_string(), "b".to_string()], vec!["c".to_string()]]
        );
    }

    #[test]
    fn test_serial_percentage_and_list() {
        let hosts: Vec<String> = (1..=4).map(|i| format!("h{i}")).collect();
        assert_eq!(
            group_hosts_by_serial(&hosts, Some(&json!("50%"))).unwrap(),
            vec![
                vec!["h1".to_string(), "h2".to_string()],
                vec!["h3".to_string(), "h4".to_string()]
            ]
        );
        assert_eq!(
            group_hosts_by_serial(&hosts, Some(&json!([1, 2]))).unwrap(),
            vec![
                vec!["h1".to_string()],
                vec!["h2".to_string(), "h3".to_string()],
                vec!["h4".to_string()]
            ]
        );
    }

    #[test]
    fn test_serial_zero_rejected() {
        let hosts: Vec<String> = vec!["a".into()];
        assert!(group_hosts_by_serial(&hosts, Some(&json!(0))).is_err());
    }
}
