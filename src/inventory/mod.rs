//! Inventory for kubesmith.
//!
//! The inventory declares the fleet: hosts with per-host variables, groups
//! with group-level variables, and inventory-wide variables. Groups may nest
//! by referencing other groups; membership resolution is transitive, order
//! independent and duplicate free, and tolerates reference cycles.

use std::collections::HashSet;
use std::path::Path;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::{Error, Result};
use crate::vars::{keys, Vars};

/// A named group of hosts with shared variables.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Group {
    /// Host names belonging directly to this group.
    #[serde(default)]
    pub hosts: Vec<String>,

    /// Names of nested groups whose hosts are transitive members.
    #[serde(default)]
    pub groups: Vec<String>,

    /// Group-level variables (lowest precedence).
    #[serde(default)]
    pub vars: Vars,
}

/// The fleet declaration read once at store construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Inventory {
    /// Hosts with their per-host variables.
    #[serde(default)]
    pub hosts: IndexMap<String, Value>,

    /// Named groups.
    #[serde(default)]
    pub groups: IndexMap<String, Group>,

    /// Inventory-wide variables.
    #[serde(default)]
    pub vars: Vars,
}

impl Inventory {
    /// Load an inventory from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| Error::InventoryLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })?;
        Self::from_yaml(&content).map_err(|e| Error::InventoryLoad {
            path: path.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Parse an inventory from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(content)?)
    }

    /// Resolve every group to its flat host list.
    ///
    /// `all` is every inventory host plus the synthetic local host;
    /// `ungrouped` is `all` minus every host reachable from an explicit
    /// group. Nested references resolve transitively with set semantics.
    pub fn resolved_groups(&self) -> IndexMap<String, Vec<String>> {
        let mut groups = IndexMap::new();

        let mut all: Vec<String> = self.hosts.keys().cloned().collect();
        if !all.iter().any(|h| h == keys::LOCALHOST) {
            all.push(keys::LOCALHOST.to_string());
        }
        groups.insert(keys::GROUP_ALL.to_string(), all.clone());

        let mut grouped: Vec<String> = Vec::new();
        for name in self.groups.keys() {
            let members = self.hosts_in_group(name, &mut HashSet::new());
            grouped = merge_slice(&grouped, &members);
            groups.insert(name.clone(), members);
        }

        let ungrouped = all
            .iter()
            .filter(|h| !grouped.contains(h))
            .cloned()
            .collect();
        groups.insert(keys::GROUP_UNGROUPED.to_string(), ungrouped);

        groups
    }

    /// Flatten one group's membership, following nested group references.
    ///
    /// `visited` breaks reference cycles: a group already being expanded
    /// contributes nothing on re-entry.
    fn hosts_in_group(&self, name: &str, visited: &mut HashSet<String>) -> Vec<String> {
        if !visited.insert(name.to_string()) {
            return Vec::new();
        }
        let Some(group) = self.groups.get(name) else {
            return Vec::new();
        };
        let mut hosts = Vec::new();
        for child in &group.groups {
            hosts = merge_slice(&self.hosts_in_group(child, visited), &hosts);
        }
        merge_slice(&hosts, &group.hosts)
    }

    /// Groups that directly contain the host (used for group-var layering).
    pub fn groups_of<'a>(
        &'a self,
        host: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a Group)> + 'a {
        self.groups
            .iter()
            .filter(move |(_, g)| g.hosts.iter().any(|h| h == host))
    }
}

/// Concatenate two host lists, skipping repeated values.
pub fn merge_slice(first: &[String], second: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut merged = Vec::with_capacity(first.len() + second.len());
    for host in first.iter().chain(second) {
        if seen.insert(host.clone()) {
            merged.push(host.clone());
        }
    }
    merged
}
