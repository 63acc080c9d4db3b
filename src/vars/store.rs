//! The variable store: per-host configuration state for one pipeline run.
//!
//! The store is constructed once per run from Config + Inventory + a
//! persisted snapshot, mutated throughout the run, and discarded at run end.
//! All reads and writes go through two entry points:
//!
//! - [`VariableStore::get`] runs a query closure under the read lock and
//!   must not mutate;
//! - [`VariableStore::merge`] runs a mutation closure under the write lock
//!   against a *clone* of the current value. A mutation may therefore read
//!   current state mid-write without reentrant locking. Only when the
//!   mutation succeeds is the clone installed and the per-host diff
//!   persisted; a failing mutation leaves the store untouched.
//!
//! Queries and mutations are first-class closures built by the constructor
//! functions in this module ([`all_vars`], [`hostnames`],
//! [`merge_remote_facts`], [`merge_runtime`], ...), so every specialized
//! operation lives outside the store while executing under its
//! synchronization.

use std::net::UdpSocket;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use parking_lot::RwLock;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::debug;

use crate::config::Config;
use crate::error::{Error, Result};
use crate::inventory::{merge_slice, Inventory};
use crate::template;
use crate::vars::source::Source;
use crate::vars::{combine_variables, keys, parse_variable, Vars};

/// Matches `group[index]` host patterns.
static GROUP_INDEX: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(.*?)\[(\d+)\]$").expect("static pattern"));

/// Variables attached to a single host.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    /// Facts gathered from the live host. Seeded at most once per run; a
    /// second remote merge for an already-populated host is a no-op.
    #[serde(default)]
    pub remote: Vars,

    /// Values set during execution: loop items, registered results,
    /// explicit facts. Last-write-wins per scalar, recursive per map.
    #[serde(default)]
    pub runtime: Vars,
}

/// The store's in-memory value: immutable inputs plus mutable host records.
#[derive(Debug, Clone)]
pub struct StoreValue {
    /// Top-level configuration (highest file-backed precedence).
    pub config: Config,
    /// The fleet declaration.
    pub inventory: Inventory,
    /// One record per host in the implicit `all` group.
    pub hosts: IndexMap<String, HostRecord>,
}

impl StoreValue {
    /// Resolve one host's variables through the full precedence chain,
    /// low to high: group vars < remote vars < runtime vars < inventory
    /// vars < per-host inventory vars < config vars < computed defaults.
    ///
    /// A host without a record resolves to an empty map, never an error.
    pub fn resolve_host_vars(&self, host: &str) -> Vars {
        let Some(record) = self.hosts.get(host) else {
            return Vars::new();
        };

        let mut vars = Vars::new();
        for (_, group) in self.inventory.groups_of(host) {
            vars = combine_variables(&vars, &group.vars);
        }
        vars = combine_variables(&vars, &record.remote);
        vars = combine_variables(&vars, &record.runtime);
        vars = combine_variables(&vars, &self.inventory.vars);
        if let Some(host_vars) = self.inventory.hosts.get(host).and_then(Value::as_object) {
            vars = combine_variables(&vars, host_vars);
        }
        vars = combine_variables(&vars, &self.config.spec);
        default_host_vars(host, &mut vars);
        vars
    }

    /// Resolve every host's variables, keyed by hostname.
    fn all_hosts_vars(&self) -> Vars {
        let mut hosts = Vars::new();
        for host in self.hosts.keys() {
            hosts.insert(host.clone(), Value::Object(self.resolve_host_vars(host)));
        }
        hosts
    }

    /// The full read context for one host: its resolved variables plus the
    /// reserved cross-host views (`inventory_hosts`, `groups`).
    pub fn full_host_context(&self, host: &str) -> Vars {
        if !self.hosts.contains_key(host) {
            return Vars::new();
        }
        let mut vars = self.resolve_host_vars(host);
        vars.insert(
            keys::INVENTORY_HOSTS.to_string(),
            Value::Object(self.all_hosts_vars()),
        );
        let groups: Vars = self
            .inventory
            .resolved_groups()
            .into_iter()
            .map(|(name, hosts)| (name, serde_json::json!(hosts)))
            .collect();
        vars.insert(keys::GROUPS.to_string(), Value::Object(groups));
        vars
    }
}

/// Fill in computed defaults (highest precedence) for one host.
fn default_host_vars(host: &str, vars: &mut Vars) {
    if host == keys::LOCALHOST {
        if !vars.contains_key(keys::INTERNAL_IPV4) {
            if let Some(ip) = local_ip(false) {
                vars.insert(keys::INTERNAL_IPV4.to_string(), Value::String(ip));
            }
        }
        if !vars.contains_key(keys::INTERNAL_IPV6) {
            if let Some(ip) = local_ip(true) {
                vars.insert(keys::INTERNAL_IPV6.to_string(), Value::String(ip));
            }
        }
    }
    // Prefer the hostname reported by gathered facts.
    if let Some(actual) = vars
        .get(keys::OS)
        .and_then(Value::as_object)
        .and_then(|os| os.get(keys::OS_HOSTNAME))
        .cloned()
    {
        vars.insert(keys::HOSTNAME.to_string(), actual);
    }
    if !vars.contains_key(keys::INVENTORY_NAME) {
        vars.insert(keys::INVENTORY_NAME.to_string(), Value::String(host.to_string()));
    }
    if !vars.contains_key(keys::HOSTNAME) {
        let fallback = if host == keys::LOCALHOST {
            hostname::get()
                .ok()
                .and_then(|h| h.into_string().ok())
                .unwrap_or_else(|| host.to_string())
        } else {
            host.to_string()
        };
        vars.insert(keys::HOSTNAME.to_string(), Value::String(fallback));
    }
}

/// Best-effort local address discovery for the control node.
///
/// Connecting a UDP socket selects the outbound interface without sending
/// any packet; hosts without a route simply get no default.
fn local_ip(v6: bool) -> Option<String> {
    let (bind, probe) = if v6 {
        ("[::]:0", "[2001:4860:4860::8888]:80")
    } else {
        ("0.0.0.0:0", "8.8.8.8:80")
    };
    let socket = UdpSocket::bind(bind).ok()?;
    socket.connect(probe).ok()?;
    Some(socket.local_addr().ok()?.ip().to_string())
}

/// The thread-safe variable store for one pipeline run.
pub struct VariableStore {
    /// Unique identifier of the run (used for logging only).
    key: String,
    /// Persistence backend receiving per-host diffs.
    source: Box<dyn Source>,
    value: RwLock<StoreValue>,
}

impl std::fmt::Debug for VariableStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VariableStore").field("key", &self.key).finish()
    }
}

impl VariableStore {
    /// Build the store from its immutable inputs and a persisted snapshot.
    ///
    /// Every host in the implicit `all` group gets exactly one record;
    /// records found in the snapshot are restored. A snapshot record with an
    /// unexpected shape aborts construction.
    pub fn new(
        key: impl Into<String>,
        config: Config,
        inventory: Inventory,
        source: Box<dyn Source>,
    ) -> Result<Self> {
        let mut hosts = IndexMap::new();
        if let Some(all) = inventory.resolved_groups().get(keys::GROUP_ALL) {
            for host in all {
                hosts.insert(host.clone(), HostRecord::default());
            }
        }

        for (name, data) in source.read()? {
            let record: HostRecord =
                serde_json::from_slice(&data).map_err(|e| Error::InvalidHostRecord {
                    host: name.clone(),
                    message: e.to_string(),
                })?;
            hosts.insert(name, record);
        }

        Ok(Self {
            key: key.into(),
            source,
            value: RwLock::new(StoreValue { config, inventory, hosts }),
        })
    }

    /// Run a query under the read lock.
    pub fn get<T>(&self, query: impl FnOnce(&StoreValue) -> Result<T>) -> Result<T> {
        let guard = self.value.read();
        query(&guard)
    }

    /// Run a mutation under the write lock.
    ///
    /// The mutation receives a clone of the current value; reads performed
    /// by the mutation resolve against that clone, so no reentrant locking
    /// can occur. On success the clone is installed and exactly the host
    /// records that changed are persisted. On failure nothing is installed
    /// and no partial write is observable.
    pub fn merge(&self, mutation: impl FnOnce(&mut StoreValue) -> Result<()>) -> Result<()> {
        let mut guard = self.value.write();
        let mut next = guard.clone();
        mutation(&mut next)?;

        let mut changed = Vec::new();
        for (name, record) in &next.hosts {
            if guard.hosts.get(name) != Some(record) {
                changed.push((name.clone(), serde_json::to_vec_pretty(record)?));
            }
        }

        *guard = next;
        // Still under the writer lock: the backend is never touched
        // concurrently and need not be independently thread-safe.
        for (name, data) in changed {
            debug!(run = %self.key, host = %name, "syncing host record");
            self.source.write(&data, &name)?;
        }
        Ok(())
    }
}

// ============================================================================
// Queries
// ============================================================================

/// All resolved variables for one host, including the reserved cross-host
/// views. An absent host yields an empty map.
pub fn all_vars(host: impl Into<String>) -> impl FnOnce(&StoreValue) -> Result<Vars> {
    let host = host.into();
    move |value| Ok(value.full_host_context(&host))
}

/// Expand host/group patterns into concrete hostnames.
///
/// Each pattern may be a hostname, a group name, or `group[index]`.
/// Patterns are rendered against the config before matching, so a play can
/// target `{{ control_plane_group }}`. Results are de-duplicated preserving
/// first-seen order.
pub fn hostnames(patterns: Vec<String>) -> impl FnOnce(&StoreValue) -> Result<Vec<String>> {
    move |value| {
        let groups = value.inventory.resolved_groups();
        let mut hosts: Vec<String> = Vec::new();

        for pattern in &patterns {
            let pattern = template::parse_string(&value.config.spec, pattern)
                .unwrap_or_else(|_| pattern.clone());
            let pattern = pattern.trim();
            let mut matched = false;

            if value.hosts.contains_key(pattern) {
                hosts = merge_slice(&hosts, &[pattern.to_string()]);
                matched = true;
            }
            if let Some(members) = groups.get(pattern) {
                hosts = merge_slice(&hosts, members);
                matched = true;
            }
            if let Some(caps) = GROUP_INDEX.captures(pattern) {
                let group = caps.get(1).map_or("", |m| m.as_str());
                let index: usize = caps[2]
                    .parse()
                    .map_err(|_| Error::InvalidHostPattern(pattern.to_string()))?;
                if let Some(members) = groups.get(group) {
                    let host = members.get(index).ok_or_else(|| {
                        Error::InvalidHostPattern(format!(
                            "index {index} out of range for group {group:?}"
                        ))
                    })?;
                    hosts = merge_slice(&hosts, &[host.clone()]);
                    matched = true;
                }
            }

            if !matched {
                debug!(pattern = %pattern, "host pattern matched nothing");
            }
        }

        Ok(hosts)
    }
}

/// Length of the longest hostname (used to align status output).
pub fn host_name_max_len() -> impl FnOnce(&StoreValue) -> Result<usize> {
    |value| Ok(value.hosts.keys().map(String::len).max().unwrap_or_default())
}

// ============================================================================
// Mutations
// ============================================================================

/// Seed one host's remote facts.
///
/// Facts are seeded at most once per run: when the host already has remote
/// variables the merge is a no-op, so facts are never silently clobbered
/// mid-run. An unknown host is an invariant violation and aborts the merge.
pub fn merge_remote_facts(
    data: Vars,
    host: impl Into<String>,
) -> impl FnOnce(&mut StoreValue) -> Result<()> {
    let host = host.into();
    move |value| {
        if host.is_empty() {
            return Err(Error::Variable(
                "remote merge requires a non-empty host name".to_string(),
            ));
        }
        let record = value
            .hosts
            .get_mut(&host)
            .ok_or_else(|| Error::Variable(format!("remote merge target {host:?} does not exist")))?;
        if record.remote.is_empty() {
            record.remote = data;
        }
        Ok(())
    }
}

/// Merge values into the runtime scope of the given hosts.
///
/// Template expressions embedded in string scalars are resolved *now*,
/// against the union of the data being merged and the host's current fully
/// resolved context; the stored result is the rendered value and is never
/// re-rendered on later reads.
pub fn merge_runtime(
    data: Vars,
    hosts: Vec<String>,
) -> impl FnOnce(&mut StoreValue) -> Result<()> {
    move |value| {
        if data.is_empty() || hosts.is_empty() {
            return Ok(());
        }
        for host in &hosts {
            let rendered = render_patch(value, &data, host)?;
            let record = value.hosts.get_mut(host).ok_or_else(|| {
                Error::Variable(format!("runtime merge target {host:?} does not exist"))
            })?;
            record.runtime = combine_variables(&record.runtime, &rendered);
        }
        Ok(())
    }
}

/// Render against one host's context, then broadcast into every host's
/// runtime scope (used by facts a single host computes for the fleet).
pub fn merge_runtime_all(
    data: Vars,
    host: impl Into<String>,
) -> impl FnOnce(&mut StoreValue) -> Result<()> {
    let host = host.into();
    move |value| {
        if data.is_empty() {
            return Ok(());
        }
        let rendered = render_patch(value, &data, &host)?;
        for record in value.hosts.values_mut() {
            record.runtime = combine_variables(&record.runtime, &rendered);
        }
        Ok(())
    }
}

/// Render a runtime patch against `{patch} ∪ {host context}` at merge time.
fn render_patch(value: &StoreValue, data: &Vars, host: &str) -> Result<Vars> {
    let current = value.full_host_context(host);
    let ctx = combine_variables(data, &current);
    let mut patch = Value::Object(data.clone());
    parse_variable(&mut patch, &|s| template::parse_string(&ctx, s))?;
    match patch {
        Value::Object(map) => Ok(map),
        _ => Err(Error::Internal("runtime patch is not a map".to_string())),
    }
}
