//! Host fact gathering.
//!
//! Facts are collected through a connector's command and file primitives so
//! every transport that can run commands gets them for free: os-release,
//! kernel version, hostname, architecture, cpu and memory information. The
//! result seeds a host's remote variables exactly once per run.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::json;

use super::Connector;
use crate::error::Result;
use crate::vars::Vars;

/// Collect the standard fact set from a live host.
pub async fn gather_facts(conn: &dyn Connector) -> Result<Vars> {
    let os_release = conn.fetch_file(Path::new("/etc/os-release")).await?;
    let kernel = conn.execute_command("uname -r").await?;
    let hostname = conn.execute_command("hostname").await?;
    let arch = conn.execute_command("arch").await?;
    let cpu_info = conn.fetch_file(Path::new("/proc/cpuinfo")).await?;
    let mem_info = conn.fetch_file(Path::new("/proc/meminfo")).await?;

    let os = json!({
        "release": convert_bytes_to_map(&os_release, "="),
        "kernel_version": kernel.stdout.trim(),
        "hostname": hostname.stdout.trim(),
        "architecture": arch.stdout.trim(),
    });
    let process = json!({
        "cpuInfo": convert_bytes_to_slice(&cpu_info, ":"),
        "memInfo": convert_bytes_to_map(&mem_info, ":"),
    });

    let mut facts = Vars::new();
    facts.insert("os".to_string(), os);
    facts.insert("process".to_string(), process);
    Ok(facts)
}

/// Parse `key<sep>value` lines into a map, skipping lines without the
/// separator. Values keep surrounding quotes stripped.
pub fn convert_bytes_to_map(bytes: &[u8], sep: &str) -> BTreeMap<String, String> {
    let mut map = BTreeMap::new();
    for line in String::from_utf8_lossy(bytes).lines() {
        if let Some((key, value)) = line.split_once(sep) {
            map.insert(
                key.trim().to_string(),
                value.trim().trim_matches('"').to_string(),
            );
        }
    }
    map
}

/// Parse `key<sep>value` lines grouped by blank lines into a list of maps
/// (e.g. one entry per processor in `/proc/cpuinfo`).
pub fn convert_bytes_to_slice(bytes: &[u8], sep: &str) -> Vec<BTreeMap<String, String>> {
    let mut groups = Vec::new();
    let mut current = BTreeMap::new();
    for line in String::from_utf8_lossy(bytes).lines() {
        let line = line.trim();
        if line.is_empty() {
            if !current.is_empty() {
                groups.push(std::mem::take(&mut current));
            }
            continue;
        }
        if let Some((key, value)) = line.split_once(sep) {
            current.insert(key.trim().to_string(), value.trim().to_string());
        }
    }
    if !current.is_empty() {
        groups.push(current);
    }
    groups
}
