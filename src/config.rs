//! Pipeline configuration for kubesmith.
//!
//! The config is an opaque key/value blob layered on top of every host's
//! resolved variables (highest file-backed precedence). It also carries
//! engine settings such as the working directory.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;
use crate::vars::{get_value, Vars};

/// Config key holding the engine working directory.
const KEY_WORKDIR: &str = "workdir";

/// An opaque configuration blob read once at store construction.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Config {
    /// The raw configuration values.
    pub spec: Vars,
}

impl Config {
    /// Create a config from a raw variable map.
    pub fn new(spec: Vars) -> Self {
        Self { spec }
    }

    /// Load a config from a YAML file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse a config from YAML text.
    pub fn from_yaml(content: &str) -> Result<Self> {
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        let spec: Vars = serde_yaml::from_str(content)?;
        Ok(Self { spec })
    }

    /// Look up a value by dotted path (`registry.mirror.host`).
    pub fn get(&self, path: &str) -> Option<&Value> {
        get_value(&self.spec, path)
    }

    /// The engine working directory: the `workdir` config key when set,
    /// otherwise the process working directory.
    pub fn workdir(&self) -> PathBuf {
        if let Some(dir) = self.get(KEY_WORKDIR).and_then(Value::as_str) {
            return PathBuf::from(dir);
        }
        std::env::current_dir().unwrap_or_else(|_| PathBuf::from("."))
    }

    /// Directory where per-run host variable snapshots are persisted.
    pub fn runtime_dir(&self, pipeline: &str) -> PathBuf {
        self.workdir().join("runtime").join(pipeline).join("variable")
    }
}
