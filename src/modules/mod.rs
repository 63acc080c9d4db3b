//! Module system for kubesmith.
//!
//! Modules are the named, idempotent operations a task dispatches per host:
//! run a command, copy a file, render a template, set a fact. The executor
//! never interprets module arguments — each module templates and validates
//! its own through the store's typed accessors.
//!
//! The registry is an explicit object constructed once and passed by
//! reference; there is no process-global module table.

pub mod assert;
pub mod command;
pub mod copy;
pub mod debug;
pub mod fetch;
pub mod set_fact;
pub mod template;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::Value;

use crate::connector::{self, Connector};
use crate::error::{Error, Result};
use crate::task::Task;
use crate::vars::store::{self, VariableStore};
use crate::vars::Vars;

/// Stdout marker for a host skipped by its `when` conditions.
pub const STDOUT_SKIP: &str = "skip";
/// Stdout marker for a condition that held.
pub const STDOUT_TRUE: &str = "true";
/// Stdout marker for a condition that did not hold.
pub const STDOUT_FALSE: &str = "false";

/// What a module produced on one host. Non-empty stderr marks the host
/// failed; transport and argument errors surface here, never as panics.
#[derive(Debug, Clone, Default)]
pub struct ModuleOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error.
    pub stderr: String,
}

impl ModuleOutput {
    /// Successful output.
    pub fn ok(stdout: impl Into<String>) -> Self {
        Self {
            stdout: stdout.into(),
            stderr: String::new(),
        }
    }

    /// Failed output.
    pub fn fail(stderr: impl Into<String>) -> Self {
        Self {
            stdout: String::new(),
            stderr: stderr.into(),
        }
    }
}

/// Everything a module may need: the store, the target host, its opaque
/// arguments and the task metadata.
#[derive(Clone)]
pub struct ExecOptions {
    /// Target host.
    pub host: String,
    /// The run's variable store.
    pub store: Arc<VariableStore>,
    /// Raw module arguments from the playbook.
    pub args: Value,
    /// The enclosing task.
    pub task: Arc<Task>,
}

impl ExecOptions {
    /// The host's fully resolved variable context.
    pub fn host_vars(&self) -> Result<Vars> {
        self.store.get(store::all_vars(&self.host))
    }

    /// The arguments as a map; modules taking structured args call this.
    pub fn args_map(&self) -> Result<Vars> {
        self.args
            .as_object()
            .cloned()
            .ok_or_else(|| Error::module_args(&self.task.module.name, "arguments must be a map"))
    }

    /// Build and initialize the host's connector.
    pub async fn connector(&self) -> Result<Box<dyn Connector>> {
        let vars = self.host_vars()?;
        connector::connect(&self.host, &vars).await
    }
}

/// A named, idempotent operation invoked per host.
#[async_trait]
pub trait Module: Send + Sync {
    /// Registry name.
    fn name(&self) -> &'static str;

    /// Run against one host, folding all failures into stderr.
    async fn execute(&self, options: &ExecOptions) -> ModuleOutput;
}

/// Name → module table, built once per process and shared by reference.
pub struct ModuleRegistry {
    modules: HashMap<String, Arc<dyn Module>>,
}

impl ModuleRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            modules: HashMap::new(),
        }
    }

    /// Create a registry holding the built-in catalog.
    pub fn with_builtins() -> Self {
        let mut registry = Self::new();
        registry.register(Arc::new(assert::AssertModule));
        registry.register(Arc::new(command::CommandModule));
        registry.register_alias("shell", Arc::new(command::CommandModule));
        registry.register(Arc::new(copy::CopyModule));
        registry.register(Arc::new(debug::DebugModule));
        registry.register(Arc::new(fetch::FetchModule));
        registry.register(Arc::new(set_fact::SetFactModule));
        registry.register(Arc::new(template::TemplateModule));
        registry
    }

    /// Register a module under its own name.
    pub fn register(&mut self, module: Arc<dyn Module>) {
        self.modules.insert(module.name().to_string(), module);
    }

    /// Register a module under an alternate name.
    pub fn register_alias(&mut self, name: impl Into<String>, module: Arc<dyn Module>) {
        self.modules.insert(name.into(), module);
    }

    /// Look a module up by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Module>> {
        self.modules.get(name).cloned()
    }

    /// Whether a module with this name exists.
    pub fn contains(&self, name: &str) -> bool {
        self.modules.contains_key(name)
    }

    /// All registered names.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.modules.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl Default for ModuleRegistry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

/// Parse the optional `mode` argument (integer or octal string).
pub(crate) fn file_mode(ctx: &Vars, args: &Vars, default: u32) -> Result<u32> {
    match args.get("mode") {
        None => Ok(default),
        Some(Value::Number(n)) => n
            .as_u64()
            .and_then(|m| u32::try_from(m).ok())
            .ok_or_else(|| Error::Variable("variable \"mode\" is not a file mode".to_string())),
        Some(Value::String(s)) => {
            let rendered = crate::template::parse_string(ctx, s)?;
            u32::from_str_radix(rendered.trim().trim_start_matches("0o"), 8)
                .map_err(|_| Error::Variable(format!("variable \"mode\" {rendered:?} is not octal")))
        }
        Some(_) => Err(Error::Variable("variable \"mode\" is not a file mode".to_string())),
    }
}

#[cfg(test)]
pub(crate) mod support {
    //! Shared fixtures for module unit tests.

    use super::*;
    use crate::config::Config;
    use crate::inventory::Inventory;
    use crate::task::{ModuleSpec, Task};
    use crate::vars::source::MemorySource;
    use crate::vars::store::merge_runtime;

    /// Build exec options against an in-memory store. `runtime` seeds the
    /// first host's runtime scope.
    pub(crate) fn exec_options(
        hosts: &[&str],
        runtime: serde_json::Value,
        args: serde_json::Value,
    ) -> ExecOptions {
        let inventory_yaml = format!(
            "hosts:\n{}",
            hosts
                .iter()
                .map(|h| format!("  {h}: {{}}\n"))
                .collect::<String>()
        );
        let store = Arc::new(
            VariableStore::new(
                "test",
                Config::default(),
                Inventory::from_yaml(&inventory_yaml).unwrap(),
                Box::new(MemorySource::new()),
            )
            .unwrap(),
        );
        if let Some(map) = runtime.as_object() {
            if !map.is_empty() {
                store
                    .merge(merge_runtime(map.clone(), vec![hosts[0].to_string()]))
                    .unwrap();
            }
        }
        let task = Task::new(
            "test task",
            hosts.iter().map(|h| h.to_string()).collect(),
            ModuleSpec {
                name: "test".to_string(),
                args: args.clone(),
            },
        );
        ExecOptions {
            host: hosts[0].to_string(),
            store,
            args,
            task: Arc::new(task),
        }
    }
}
