//! Debug module: print a message or a variable value.
//!
//! Runs entirely on the control node; the rendered text becomes the host's
//! stdout, which makes this module the usual vehicle for registering
//! computed values.

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecOptions, Module, ModuleOutput};
use crate::error::{Error, Result};
use crate::template;
use crate::vars;

/// Print a templated message (`msg`) or a variable by name (`var`).
pub struct DebugModule;

#[async_trait]
impl Module for DebugModule {
    fn name(&self) -> &'static str {
        "debug"
    }

    async fn execute(&self, options: &ExecOptions) -> ModuleOutput {
        match run(options).await {
            Ok(output) => output,
            Err(e) => ModuleOutput::fail(e.to_string()),
        }
    }
}

async fn run(options: &ExecOptions) -> Result<ModuleOutput> {
    let host_vars = options.host_vars()?;
    let args = options.args_map()?;

    if let Some(msg) = args.get("msg") {
        let rendered = match msg {
            Value::String(s) => template::parse_string(&host_vars, s)?,
            other => serde_json::to_string_pretty(other)?,
        };
        return Ok(ModuleOutput::ok(rendered));
    }

    if let Some(var) = args.get("var").and_then(Value::as_str) {
        let value = vars::get_value(&host_vars, var).cloned().unwrap_or(Value::Null);
        let rendered = match value {
            Value::String(s) => s,
            other => serde_json::to_string_pretty(&other)?,
        };
        return Ok(ModuleOutput::ok(rendered));
    }

    Err(Error::module_args("debug", "either 'msg' or 'var' is required"))
}
