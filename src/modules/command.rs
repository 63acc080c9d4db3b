//! Command module: run a shell command on the target host.
//!
//! Accepts a bare command string or a `{cmd: ...}` map. The command is
//! templated against the host's variables and executed through the host's
//! connector; trailing newlines are stripped so registered results compare
//! cleanly.

use async_trait::async_trait;
use serde_json::Value;

use super::{ExecOptions, Module, ModuleOutput};
use crate::error::{Error, Result};
use crate::template;
use crate::vars;

/// Run a command through the host's connector.
pub struct CommandModule;

#[async_trait]
impl Module for CommandModule {
    fn name(&self) -> &'static str {
        "command"
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
    let command = match &options.args {
        Value::String(s) => template::parse_string(&host_vars, s)?,
        Value::Object(map) => vars::string_var(&host_vars, map, "cmd")?,
        _ => {
            return Err(Error::module_args(
                "command",
                "expects a command string or a map with 'cmd'",
            ))
        }
    };

    let mut conn = options.connector().await?;
    let result = conn.execute_command(&command).await;
    let _ = conn.close().await;
    let output = result?;

    Ok(ModuleOutput {
        stdout: output.stdout.trim_end_matches('\n').to_string(),
        stderr: output.stderr.trim_end_matches('\n').to_string(),
    })
}
