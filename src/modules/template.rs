//! Template module: render a local template file onto the target host.
//!
//! The source file is read on the control node, rendered against the host's
//! resolved variables, and written through the connector.

use std::path::Path;

use async_trait::async_trait;

use super::{file_mode, ExecOptions, Module, ModuleOutput};
use crate::error::{Error, Result};
use crate::template;
use crate::vars;

/// Default mode for rendered files.
const DEFAULT_MODE: u32 = 0o644;

/// Render a template file and place it on the host.
pub struct TemplateModule;

#[async_trait]
impl Module for TemplateModule {
    fn name(&self) -> &'static str {
        "template"
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

    let src = vars::string_var(&host_vars, &args, "src")?;
    let dest = vars::string_var(&host_vars, &args, "dest")?;
    let mode = file_mode(&host_vars, &args, DEFAULT_MODE)?;

    let source = tokio::fs::read_to_string(&src)
        .await
        .map_err(|e| Error::module_args("template", format!("cannot read src {src:?}: {e}")))?;
    let rendered = template::parse_string(&host_vars, &source)?;

    let mut conn = options.connector().await?;
    let result = conn.put_file(rendered.as_bytes(), Path::new(&dest), mode).await;
    let _ = conn.close().await;
    result?;

    Ok(ModuleOutput::ok("success"))
}
