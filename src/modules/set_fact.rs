//! Set-fact module: merge values into the host's runtime scope.
//!
//! Every argument key becomes a runtime variable. Templated values render
//! at merge time against the host's current context, so a fact computed
//! from another fact sticks as its rendered value.

use async_trait::async_trait;

use super::{ExecOptions, Module, ModuleOutput};
use crate::error::{Error, Result};
use crate::vars::store::merge_runtime;

/// Set runtime facts on the target host.
pub struct SetFactModule;

#[async_trait]
impl Module for SetFactModule {
    fn name(&self) -> &'static str {
        "set_fact"
    }

    async fn execute(&self, options: &ExecOptions) -> ModuleOutput {
        match run(options).await {
            Ok(output) => output,
            Err(e) => ModuleOutput::fail(e.to_string()),
        }
    }
}

async fn run(options: &ExecOptions) -> Result<ModuleOutput> {
    let args = options.args_map()?;
    if args.is_empty() {
        return Err(Error::module_args("set_fact", "requires at least one fact"));
    }

    options
        .store
        .merge(merge_runtime(args, vec![options.host.clone()]))?;

    Ok(ModuleOutput::ok("success"))
}
