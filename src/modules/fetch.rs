//! Fetch module: pull a file from the target host to the control node.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use super::{ExecOptions, Module, ModuleOutput};
use crate::error::{Error, Result};
use crate::vars;

/// Fetch a remote file into a local destination.
pub struct FetchModule;

#[async_trait]
impl Module for FetchModule {
    fn name(&self) -> &'static str {
        "fetch"
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
    let dest = PathBuf::from(vars::string_var(&host_vars, &args, "dest")?);

    let mut conn = options.connector().await?;
    let result = conn.fetch_file(Path::new(&src)).await;
    let _ = conn.close().await;
    let content = result?;

    if let Some(parent) = dest.parent() {
        tokio::fs::create_dir_all(parent).await?;
    }
    tokio::fs::write(&dest, &content)
        .await
        .map_err(|e| Error::module_args("fetch", format!("cannot write dest {dest:?}: {e}")))?;

    Ok(ModuleOutput::ok("success"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::support::exec_options;
    use serde_json::json;

    #[tokio::test]
    async fn test_fetches_remote_file() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("kubeconfig");
        let dest = dir.path().join("collected/kubeconfig");
        std::fs::write(&src, "kind: Config").unwrap();
        let options = exec_options(
            &["localhost"],
            json!({}),
            json!({"src": src, "dest": dest}),
        );
        let output = FetchModule.execute(&options).await;
        assert!(output.stderr.is_empty(), "{}", output.stderr);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "kind: Config");
    }

    #[tokio::test]
    async fn test_missing_remote_file_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = exec_options(
            &["localhost"],
            json!({}),
            json!({"src": dir.path().join("absent"), "dest": dir.path().join("out")}),
        );
        let output = FetchModule.execute(&options).await;
        assert!(!output.stderr.is_empty());
    }
}
