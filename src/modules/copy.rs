//! Copy module: place a file on the target host.
//!
//! The payload comes from a local `src` file or an inline `content` string
//! (templated). The destination path and mode are templated per host.

use std::path::Path;

use async_trait::async_trait;

use super::{file_mode, ExecOptions, Module, ModuleOutput};
use crate::error::{Error, Result};
use crate::vars;

/// Default mode for copied files.
const DEFAULT_MODE: u32 = 0o644;

/// Copy a local file or inline content to the host.
pub struct CopyModule;

#[async_trait]
impl Module for CopyModule {
    fn name(&self) -> &'static str {
        "copy"
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

    let dest = vars::string_var(&host_vars, &args, "dest")?;
    let mode = file_mode(&host_vars, &args, DEFAULT_MODE)?;

    let content: Vec<u8> = if args.contains_key("content") {
        vars::string_var(&host_vars, &args, "content")?.into_bytes()
    } else if args.contains_key("src") {
        let src = vars::string_var(&host_vars, &args, "src")?;
        tokio::fs::read(&src)
            .await
            .map_err(|e| Error::module_args("copy", format!("cannot read src {src:?}: {e}")))?
    } else {
        return Err(Error::module_args("copy", "requires 'src' or 'content'"));
    };

    let mut conn = options.connector().await?;
    let result = conn.put_file(&content, Path::new(&dest), mode).await;
    let _ = conn.close().await;
    result?;

    Ok(ModuleOutput::ok("success"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::support::exec_options;
    use serde_json::json;

    #[tokio::test]
    async fn test_inline_content_is_templated() {
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("motd");
        let options = exec_options(
            &["localhost"],
            json!({"cluster_name": "prod"}),
            json!({"content": "welcome to {{ cluster_name }}", "dest": dest}),
        );
        let output = CopyModule.execute(&options).await;
        assert!(output.stderr.is_empty(), "{}", output.stderr);
        assert_eq!(std::fs::read_to_string(&dest).unwrap(), "welcome to prod");
    }

    #[tokio::test]
    async fn test_src_file_is_copied() {
        let dir = tempfile::tempdir().unwrap();
        let src = dir.path().join("in.bin");
        let dest = dir.path().join("out.bin");
        std::fs::write(&src, b"raw bytes").unwrap();
        let options = exec_options(
            &["localhost"],
            json!({}),
            json!({"src": src, "dest": dest, "mode": "0600"}),
        );
        let output = CopyModule.execute(&options).await;
        assert!(output.stderr.is_empty(), "{}", output.stderr);
        assert_eq!(std::fs::read(&dest).unwrap(), b"raw bytes");
    }

    #[tokio::test]
    async fn test_missing_payload_fails() {
        let dir = tempfile::tempdir().unwrap();
        let options = exec_options(
            &["localhost"],
            json!({}),
            json!({"dest": dir.path().join("x")}),
        );
        let output = CopyModule.execute(&options).await;
        assert!(output.stderr.contains("src") || output.stderr.contains("content"));
    }
}
