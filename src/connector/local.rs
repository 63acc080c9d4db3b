//! Local connector: runs commands on the control node itself.
//!
//! The synthetic `localhost` host uses this transport by default. File
//! operations act on the local filesystem and commands run through a shell.

use std::path::Path;

use async_trait::async_trait;
use tracing::trace;

use super::{facts, CommandOutput, Connector};
use crate::error::{Error, Result};
use crate::vars::Vars;

/// Shell used to run local commands.
const DEFAULT_SHELL: &str = "/bin/sh";

/// Connector executing directly on the control node.
pub struct LocalConnector {
    host: String,
    shell: String,
}

impl LocalConnector {
    /// Create a local connector for the given host label.
    pub fn new(host: impl Into<String>) -> Self {
        Self {
            host: host.into(),
            shell: DEFAULT_SHELL.to_string(),
        }
    }
}

#[async_trait]
impl Connector for LocalConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn init(&mut self) -> Result<()> {
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        trace!(host = %self.host, command = %command, "executing local command");
        let output = tokio::process::Command::new(&self.shell)
            .arg("-c")
            .arg(command)
            .output()
            .await
            .map_err(|e| Error::connector(&self.host, format!("spawn failed: {e}")))?;

        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let mut stderr = String::from_utf8_lossy(&output.stderr).to_string();
        if !output.status.success() && stderr.is_empty() {
            stderr = format!(
                "command exited with code {}",
                output.status.code().unwrap_or(-1)
            );
        }
        Ok(CommandOutput { stdout, stderr })
    }

    async fn put_file(&self, content: &[u8], remote_path: &Path, mode: u32) -> Result<()> {
        if let Some(parent) = remote_path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(remote_path, content).await?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            tokio::fs::set_permissions(remote_path, std::fs::Permissions::from_mode(mode)).await?;
        }
        #[cfg(not(unix))]
        let _ = mode;
        Ok(())
    }

    async fn fetch_file(&self, remote_path: &Path) -> Result<Vec<u8>> {
        Ok(tokio::fs::read(remote_path).await?)
    }

    async fn host_info(&self) -> Result<Vars> {
        facts::gather_facts(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_execute_command_captures_streams() {
        let conn = LocalConnector::new("localhost");
        let out = conn.execute_command("echo hello").await.unwrap();
        assert_eq!(out.stdout.trim(), "hello");
        assert!(out.stderr.is_empty());
    }

    #[tokio::test]
    async fn test_execute_command_failure_fills_stderr() {
        let conn = LocalConnector::new("localhost");
        let out = conn.execute_command("exit 3").await.unwrap();
        assert_eq!(out.stderr, "command exited with code 3");
    }

    #[tokio::test]
    async fn test_put_and_fetch_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested/hello.txt");
        let conn = LocalConnector::new("localhost");
        conn.put_file(b"payload", &path, 0o644).await.unwrap();
        assert_eq!(conn.fetch_file(&path).await.unwrap(), b"payload");
    }
}
