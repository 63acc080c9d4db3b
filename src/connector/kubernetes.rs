//! Kubernetes connector: drives a cluster through kubectl on the control
//! node.
//!
//! The "host" is a cluster name, not a machine. Commands run locally with
//! `KUBECONFIG` pointing at a per-cluster kubeconfig written under the work
//! directory; file operations act on the local filesystem (manifests are
//! rendered locally and applied by commands).

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use serde_json::Value;
use tracing::{debug, trace};

use super::{CommandOutput, Connector};
use crate::error::{Error, Result};
use crate::vars::{keys, Vars};

/// Shell used to run kubectl invocations.
const DEFAULT_SHELL: &str = "/bin/sh";

/// Relative kubeconfig location inside the cluster's home directory.
const KUBECONFIG_REL_PATH: &str = ".kube/config";

/// Connector executing cluster operations through kubectl.
pub struct KubernetesConnector {
    cluster: String,
    kubeconfig: Option<String>,
    homedir: PathBuf,
    shell: String,
}

impl KubernetesConnector {
    /// Build a connector for the named cluster.
    ///
    /// `connector.kubeconfig` holds the kubeconfig *content*; when absent on
    /// the local cluster the ambient kubeconfig is used.
    pub fn new(cluster: &str, vars: &Vars, connector_vars: &Vars) -> Self {
        let workdir = vars
            .get("workdir")
            .and_then(Value::as_str)
            .unwrap_or(".")
            .to_string();
        Self {
            cluster: cluster.to_string(),
            kubeconfig: connector_vars
                .get("kubeconfig")
                .and_then(Value::as_str)
                .map(str::to_string),
            homedir: Path::new(&workdir).join("kubernetes").join(cluster),
            shell: DEFAULT_SHELL.to_string(),
        }
    }

    fn kubeconfig_path(&self) -> PathBuf {
        self.homedir.join(KUBECONFIG_REL_PATH)
    }
}

#[async_trait]
impl Connector for KubernetesConnector {
    fn host(&self) -> &str {
        &self.cluster
    }

    async fn init(&mut self) -> Result<()> {
        let Some(kubeconfig) = &self.kubeconfig else {
            if self.cluster == keys::LOCALHOST {
                debug!("kubeconfig not set, using ambient kubeconfig");
                return Ok(());
            }
            return Err(Error::connector(
                &self.cluster,
                "kubeconfig is required for a remote cluster",
            ));
        };

        let path = self.kubeconfig_path();
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(&path, kubeconfig).await?;
        debug!(cluster = %self.cluster, path = %path.display(), "wrote cluster kubeconfig");
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        trace!(cluster = %self.cluster, command = %command, "executing cluster command");
        let mut cmd = tokio::process::Command::new(&self.shell);
        cmd.arg("-c").arg(command);
        if self.kubeconfig.is_some() {
            cmd.env("KUBECONFIG", self.kubeconfig_path());
        }
        let output = cmd
            .output()
            .await
            .map_err(|e| Error::connector(&self.cluster, format!("spawn failed: {e}")))?;

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
}
