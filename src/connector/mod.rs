//! Connector layer: the transport abstraction used to reach a host.
//!
//! The engine is agnostic to the transport — a shell session on the control
//! node, SSH, a Kubernetes API endpoint driven through kubectl, or a
//! monitoring endpoint queried over HTTP. The connector for a host is
//! selected from its host-scoped `connector` variable; hosts without one
//! default to `local` for the control node and `ssh` otherwise.

pub mod facts;
pub mod kubernetes;
pub mod local;
pub mod metrics;
pub mod ssh;

use std::path::Path;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use crate::error::{Error, Result};
use crate::vars::{keys, Vars};

/// Output of one remote command.
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    /// Captured standard output.
    pub stdout: String,
    /// Captured standard error; transport failures surface here or as `Err`.
    pub stderr: String,
}

/// Transport abstraction for one host.
///
/// Implementations may block on network or process I/O; callers bound them
/// with timeouts. Fact gathering is optional — the default implementation
/// reports the capability as unsupported.
#[async_trait]
pub trait Connector: Send + Sync {
    /// The host this connector reaches.
    fn host(&self) -> &str;

    /// Establish the transport.
    async fn init(&mut self) -> Result<()>;

    /// Tear the transport down.
    async fn close(&mut self) -> Result<()>;

    /// Execute a command, capturing stdout and stderr.
    async fn execute_command(&self, command: &str) -> Result<CommandOutput>;

    /// Write bytes to a remote path with the given mode.
    async fn put_file(&self, content: &[u8], remote_path: &Path, mode: u32) -> Result<()>;

    /// Read a remote file.
    async fn fetch_file(&self, remote_path: &Path) -> Result<Vec<u8>>;

    /// Gather facts from the live host.
    async fn host_info(&self) -> Result<Vars> {
        Err(Error::UnsupportedCapability {
            host: self.host().to_string(),
            capability: "fact gathering".to_string(),
        })
    }
}

/// The `connector.type` values understood by [`connect`].
const TYPE_LOCAL: &str = "local";
const TYPE_SSH: &str = "ssh";
const TYPE_KUBERNETES: &str = "kubernetes";
const TYPE_METRICS: &str = "prometheus";

/// Select, build and initialize the connector for a host.
///
/// `vars` is the host's fully resolved variable context; the host-scoped
/// `connector` map inside it picks the transport and its settings.
pub async fn connect(host: &str, vars: &Vars) -> Result<Box<dyn Connector>> {
    let connector_vars = vars
        .get(keys::CONNECTOR)
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default();

    let default_type = if host == keys::LOCALHOST { TYPE_LOCAL } else { TYPE_SSH };
    let connector_type = connector_vars
        .get("type")
        .and_then(Value::as_str)
        .unwrap_or(default_type)
        .to_string();

    debug!(host = %host, connector = %connector_type, "selecting connector");

    let mut connector: Box<dyn Connector> = match connector_type.as_str() {
        TYPE_LOCAL => Box::new(local::LocalConnector::new(host)),
        TYPE_SSH => Box::new(ssh::SshConnector::new(host, vars, &connector_vars)),
        TYPE_KUBERNETES => Box::new(kubernetes::KubernetesConnector::new(
            host,
            vars,
            &connector_vars,
        )),
        TYPE_METRICS => Box::new(metrics::MetricsConnector::new(host, &connector_vars)?),
        other => {
            return Err(Error::connector(
                host,
                format!("unknown connector type {other:?}"),
            ))
        }
    };
    connector.init().await?;
    Ok(connector)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_connect_defaults_to_local_for_localhost() {
        let vars = json!({}).as_object().cloned().unwrap();
        let conn = connect(keys::LOCALHOST, &vars).await.unwrap();
        assert_eq!(conn.host(), "localhost");
    }

    #[tokio::test]
    async fn test_connect_rejects_unknown_type() {
        let vars = json!({"connector": {"type": "carrier-pigeon"}})
            .as_object()
            .cloned()
            .unwrap();
        assert!(connect("h1", &vars).await.is_err());
    }
}
