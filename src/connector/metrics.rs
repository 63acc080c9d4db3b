//! Prometheus connector: HTTP-as-query transport for monitoring endpoints.
//!
//! A "command" on this connector is a PromQL expression; executing it runs
//! an instant query against the endpoint and returns the response body as
//! stdout. File transfer is meaningless here and reports as unsupported.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::trace;

use super::{CommandOutput, Connector};
use crate::error::{Error, Result};
use crate::vars::Vars;

/// Default request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// Connector querying a Prometheus-compatible HTTP endpoint.
pub struct MetricsConnector {
    host: String,
    base_url: String,
    username: Option<String>,
    password: Option<String>,
    token: Option<String>,
    timeout: Duration,
    client: Option<reqwest::Client>,
}

impl MetricsConnector {
    /// Build a connector from the host-scoped connector variables.
    pub fn new(host: &str, connector_vars: &Vars) -> Result<Self> {
        let base_url = connector_vars
            .get("host")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::connector(host, "connector.host (endpoint url) is required"))?
            .trim_end_matches('/')
            .to_string();
        let timeout = connector_vars
            .get("timeout_secs")
            .and_then(Value::as_u64)
            .map(Duration::from_secs)
            .unwrap_or(DEFAULT_TIMEOUT);
        Ok(Self {
            host: host.to_string(),
            base_url,
            username: connector_vars
                .get("username")
                .and_then(Value::as_str)
                .map(str::to_string),
            password: connector_vars
                .get("password")
                .and_then(Value::as_str)
                .map(str::to_string),
            token: connector_vars
                .get("token")
                .and_then(Value::as_str)
                .map(str::to_string),
            timeout,
            client: None,
        })
    }

    fn client(&self) -> Result<&reqwest::Client> {
        self.client
            .as_ref()
            .ok_or_else(|| Error::connector(&self.host, "connection not initialized"))
    }

    async fn get(&self, path: &str, query: &[(&str, &str)]) -> Result<String> {
        let url = format!("{}{}", self.base_url, path);
        let mut request = self.client()?.get(&url).query(query);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        } else if let Some(username) = &self.username {
            request = request.basic_auth(username, self.password.as_deref());
        }

        let response = request
            .send()
            .await
            .map_err(|e| Error::connector(&self.host, format!("request to {url} failed: {e}")))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| Error::connector(&self.host, format!("reading {url} failed: {e}")))?;
        if !status.is_success() {
            return Err(Error::connector(
                &self.host,
                format!("{url} returned {status}: {body}"),
            ));
        }
        Ok(body)
    }
}

#[async_trait]
impl Connector for MetricsConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn init(&mut self) -> Result<()> {
        self.client = Some(
            reqwest::Client::builder()
                .timeout(self.timeout)
                .build()
                .map_err(|e| Error::connector(&self.host, format!("cannot build client: {e}")))?,
        );
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        self.client = None;
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        trace!(host = %self.host, query = %command, "running instant query");
        match self.get("/api/v1/query", &[("query", command)]).await {
            Ok(body) => Ok(CommandOutput {
                stdout: body,
                stderr: String::new(),
            }),
            Err(e) => Ok(CommandOutput {
                stdout: String::new(),
                stderr: e.to_string(),
            }),
        }
    }

    async fn put_file(&self, _content: &[u8], _remote_path: &Path, _mode: u32) -> Result<()> {
        Err(Error::UnsupportedCapability {
            host: self.host.clone(),
            capability: "file transfer".to_string(),
        })
    }

    async fn fetch_file(&self, _remote_path: &Path) -> Result<Vec<u8>> {
        Err(Error::UnsupportedCapability {
            host: self.host.clone(),
            capability: "file transfer".to_string(),
        })
    }

    async fn host_info(&self) -> Result<Vars> {
        let body = self.get("/api/v1/status/buildinfo", &[]).await?;
        let info: Value = serde_json::from_str(&body)?;
        let mut facts = Vars::new();
        facts.insert("prometheus".to_string(), info);
        Ok(facts)
    }
}
