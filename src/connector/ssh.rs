//! SSH connector built on russh.
//!
//! Commands run over exec channels; file transfer uses the SFTP subsystem.
//! Authentication tries a configured private key, the usual default
//! identity files, then password. Host keys are accepted on first
//! connection — pinning them is the deployment's concern, not the engine's.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use russh::client::{self, Handle, Handler};
use russh::keys::key::PublicKey;
use russh::keys::load_secret_key;
use russh::ChannelMsg;
use russh_sftp::client::SftpSession;
use serde_json::Value;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::{debug, trace, warn};

use super::{facts, CommandOutput, Connector};
use crate::error::{Error, Result};
use crate::vars::{keys, Vars};

/// Default SSH port.
const DEFAULT_PORT: u16 = 22;

/// Default remote user.
const DEFAULT_USER: &str = "root";

/// Connection timeout.
const CONNECT_TIMEOUT: Duration = Duration::from_secs(30);

struct ClientHandler;

#[async_trait]
impl Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        _server_public_key: &PublicKey,
    ) -> std::result::Result<bool, Self::Error> {
        Ok(true)
    }
}

/// Connector reaching a host over SSH.
pub struct SshConnector {
    host: String,
    address: String,
    port: u16,
    user: String,
    password: Option<String>,
    private_key: Option<PathBuf>,
    passphrase: Option<String>,
    handle: Option<Handle<ClientHandler>>,
}

impl SshConnector {
    /// Build an (unconnected) SSH connector from the host's variables.
    ///
    /// The address falls back from `connector.host` to the host's
    /// `internal_ipv4` to the inventory hostname itself.
    pub fn new(host: &str, vars: &Vars, connector_vars: &Vars) -> Self {
        let address = connector_vars
            .get("host")
            .and_then(Value::as_str)
            .or_else(|| vars.get(keys::INTERNAL_IPV4).and_then(Value::as_str))
            .unwrap_or(host)
            .to_string();
        Self {
            host: host.to_string(),
            address,
            port: connector_vars
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(DEFAULT_PORT),
            user: connector_vars
                .get("user")
                .and_then(Value::as_str)
                .unwrap_or(DEFAULT_USER)
                .to_string(),
            password: connector_vars
                .get("password")
                .and_then(Value::as_str)
                .map(str::to_string),
            private_key: connector_vars
                .get("private_key")
                .and_then(Value::as_str)
                .map(PathBuf::from),
            passphrase: connector_vars
                .get("passphrase")
                .and_then(Value::as_str)
                .map(str::to_string),
            handle: None,
        }
    }

    fn handle(&self) -> Result<&Handle<ClientHandler>> {
        self.handle
            .as_ref()
            .ok_or_else(|| Error::connector(&self.host, "connection not initialized"))
    }

    async fn authenticate(&self, session: &mut Handle<ClientHandler>) -> Result<()> {
        let mut candidates: Vec<PathBuf> = Vec::new();
        if let Some(key) = &self.private_key {
            candidates.push(key.clone());
        } else if let Ok(home) = std::env::var("HOME") {
            candidates.push(Path::new(&home).join(".ssh/id_ed25519"));
            candidates.push(Path::new(&home).join(".ssh/id_rsa"));
        }

        for key_path in &candidates {
            if !key_path.exists() {
                continue;
            }
            match self.try_key_auth(session, key_path).await {
                Ok(()) => {
                    debug!(host = %self.host, key = %key_path.display(), "authenticated with key");
                    return Ok(());
                }
                Err(e) => {
                    warn!(host = %self.host, key = %key_path.display(), error = %e, "key auth failed");
                }
            }
        }

        if let Some(password) = &self.password {
            let authenticated = session
                .authenticate_password(&self.user, password)
                .await
                .map_err(|e| {
                    Error::connector(&self.host, format!("password authentication failed: {e}"))
                })?;
            if authenticated {
                debug!(host = %self.host, "authenticated with password");
                return Ok(());
            }
        }

        Err(Error::connector(&self.host, "all authentication methods failed"))
    }

    async fn try_key_auth(
        &self,
        session: &mut Handle<ClientHandler>,
        key_path: &Path,
    ) -> Result<()> {
        let key_pair = load_secret_key(key_path, self.passphrase.as_deref()).map_err(|e| {
            Error::connector(&self.host, format!("cannot load key {}: {e}", key_path.display()))
        })?;
        let authenticated = session
            .authenticate_publickey(&self.user, Arc::new(key_pair))
            .await
            .map_err(|e| Error::connector(&self.host, format!("key authentication failed: {e}")))?;
        if authenticated {
            Ok(())
        } else {
            Err(Error::connector(&self.host, "key rejected"))
        }
    }

    async fn open_sftp(&self) -> Result<SftpSession> {
        let channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot open channel: {e}")))?;
        channel
            .request_subsystem(true, "sftp")
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot request sftp: {e}")))?;
        SftpSession::new(channel.into_stream())
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot start sftp: {e}")))
    }

    async fn create_remote_dirs(&self, sftp: &SftpSession, path: &Path) -> Result<()> {
        let mut current = PathBuf::new();
        for component in path.components() {
            current.push(component);
            if current.to_string_lossy() == "/" {
                continue;
            }
            // Existing directories make this fail; that is fine.
            let _ = sftp.create_dir(current.to_string_lossy().to_string()).await;
        }
        Ok(())
    }
}

#[async_trait]
impl Connector for SshConnector {
    fn host(&self) -> &str {
        &self.host
    }

    async fn init(&mut self) -> Result<()> {
        let mut config = client::Config::default();
        config.inactivity_timeout = Some(CONNECT_TIMEOUT);
        let config = Arc::new(config);

        let addr = format!("{}:{}", self.address, self.port);
        debug!(host = %self.host, addr = %addr, user = %self.user, "connecting via ssh");

        let socket = tokio::time::timeout(CONNECT_TIMEOUT, tokio::net::TcpStream::connect(&addr))
            .await
            .map_err(|_| Error::connector(&self.host, format!("connect to {addr} timed out")))?
            .map_err(|e| Error::connector(&self.host, format!("connect to {addr} failed: {e}")))?;
        socket
            .set_nodelay(true)
            .map_err(|e| Error::connector(&self.host, format!("cannot set TCP_NODELAY: {e}")))?;

        let mut session = client::connect_stream(config, socket, ClientHandler)
            .await
            .map_err(|e| Error::connector(&self.host, format!("ssh handshake failed: {e}")))?;

        self.authenticate(&mut session).await?;
        self.handle = Some(session);
        Ok(())
    }

    async fn close(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let _ = handle
                .disconnect(russh::Disconnect::ByApplication, "", "en")
                .await;
        }
        Ok(())
    }

    async fn execute_command(&self, command: &str) -> Result<CommandOutput> {
        trace!(host = %self.host, command = %command, "executing remote command");
        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot open channel: {e}")))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| Error::connector(&self.host, format!("exec failed: {e}")))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;
        while let Some(msg) = channel.wait().await {
            match msg {
                ChannelMsg::Data { ref data } => stdout.extend_from_slice(data),
                ChannelMsg::ExtendedData { ref data, ext } => {
                    if ext == 1 {
                        stderr.extend_from_slice(data);
                    }
                }
                ChannelMsg::ExitStatus { exit_status } => exit_code = Some(exit_status),
                ChannelMsg::Close => break,
                _ => {}
            }
        }
        let _ = channel.eof().await;

        let stdout = String::from_utf8_lossy(&stdout).to_string();
        let mut stderr = String::from_utf8_lossy(&stderr).to_string();
        if exit_code.unwrap_or(0) != 0 && stderr.is_empty() {
            stderr = format!("command exited with code {}", exit_code.unwrap_or(0));
        }
        Ok(CommandOutput { stdout, stderr })
    }

    async fn put_file(&self, content: &[u8], remote_path: &Path, mode: u32) -> Result<()> {
        let sftp = self.open_sftp().await?;
        if let Some(parent) = remote_path.parent() {
            self.create_remote_dirs(&sftp, parent).await?;
        }

        let remote = remote_path.to_string_lossy().to_string();
        let mut file = sftp
            .create(&remote)
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot create {remote}: {e}")))?;
        file.write_all(content)
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot write {remote}: {e}")))?;
        drop(file);

        let mut attrs = russh_sftp::protocol::FileAttributes::default();
        attrs.permissions = Some(mode);
        sftp.set_metadata(&remote, attrs)
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot chmod {remote}: {e}")))?;
        Ok(())
    }

    async fn fetch_file(&self, remote_path: &Path) -> Result<Vec<u8>> {
        let sftp = self.open_sftp().await?;
        let remote = remote_path.to_string_lossy().to_string();
        let mut file = sftp
            .open(&remote)
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot open {remote}: {e}")))?;
        let mut content = Vec::new();
        file.read_to_end(&mut content)
            .await
            .map_err(|e| Error::connector(&self.host, format!("cannot read {remote}: {e}")))?;
        Ok(content)
    }

    async fn host_info(&self) -> Result<Vars> {
        facts::gather_facts(self).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_address_fallback_chain() {
        let vars = json!({"internal_ipv4": "10.0.0.5"}).as_object().cloned().unwrap();
        let conn = SshConnector::new("node1", &vars, &Vars::new());
        assert_eq!(conn.address, "10.0.0.5");
        assert_eq!(conn.port, DEFAULT_PORT);
        assert_eq!(conn.user, DEFAULT_USER);

        let connector_vars = json!({"host": "bastion", "port": 2222, "user": "ops"})
            .as_object()
            .cloned()
            .unwrap();
        let conn = SshConnector::new("node1", &Vars::new(), &connector_vars);
        assert_eq!(conn.address, "bastion");
        assert_eq!(conn.port, 2222);
        assert_eq!(conn.user, "ops");
    }

    #[tokio::test]
    async fn test_execute_before_init_fails() {
        let conn = SshConnector::new("node1", &Vars::new(), &Vars::new());
        assert!(conn.execute_command("true").await.is_err());
    }
}
