//! SSH 客户端
//!
//! 一次连接对应一台主机；每条命令 / 每次写文件各自打开独立的 channel。
//! 会话在 `close()` 时显式断开，其他退出路径由 `Drop` 兜底断开。

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use russh::client;
use russh::{ChannelMsg, Disconnect};
use russh_keys::key::PublicKey;
use thiserror::Error;
use tokio::net::TcpStream;
use tracing::{debug, warn};

use crate::domain::ssh::{CommandOutput, HostKeyPolicy, SshAuth, SshClientConfig, SshTarget};
use crate::infra::known_hosts::{HostKeyVerdict, KnownHosts};

/// SSH 错误
#[derive(Debug, Error)]
pub enum SshError {
    #[error("failed to connect to {address}: {message}")]
    Connect { address: String, message: String },

    #[error("{0} timed out")]
    Timeout(String),

    #[error("ssh handshake with {address} failed: {message}")]
    Handshake { address: String, message: String },

    #[error("host key for {host} rejected: {reason}")]
    HostKeyRejected { host: String, reason: String },

    #[error("authentication rejected for user {user}")]
    AuthenticationRejected { user: String },

    #[error("invalid private key: {0}")]
    InvalidKey(String),

    #[error("channel error: {0}")]
    Channel(String),

    #[error("failed to write {path}: {message}")]
    RemoteWrite { path: String, message: String },

    #[error("session already closed")]
    Closed,
}

/// 建立远程会话
#[async_trait]
pub trait RemoteConnector: Send + Sync {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError>;
}

/// 一条已认证的远程连接
#[async_trait]
pub trait RemoteSession: Send + Sync {
    /// 执行命令并收集输出
    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SshError>;

    /// 把内容写入远程路径（目录需已存在）
    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SshError>;

    /// 断开连接
    async fn close(&mut self);
}

/// 对字符串做单引号 shell 转义
pub fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', "'\\''"))
}

/// russh 客户端回调
struct ClientHandler {
    host_id: String,
    known_hosts: Arc<KnownHosts>,
    policy: HostKeyPolicy,
    /// 密钥被拒绝时记录原因，供 connect 返回
    rejection: Arc<Mutex<Option<String>>>,
}

#[async_trait]
impl client::Handler for ClientHandler {
    type Error = russh::Error;

    async fn check_server_key(
        &mut self,
        server_public_key: &PublicKey,
    ) -> Result<bool, Self::Error> {
        let fingerprint = server_public_key.fingerprint();
        let verdict = self
            .known_hosts
            .verify(&self.host_id, &fingerprint, &self.policy)
            .await;

        let reason = match &verdict {
            HostKeyVerdict::Mismatch { expected } => Some(format!(
                "fingerprint {} does not match recorded {}",
                fingerprint, expected
            )),
            HostKeyVerdict::Unknown => Some(format!("fingerprint {} is not pinned", fingerprint)),
            _ => None,
        };

        if let Some(reason) = reason {
            warn!(host = %self.host_id, reason = %reason, "Rejecting server host key");
            if let Ok(mut slot) = self.rejection.lock() {
                *slot = Some(reason);
            }
            return Ok(false);
        }

        if verdict == HostKeyVerdict::Unchecked {
            debug!(host = %self.host_id, "Host key verification disabled");
        }
        Ok(true)
    }
}

/// 基于 russh 的连接器
pub struct SshConnector {
    config: SshClientConfig,
    known_hosts: Arc<KnownHosts>,
}

impl SshConnector {
    pub fn new(config: SshClientConfig, known_hosts: Arc<KnownHosts>) -> Self {
        Self {
            config,
            known_hosts,
        }
    }
}

#[async_trait]
impl RemoteConnector for SshConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError> {
        let address = target.host_key_id();
        let timeout = Duration::from_secs(self.config.connect_timeout_secs);

        let russh_config = Arc::new(client::Config {
            inactivity_timeout: Some(Duration::from_secs(
                self.config.command_timeout_secs.max(60) * 10,
            )),
            ..Default::default()
        });

        let stream = tokio::time::timeout(
            timeout,
            TcpStream::connect((target.address.as_str(), target.port)),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("connect to {}", address)))?
        .map_err(|e| SshError::Connect {
            address: address.clone(),
            message: e.to_string(),
        })?;

        let rejection = Arc::new(Mutex::new(None));
        let handler = ClientHandler {
            host_id: address.clone(),
            known_hosts: self.known_hosts.clone(),
            policy: self.config.host_key_policy.clone(),
            rejection: rejection.clone(),
        };

        let mut handle = tokio::time::timeout(
            timeout,
            client::connect_stream(russh_config, stream, handler),
        )
        .await
        .map_err(|_| SshError::Timeout(format!("ssh handshake with {}", address)))?
        .map_err(|e| {
            let rejected = rejection.lock().ok().and_then(|mut slot| slot.take());
            match rejected {
                Some(reason) => SshError::HostKeyRejected {
                    host: address.clone(),
                    reason,
                },
                None => SshError::Handshake {
                    address: address.clone(),
                    message: e.to_string(),
                },
            }
        })?;

        let authenticated = match &target.auth {
            SshAuth::Password(password) => handle
                .authenticate_password(target.username.as_str(), password.as_str())
                .await
                .map_err(|e| SshError::Handshake {
                    address: address.clone(),
                    message: e.to_string(),
                })?,
            SshAuth::PrivateKey { key, passphrase } => {
                let key_pair = russh_keys::decode_secret_key(key, passphrase.as_deref())
                    .map_err(|e| SshError::InvalidKey(e.to_string()))?;
                handle
                    .authenticate_publickey(target.username.as_str(), Arc::new(key_pair))
                    .await
                    .map_err(|e| SshError::Handshake {
                        address: address.clone(),
                        message: e.to_string(),
                    })?
            }
        };

        if !authenticated {
            let _ = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await;
            return Err(SshError::AuthenticationRejected {
                user: target.username.clone(),
            });
        }

        debug!(host = %address, user = %target.username, "SSH session established");

        Ok(Box::new(SshSession {
            handle: Some(handle),
            address,
            use_sudo: self.config.use_sudo,
        }))
    }
}

/// 已认证的 SSH 会话
pub struct SshSession {
    handle: Option<client::Handle<ClientHandler>>,
    address: String,
    use_sudo: bool,
}

impl SshSession {
    fn handle(&self) -> Result<&client::Handle<ClientHandler>, SshError> {
        self.handle.as_ref().ok_or(SshError::Closed)
    }

    async fn run(&self, command: &str) -> Result<CommandOutput, SshError> {
        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        channel
            .exec(true, command)
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        let mut exit_code = None;

        loop {
            match channel.wait().await {
                Some(ChannelMsg::Data { data }) => stdout.extend_from_slice(&data),
                Some(ChannelMsg::ExtendedData { data, ext }) => {
                    if ext == 1 {
                        stderr.extend_from_slice(&data);
                    }
                }
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        Ok(CommandOutput {
            stdout: String::from_utf8_lossy(&stdout).to_string(),
            stderr: String::from_utf8_lossy(&stderr).to_string(),
            exit_code,
        })
    }
}

#[async_trait]
impl RemoteSession for SshSession {
    async fn exec(&self, command: &str, timeout: Duration) -> Result<CommandOutput, SshError> {
        debug!(host = %self.address, command = %command, "Executing remote command");
        tokio::time::timeout(timeout, self.run(command))
            .await
            .map_err(|_| SshError::Timeout(format!("command `{}`", command)))?
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SshError> {
        let command = if self.use_sudo {
            format!("sudo tee {} > /dev/null", shell_quote(path))
        } else {
            format!("cat > {}", shell_quote(path))
        };
        let write_err = |message: String| SshError::RemoteWrite {
            path: path.to_string(),
            message,
        };

        let mut channel = self
            .handle()?
            .channel_open_session()
            .await
            .map_err(|e| SshError::Channel(e.to_string()))?;
        channel
            .exec(true, command)
            .await
            .map_err(|e| write_err(e.to_string()))?;
        channel.data(content).await.map_err(|e| write_err(e.to_string()))?;
        channel.eof().await.map_err(|e| write_err(e.to_string()))?;

        let mut stderr = Vec::new();
        let mut exit_code = None;
        loop {
            match channel.wait().await {
                Some(ChannelMsg::ExtendedData { data, .. }) => stderr.extend_from_slice(&data),
                Some(ChannelMsg::ExitStatus { exit_status }) => exit_code = Some(exit_status),
                Some(ChannelMsg::Close) | None => break,
                _ => {}
            }
        }

        match exit_code {
            Some(0) => {
                debug!(host = %self.address, path = %path, bytes = content.len(), "Remote file written");
                Ok(())
            }
            _ => Err(write_err(
                String::from_utf8_lossy(&stderr).trim().to_string(),
            )),
        }
    }

    async fn close(&mut self) {
        if let Some(handle) = self.handle.take() {
            if let Err(e) = handle
                .disconnect(Disconnect::ByApplication, "", "en")
                .await
            {
                debug!(host = %self.address, error = %e, "SSH disconnect failed");
            }
        }
    }
}

impl Drop for SshSession {
    fn drop(&mut self) {
        let Some(handle) = self.handle.take() else {
            return;
        };
        let address = self.address.clone();
        if let Ok(runtime) = tokio::runtime::Handle::try_current() {
            runtime.spawn(async move {
                let _ = handle
                    .disconnect(Disconnect::ByApplication, "", "en")
                    .await;
                debug!(host = %address, "SSH session dropped without close");
            });
        }
    }
}
