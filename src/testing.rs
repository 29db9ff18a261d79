//! 测试用替身：脚本化的探测器与远程连接

use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use crate::domain::ssh::{CommandOutput, SshTarget};
use crate::infra::ssh::{RemoteConnector, RemoteSession, SshError};
use crate::services::prober::Probe;

/// 预设可达主机及其开放端口
#[derive(Default)]
pub struct ScriptedProbe {
    hosts: HashMap<IpAddr, Vec<u16>>,
}

impl ScriptedProbe {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, ip: IpAddr, open_ports: &[u16]) -> Self {
        self.hosts.insert(ip, open_ports.to_vec());
        self
    }
}

#[async_trait]
impl Probe for ScriptedProbe {
    async fn reachable(&self, ip: IpAddr, _timeout: Duration) -> Option<Duration> {
        self.hosts.contains_key(&ip).then(|| Duration::from_millis(1))
    }

    async fn port_open(&self, ip: IpAddr, port: u16, _timeout: Duration) -> bool {
        self.hosts
            .get(&ip)
            .map(|ports| ports.contains(&port))
            .unwrap_or(false)
    }
}

#[derive(Clone)]
enum Reply {
    Output(CommandOutput),
    Hang,
}

#[derive(Default)]
struct HostState {
    replies: Vec<(String, Reply)>,
    commands: Vec<String>,
    files: HashMap<String, Vec<u8>>,
    reject_writes: bool,
}

/// 脚本化主机：命令按子串匹配预设输出，未匹配的命令成功且无输出
#[derive(Clone, Default)]
pub struct ScriptedHost {
    state: Arc<Mutex<HostState>>,
    open: Arc<AtomicUsize>,
}

impl ScriptedHost {
    pub fn new() -> Self {
        Self::default()
    }

    fn push(self, pattern: &str, reply: Reply) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.replies.push((pattern.to_string(), reply));
        }
        self
    }

    pub fn respond(self, pattern: &str, stdout: &str) -> Self {
        self.push(
            pattern,
            Reply::Output(CommandOutput {
                stdout: stdout.to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            }),
        )
    }

    pub fn fail(self, pattern: &str, stderr: &str) -> Self {
        self.push(
            pattern,
            Reply::Output(CommandOutput {
                stdout: String::new(),
                stderr: stderr.to_string(),
                exit_code: Some(1),
            }),
        )
    }

    /// 匹配的命令永不返回
    pub fn hang(self, pattern: &str) -> Self {
        self.push(pattern, Reply::Hang)
    }

    pub fn reject_writes(self) -> Self {
        if let Ok(mut state) = self.state.lock() {
            state.reject_writes = true;
        }
        self
    }

    pub fn commands(&self) -> Vec<String> {
        self.state
            .lock()
            .map(|s| s.commands.clone())
            .unwrap_or_default()
    }

    pub fn file(&self, path: &str) -> Option<String> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.files.get(path).cloned())
            .map(|b| String::from_utf8_lossy(&b).to_string())
    }

    pub fn open_sessions(&self) -> usize {
        self.open.load(Ordering::SeqCst)
    }
}

/// 按地址分派到脚本化主机；未登记的地址连接失败
#[derive(Default)]
pub struct ScriptedConnector {
    hosts: HashMap<String, ScriptedHost>,
    reject_auth: Vec<String>,
}

impl ScriptedConnector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn host(mut self, address: &str, host: ScriptedHost) -> Self {
        self.hosts.insert(address.to_string(), host);
        self
    }

    pub fn reject_auth(mut self, address: &str) -> Self {
        self.reject_auth.push(address.to_string());
        self
    }
}

#[async_trait]
impl RemoteConnector for ScriptedConnector {
    async fn connect(&self, target: &SshTarget) -> Result<Box<dyn RemoteSession>, SshError> {
        let host = self
            .hosts
            .get(&target.address)
            .ok_or_else(|| SshError::Connect {
                address: target.host_key_id(),
                message: "connection refused".to_string(),
            })?;
        if self.reject_auth.contains(&target.address) {
            return Err(SshError::AuthenticationRejected {
                user: target.username.clone(),
            });
        }

        host.open.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(ScriptedSession {
            host: host.clone(),
            closed: false,
        }))
    }
}

struct ScriptedSession {
    host: ScriptedHost,
    closed: bool,
}

#[async_trait]
impl RemoteSession for ScriptedSession {
    async fn exec(&self, command: &str, _timeout: Duration) -> Result<CommandOutput, SshError> {
        let reply = {
            let mut state = self
                .host
                .state
                .lock()
                .map_err(|_| SshError::Channel("poisoned".to_string()))?;
            state.commands.push(command.to_string());
            state
                .replies
                .iter()
                .find(|(pattern, _)| command.contains(pattern.as_str()))
                .map(|(_, reply)| reply.clone())
        };

        match reply {
            Some(Reply::Output(output)) => Ok(output),
            Some(Reply::Hang) => {
                std::future::pending::<()>().await;
                Err(SshError::Closed)
            }
            None => Ok(CommandOutput {
                exit_code: Some(0),
                ..Default::default()
            }),
        }
    }

    async fn write_file(&self, path: &str, content: &[u8]) -> Result<(), SshError> {
        let mut state = self
            .host
            .state
            .lock()
            .map_err(|_| SshError::Channel("poisoned".to_string()))?;
        if state.reject_writes {
            return Err(SshError::RemoteWrite {
                path: path.to_string(),
                message: "permission denied".to_string(),
            });
        }
        state.files.insert(path.to_string(), content.to_vec());
        Ok(())
    }

    async fn close(&mut self) {
        if !self.closed {
            self.closed = true;
            self.host.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}

impl Drop for ScriptedSession {
    fn drop(&mut self) {
        if !self.closed {
            self.host.open.fetch_sub(1, Ordering::SeqCst);
        }
    }
}
