//! SSH 客户端相关领域模型

use std::env;
use std::fmt;

use crate::config::env::{flag_or, parse_or};

/// 主机密钥信任策略
#[derive(Clone, Debug, PartialEq, Default)]
pub enum HostKeyPolicy {
    /// 首次连接时记录指纹，之后必须一致
    #[default]
    TrustOnFirstUse,
    /// 只接受 known_hosts 中已登记的指纹
    Pinned,
    /// 不校验（仅限显式配置）
    Insecure,
}

impl HostKeyPolicy {
    pub fn from_str(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "tofu" | "trust_on_first_use" | "trust-on-first-use" => HostKeyPolicy::TrustOnFirstUse,
            "pinned" | "strict" => HostKeyPolicy::Pinned,
            "insecure" | "none" => HostKeyPolicy::Insecure,
            _ => HostKeyPolicy::TrustOnFirstUse,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostKeyPolicy::TrustOnFirstUse => "tofu",
            HostKeyPolicy::Pinned => "pinned",
            HostKeyPolicy::Insecure => "insecure",
        }
    }
}

/// SSH 客户端配置
#[derive(Clone, Debug)]
pub struct SshClientConfig {
    /// 建立连接超时（秒）
    pub connect_timeout_secs: u64,
    /// 单条命令超时（秒）
    pub command_timeout_secs: u64,
    /// 主机密钥策略
    pub host_key_policy: HostKeyPolicy,
    /// known_hosts 持久化文件 (None 则只在内存中)
    pub known_hosts_file: Option<String>,
    /// 特权命令是否加 sudo
    pub use_sudo: bool,
}

impl Default for SshClientConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 10,
            command_timeout_secs: 10,
            host_key_policy: HostKeyPolicy::TrustOnFirstUse,
            known_hosts_file: None,
            use_sudo: true,
        }
    }
}

impl SshClientConfig {
    /// 从环境变量加载 SSH 客户端配置
    pub fn from_env() -> Self {
        let defaults = Self::default();

        let host_key_policy = env::var("SSH_HOST_KEY_POLICY")
            .map(|v| HostKeyPolicy::from_str(&v))
            .unwrap_or_default();

        let known_hosts_file = env::var("SSH_KNOWN_HOSTS_FILE")
            .ok()
            .filter(|s| !s.is_empty());

        Self {
            connect_timeout_secs: parse_or("SSH_CONNECT_TIMEOUT_SECS", defaults.connect_timeout_secs),
            command_timeout_secs: parse_or("SSH_COMMAND_TIMEOUT_SECS", defaults.command_timeout_secs),
            host_key_policy,
            known_hosts_file,
            use_sudo: flag_or("SSH_USE_SUDO", defaults.use_sudo),
        }
    }

    /// 特权命令前缀
    pub fn sudo_prefix(&self) -> &'static str {
        if self.use_sudo {
            "sudo "
        } else {
            ""
        }
    }
}

/// SSH 认证材料（明文，仅在进程内存在）
#[derive(Clone)]
pub enum SshAuth {
    Password(String),
    PrivateKey {
        key: String,
        passphrase: Option<String>,
    },
}

impl fmt::Debug for SshAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SshAuth::Password(_) => write!(f, "Password(***)"),
            SshAuth::PrivateKey { .. } => write!(f, "PrivateKey(***)"),
        }
    }
}

/// 连接目标
#[derive(Clone, Debug)]
pub struct SshTarget {
    pub address: String,
    pub port: u16,
    pub username: String,
    pub auth: SshAuth,
}

impl SshTarget {
    /// known_hosts 键
    pub fn host_key_id(&self) -> String {
        if self.address.contains(':') {
            format!("[{}]:{}", self.address, self.port)
        } else {
            format!("{}:{}", self.address, self.port)
        }
    }
}

/// 远程命令执行结果
#[derive(Debug, Clone, Default)]
pub struct CommandOutput {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: Option<u32>,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == Some(0)
    }

    /// 去除首尾空白的 stdout
    pub fn trimmed(&self) -> &str {
        self.stdout.trim()
    }

    /// 失败时的诊断信息（优先 stderr）
    pub fn diagnostic(&self) -> String {
        let stderr = self.stderr.trim();
        if !stderr.is_empty() {
            return stderr.to_string();
        }
        match self.exit_code {
            Some(code) => format!("exit code {}", code),
            None => "no exit status".to_string(),
        }
    }
}
