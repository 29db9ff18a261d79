//! 主机与已部署组件领域模型

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::config::env::constants::DEFAULT_SSH_PORT;

/// 主机状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    #[default]
    Unknown,
    Online,
    Offline,
}

impl HostStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            HostStatus::Unknown => "unknown",
            HostStatus::Online => "online",
            HostStatus::Offline => "offline",
        }
    }
}

/// 认证方式
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
    #[default]
    Password,
    Key,
}

/// 主机来源
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DiscoveryMethod {
    #[default]
    Scan,
    Manual,
    Import,
}

/// 主机登录信息（只保存凭据引用，不保存秘密）
#[derive(Clone, Debug, Serialize, Deserialize, Default)]
pub struct HostAuth {
    pub username: String,
    pub credential_id: Option<u64>,
    pub auth_type: AuthType,
}

/// 资源信息
#[derive(Clone, Debug, Serialize, Deserialize, Default, PartialEq)]
pub struct HostFacts {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub hostname: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub os_version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub arch: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cpu_cores: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub memory_mb: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub disk_gb: Option<u64>,
}

impl HostFacts {
    /// 用新采集到的字段覆盖，缺失字段保留原值
    pub fn merge(&mut self, other: HostFacts) {
        if other.hostname.is_some() {
            self.hostname = other.hostname;
        }
        if other.os.is_some() {
            self.os = other.os;
        }
        if other.os_version.is_some() {
            self.os_version = other.os_version;
        }
        if other.arch.is_some() {
            self.arch = other.arch;
        }
        if other.cpu_cores.is_some() {
            self.cpu_cores = other.cpu_cores;
        }
        if other.memory_mb.is_some() {
            self.memory_mb = other.memory_mb;
        }
        if other.disk_gb.is_some() {
            self.disk_gb = other.disk_gb;
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == HostFacts::default()
    }
}

/// 被管理主机
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Host {
    /// 目录分配的 ID（新建时为 0）
    pub id: u64,
    pub name: String,
    /// 网络地址，全局唯一
    pub address: String,
    pub ssh_port: u16,
    pub status: HostStatus,
    pub last_seen: Option<DateTime<Utc>>,
    pub auth: HostAuth,
    #[serde(flatten)]
    pub facts: HostFacts,
    pub discovery_method: DiscoveryMethod,
    pub discovered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Host {
    /// 扫描发现的新主机
    pub fn discovered(address: impl Into<String>) -> Self {
        let address = address.into();
        let now = Utc::now();
        Self {
            id: 0,
            name: address.clone(),
            address,
            ssh_port: DEFAULT_SSH_PORT,
            status: HostStatus::Unknown,
            last_seen: None,
            auth: HostAuth::default(),
            facts: HostFacts::default(),
            discovery_method: DiscoveryMethod::Scan,
            discovered_at: Some(now),
            created_at: now,
            updated_at: now,
        }
    }

    /// 合并一次扫描观测结果，保留 id / 名称 / 创建时间
    pub fn absorb(&mut self, observed: Host) {
        self.status = observed.status;
        if observed.last_seen.is_some() {
            self.last_seen = observed.last_seen;
        }
        self.facts.merge(observed.facts);
        if self.auth.credential_id.is_none() && observed.auth.credential_id.is_some() {
            self.auth = observed.auth;
        }
        if self.name == self.address {
            if let Some(hostname) = &self.facts.hostname {
                self.name = hostname.clone();
            }
        }
        self.updated_at = Utc::now();
    }
}

/// 组件类别
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ComponentType {
    Collector,
    Storage,
    Visualization,
    Alerting,
}

/// 组件运行状态
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ComponentStatus {
    #[default]
    Unknown,
    Running,
    Stopped,
    Failed,
}

impl ComponentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ComponentStatus::Unknown => "unknown",
            ComponentStatus::Running => "running",
            ComponentStatus::Stopped => "stopped",
            ComponentStatus::Failed => "failed",
        }
    }
}

/// 部署方式
#[derive(Clone, Copy, Debug, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DeployMethod {
    #[default]
    Container,
    Binary,
    ServiceManager,
}

impl DeployMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeployMethod::Container => "container",
            DeployMethod::Binary => "binary",
            DeployMethod::ServiceManager => "service_manager",
        }
    }
}

/// 部署在主机上的监控组件
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct DeployedComponent {
    pub host_id: u64,
    pub name: String,
    #[serde(rename = "type")]
    pub component_type: ComponentType,
    pub version: String,
    pub status: ComponentStatus,
    pub port: u16,
    pub deploy_method: DeployMethod,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config_path: Option<String>,
    pub deployed_at: DateTime<Utc>,
}
