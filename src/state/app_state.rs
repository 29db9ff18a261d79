//! 应用状态

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::env::PlatformConfig;
use crate::infra::host_directory::MemoryHostDirectory;
use crate::infra::known_hosts::KnownHosts;
use crate::infra::ssh::{RemoteConnector, SshConnector};
use crate::infra::templates::{HandlebarsCatalog, TemplateCatalog};
use crate::services::prober::{Probe, SystemProbe};
use crate::services::vault::{AesGcmVault, Vault};
use crate::services::{
    ConnectionTester, CredentialRepository, DeploymentEngine, DiscoveryEngine, TaskDeps,
};

use super::event_hub::EventHub;
use super::task_registry::TaskRegistry;
use super::task_store::MemoryTaskStore;

/// 应用状态
pub struct AppState {
    // ========== 核心配置 ==========
    /// 平台配置
    pub config: PlatformConfig,
    /// 服务启动时间
    pub started_at: DateTime<Utc>,

    // ========== 任务管理 ==========
    /// 任务快照存储
    pub store: Arc<MemoryTaskStore>,
    /// 任务事件中心
    pub events: Arc<EventHub>,
    /// 运行中任务的取消令牌
    pub registry: Arc<TaskRegistry>,

    // ========== 主机与凭据 ==========
    pub hosts: Arc<MemoryHostDirectory>,
    pub credentials: Arc<CredentialRepository>,
    /// 单台主机连通性检查
    pub connections: Arc<ConnectionTester>,

    // ========== 任务引擎 ==========
    pub discovery: Arc<DiscoveryEngine>,
    pub deployment: Arc<DeploymentEngine>,
}

impl AppState {
    /// 按配置创建应用状态
    ///
    /// 配置了 known_hosts 文件时从文件加载主机指纹
    pub async fn new(config: PlatformConfig) -> anyhow::Result<Self> {
        tracing::info!(
            port = config.port,
            instance_id = %config.instance_id,
            scan_concurrency = config.scan.concurrency,
            use_icmp = config.scan.use_icmp,
            deploy_concurrency = config.deploy.concurrency,
            host_key_policy = config.ssh.host_key_policy.as_str(),
            encryption_key = config.encryption_key.is_some(),
            "Loaded configuration"
        );

        let known_hosts = match &config.ssh.known_hosts_file {
            Some(path) => KnownHosts::load(path).await?,
            None => KnownHosts::in_memory(),
        };

        let vault = Arc::new(AesGcmVault::from_config(config.encryption_key.as_deref()));
        let connector = Arc::new(SshConnector::new(config.ssh.clone(), Arc::new(known_hosts)));
        let probe = Arc::new(SystemProbe::new(config.scan.use_icmp));
        let templates = Arc::new(HandlebarsCatalog::new()?);

        Ok(Self::with_parts(config, probe, connector, vault, templates))
    }

    /// 用给定的探测器、远程连接器、加密器和模板目录组装状态
    pub fn with_parts(
        config: PlatformConfig,
        probe: Arc<dyn Probe>,
        connector: Arc<dyn RemoteConnector>,
        vault: Arc<dyn Vault>,
        templates: Arc<dyn TemplateCatalog>,
    ) -> Self {
        let store = Arc::new(MemoryTaskStore::new());
        let events = Arc::new(EventHub::new());
        let registry = Arc::new(TaskRegistry::new());
        let hosts = Arc::new(MemoryHostDirectory::new());
        let credentials = Arc::new(CredentialRepository::new(vault));

        let deps = TaskDeps {
            store: store.clone(),
            events: events.clone(),
            hosts: hosts.clone(),
            credentials: credentials.clone(),
            connector,
            registry: registry.clone(),
        };

        let connections = Arc::new(ConnectionTester::new(&config, deps.clone(), probe.clone()));
        let discovery = Arc::new(DiscoveryEngine::new(&config, deps.clone(), probe));
        let deployment = Arc::new(DeploymentEngine::new(&config, deps, templates));

        Self {
            config,
            started_at: Utc::now(),
            store,
            events,
            registry,
            hosts,
            credentials,
            connections,
            discovery,
            deployment,
        }
    }

    /// 取消运行中的任务（发现或部署）
    pub async fn cancel_task(&self, task_id: &str) -> bool {
        let cancelled = self.registry.cancel(task_id).await;
        if cancelled {
            tracing::info!(task_id = %task_id, "Task cancellation requested");
        }
        cancelled
    }

    /// 清理过期快照和已结束的事件通道
    pub async fn cleanup(&self) -> (usize, usize) {
        let snapshots = self.store.cleanup_expired().await;
        let channels = self.events.cleanup(self.config.task_ttl_hours).await;
        if snapshots > 0 || channels > 0 {
            tracing::info!(snapshots, channels, "Cleaned up expired task state");
        }
        (snapshots, channels)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::discovery::{DiscoverySpec, DiscoveryStatus, PortsInput};
    use crate::infra::host_directory::HostDirectory;
    use crate::testing::{ScriptedConnector, ScriptedProbe};

    fn state() -> AppState {
        let probe = ScriptedProbe::new().host("10.1.0.2".parse().unwrap(), &[80]);
        AppState::with_parts(
            PlatformConfig::default(),
            Arc::new(probe),
            Arc::new(ScriptedConnector::new()),
            Arc::new(AesGcmVault::from_key(&[9u8; 32])),
            Arc::new(HandlebarsCatalog::new().unwrap()),
        )
    }

    #[tokio::test]
    async fn test_engines_share_host_directory() {
        let state = state();
        let task = state
            .discovery
            .create(DiscoverySpec {
                name: String::new(),
                ip_range: "10.1.0.1-10.1.0.3".to_string(),
                ports: PortsInput::Text("80".to_string()),
                timeout_secs: Some(1),
                credential_id: None,
            })
            .await
            .unwrap();

        let handle = state.discovery.start(&task.id).await.unwrap();
        handle.wait().await.unwrap();

        let done = state.discovery.get(&task.id).await.unwrap();
        assert_eq!(done.status, DiscoveryStatus::Completed);
        assert!(!state.registry.is_running(&task.id).await);

        let hosts = state.hosts.list_hosts().await;
        assert_eq!(hosts.len(), 1);
        let online = state.hosts.find_by_address("10.1.0.2").await.unwrap();
        assert!(state
            .deployment
            .get_host_components(online.id)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn test_connection_check_updates_shared_directory() {
        let state = state();
        let host = state
            .hosts
            .upsert_host(crate::domain::host::Host::discovered("10.1.0.2"))
            .await;

        let report = state.connections.test_host(host.id).await.unwrap();
        assert_eq!(report.status, crate::domain::host::HostStatus::Online);
        assert!(report.checks[0].success);
        assert!(!report.checks[1].success);

        let stored = state.hosts.get_host(host.id).await.unwrap();
        assert_eq!(stored.status, crate::domain::host::HostStatus::Online);
        assert!(stored.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_shutdown_drains_running_tasks() {
        let target = crate::testing::ScriptedHost::new().hang("hostname");
        let state = AppState::with_parts(
            PlatformConfig::default(),
            Arc::new(ScriptedProbe::new().host("10.1.0.5".parse().unwrap(), &[22])),
            Arc::new(ScriptedConnector::new().host("10.1.0.5", target)),
            Arc::new(AesGcmVault::from_key(&[9u8; 32])),
            Arc::new(HandlebarsCatalog::new().unwrap()),
        );
        let credential = state
            .credentials
            .create(crate::domain::credential::NewCredential {
                name: "lab".to_string(),
                description: None,
                username: "root".to_string(),
                auth_type: crate::domain::host::AuthType::Password,
                password: Some("pw".to_string()),
                private_key: None,
                passphrase: None,
                ranges: vec![],
                tags: vec![],
            })
            .await
            .unwrap();
        let task = state
            .discovery
            .create(DiscoverySpec {
                name: String::new(),
                ip_range: "10.1.0.5".to_string(),
                ports: PortsInput::Text("22".to_string()),
                timeout_secs: Some(1),
                credential_id: Some(credential.id),
            })
            .await
            .unwrap();
        let _handle = state.discovery.start(&task.id).await.unwrap();

        state.registry.shutdown();
        assert!(state.registry.drain(std::time::Duration::from_secs(5)).await);

        let done = state.discovery.get(&task.id).await.unwrap();
        assert_eq!(done.status, DiscoveryStatus::Failed);
        assert_eq!(done.error.as_deref(), Some("cancelled"));
    }

    #[tokio::test]
    async fn test_cancel_unknown_task() {
        let state = state();
        assert!(!state.cancel_task("missing").await);
        assert_eq!(state.cleanup().await, (0, 0));
    }
}
