//! 主机目录
//!
//! 按地址唯一的主机记录，以及每台主机上已部署的组件

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::RwLock;

use crate::domain::host::{ComponentStatus, DeployedComponent, Host};

#[async_trait]
pub trait HostDirectory: Send + Sync {
    async fn get_host(&self, id: u64) -> Option<Host>;

    async fn find_by_address(&self, address: &str) -> Option<Host>;

    /// 按地址插入或合并，返回存储后的记录
    async fn upsert_host(&self, host: Host) -> Host;

    async fn list_hosts(&self) -> Vec<Host>;

    async fn components(&self, host_id: u64) -> Vec<DeployedComponent>;

    /// 按 (host_id, name) 插入或替换
    async fn record_component(&self, component: DeployedComponent);

    async fn update_component_status(&self, host_id: u64, name: &str, status: ComponentStatus);

    async fn remove_component(&self, host_id: u64, name: &str) -> bool;
}

#[derive(Default)]
struct DirectoryInner {
    next_id: u64,
    hosts: HashMap<u64, Host>,
    by_address: HashMap<String, u64>,
    components: HashMap<u64, Vec<DeployedComponent>>,
}

/// 内存实现
#[derive(Default)]
pub struct MemoryHostDirectory {
    inner: RwLock<DirectoryInner>,
}

impl MemoryHostDirectory {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HostDirectory for MemoryHostDirectory {
    async fn get_host(&self, id: u64) -> Option<Host> {
        self.inner.read().await.hosts.get(&id).cloned()
    }

    async fn find_by_address(&self, address: &str) -> Option<Host> {
        let inner = self.inner.read().await;
        inner
            .by_address
            .get(address)
            .and_then(|id| inner.hosts.get(id))
            .cloned()
    }

    async fn upsert_host(&self, host: Host) -> Host {
        let mut inner = self.inner.write().await;

        if let Some(id) = inner.by_address.get(&host.address).copied() {
            if let Some(existing) = inner.hosts.get_mut(&id) {
                existing.absorb(host);
                return existing.clone();
            }
        }

        inner.next_id += 1;
        let mut host = host;
        host.id = inner.next_id;
        inner.by_address.insert(host.address.clone(), host.id);
        inner.hosts.insert(host.id, host.clone());
        host
    }

    async fn list_hosts(&self) -> Vec<Host> {
        let inner = self.inner.read().await;
        let mut hosts: Vec<Host> = inner.hosts.values().cloned().collect();
        hosts.sort_by_key(|h| h.id);
        hosts
    }

    async fn components(&self, host_id: u64) -> Vec<DeployedComponent> {
        self.inner
            .read()
            .await
            .components
            .get(&host_id)
            .cloned()
            .unwrap_or_default()
    }

    async fn record_component(&self, component: DeployedComponent) {
        let mut inner = self.inner.write().await;
        let list = inner.components.entry(component.host_id).or_default();
        match list.iter_mut().find(|c| c.name == component.name) {
            Some(existing) => *existing = component,
            None => list.push(component),
        }
    }

    async fn update_component_status(&self, host_id: u64, name: &str, status: ComponentStatus) {
        let mut inner = self.inner.write().await;
        if let Some(component) = inner
            .components
            .get_mut(&host_id)
            .and_then(|list| list.iter_mut().find(|c| c.name == name))
        {
            component.status = status;
        }
        if let Some(host) = inner.hosts.get_mut(&host_id) {
            host.updated_at = Utc::now();
        }
    }

    async fn remove_component(&self, host_id: u64, name: &str) -> bool {
        let mut inner = self.inner.write().await;
        match inner.components.get_mut(&host_id) {
            Some(list) => {
                let before = list.len();
                list.retain(|c| c.name != name);
                list.len() != before
            }
            None => false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::host::{ComponentType, DeployMethod, HostStatus};

    #[tokio::test]
    async fn test_upsert_is_idempotent_by_address() {
        let dir = MemoryHostDirectory::new();

        let first = dir.upsert_host(Host::discovered("10.0.0.5")).await;
        let mut again = Host::discovered("10.0.0.5");
        again.status = HostStatus::Online;
        let second = dir.upsert_host(again).await;

        assert_eq!(first.id, second.id);
        assert_eq!(second.status, HostStatus::Online);
        assert_eq!(dir.list_hosts().await.len(), 1);
        assert_eq!(dir.find_by_address("10.0.0.5").await.unwrap().id, first.id);
    }

    #[tokio::test]
    async fn test_record_component_replaces_by_name() {
        let dir = MemoryHostDirectory::new();
        let host = dir.upsert_host(Host::discovered("10.0.0.8")).await;

        let component = DeployedComponent {
            host_id: host.id,
            name: "node-exporter".to_string(),
            component_type: ComponentType::Collector,
            version: "1.7.0".to_string(),
            status: ComponentStatus::Running,
            port: 9100,
            deploy_method: DeployMethod::Container,
            config_path: None,
            deployed_at: Utc::now(),
        };
        dir.record_component(component.clone()).await;
        dir.record_component(DeployedComponent {
            port: 9200,
            ..component
        })
        .await;

        let components = dir.components(host.id).await;
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].port, 9200);

        dir.update_component_status(host.id, "node-exporter", ComponentStatus::Stopped)
            .await;
        assert_eq!(
            dir.components(host.id).await[0].status,
            ComponentStatus::Stopped
        );

        assert!(dir.remove_component(host.id, "node-exporter").await);
        assert!(dir.components(host.id).await.is_empty());
    }
}
