//! 服务层模块
//!
//! 包含发现 / 部署核心逻辑及其依赖的叶子组件

pub mod connectivity;
pub mod credentials;
pub mod deploy;
pub mod discovery;
pub mod ip_range;
pub mod prober;
pub mod sysinfo;
pub mod vault;

use std::net::IpAddr;
use std::sync::Arc;

use crate::domain::host::Host;
use crate::domain::ssh::SshTarget;
use crate::error::{CoreError, CoreResult};
use crate::infra::host_directory::HostDirectory;
use crate::infra::ssh::{RemoteConnector, RemoteSession};
use crate::state::event_hub::EventHub;
use crate::state::task_registry::TaskRegistry;
use crate::state::task_store::TaskStore;

pub use connectivity::ConnectionTester;
pub use credentials::CredentialRepository;
pub use deploy::DeploymentEngine;
pub use discovery::DiscoveryEngine;

/// 两个任务引擎共用的依赖
#[derive(Clone)]
pub struct TaskDeps {
    pub store: Arc<dyn TaskStore>,
    pub events: Arc<EventHub>,
    pub hosts: Arc<dyn HostDirectory>,
    pub credentials: Arc<CredentialRepository>,
    pub connector: Arc<dyn RemoteConnector>,
    pub registry: Arc<TaskRegistry>,
}

impl TaskDeps {
    /// 解析主机凭据并建立连接
    ///
    /// 主机自带的凭据引用优先，否则按地址匹配凭据的适用范围
    pub async fn open_session(&self, host: &Host) -> CoreResult<Box<dyn RemoteSession>> {
        let credential = match host.auth.credential_id {
            Some(id) => self
                .credentials
                .get(id)
                .await
                .ok_or_else(|| CoreError::not_found(format!("Credential {}", id)))?,
            None => {
                let ip: IpAddr = host.address.parse().map_err(|_| {
                    CoreError::invalid(format!("host address {} is not an IP", host.address))
                })?;
                self.credentials.find_for_address(&ip).await.ok_or_else(|| {
                    CoreError::Authentication(format!(
                        "no credential available for host {}",
                        host.address
                    ))
                })?
            }
        };
        let login = self.credentials.unseal(&credential)?;

        let target = SshTarget {
            address: host.address.clone(),
            port: host.ssh_port,
            username: login.username,
            auth: login.auth,
        };
        Ok(self.connector.connect(&target).await?)
    }
}
