//! 主机连通性检查
//!
//! 对目录中的单台主机做两项检查：可达性（与扫描相同的判断方式）和 SSH 登录。
//! 任一项成功即视为在线并刷新 last_seen，两项都失败则标记离线。

use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tracing::{info, warn};

use crate::config::env::PlatformConfig;
use crate::domain::host::{Host, HostStatus};
use crate::error::{CoreError, CoreResult};
use crate::services::prober::Probe;
use crate::services::TaskDeps;

/// 检查项
#[derive(Clone, Copy, Debug, Serialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum CheckKind {
    Reachability,
    Ssh,
}

/// 单项检查结果
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionCheck {
    pub kind: CheckKind,
    pub success: bool,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latency_ms: Option<u64>,
}

/// 连通性检查报告
#[derive(Debug, Clone, Serialize)]
pub struct ConnectionReport {
    pub host_id: u64,
    pub address: String,
    pub status: HostStatus,
    pub checks: Vec<ConnectionCheck>,
}

pub struct ConnectionTester {
    deps: TaskDeps,
    probe: Arc<dyn Probe>,
    timeout: Duration,
}

impl ConnectionTester {
    pub fn new(config: &PlatformConfig, deps: TaskDeps, probe: Arc<dyn Probe>) -> Self {
        Self {
            deps,
            probe,
            timeout: Duration::from_secs(config.scan.default_timeout_secs),
        }
    }

    /// 检查主机并写回状态
    pub async fn test_host(&self, host_id: u64) -> CoreResult<ConnectionReport> {
        let host = self
            .deps
            .hosts
            .get_host(host_id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("Host {}", host_id)))?;

        let checks = vec![self.check_reachability(&host).await, self.check_ssh(&host).await];
        let online = checks.iter().any(|c| c.success);

        let mut updated = host.clone();
        updated.status = if online {
            HostStatus::Online
        } else {
            HostStatus::Offline
        };
        if online {
            updated.last_seen = Some(Utc::now());
        }
        let saved = self.deps.hosts.upsert_host(updated).await;

        info!(
            host_id,
            address = %saved.address,
            status = saved.status.as_str(),
            "Host connection tested"
        );

        Ok(ConnectionReport {
            host_id,
            address: saved.address,
            status: saved.status,
            checks,
        })
    }

    async fn check_reachability(&self, host: &Host) -> ConnectionCheck {
        let ip: IpAddr = match host.address.parse() {
            Ok(ip) => ip,
            Err(_) => {
                return ConnectionCheck {
                    kind: CheckKind::Reachability,
                    success: false,
                    message: format!("{} is not an IP address", host.address),
                    latency_ms: None,
                }
            }
        };

        match self.probe.reachable(ip, self.timeout).await {
            Some(rtt) => ConnectionCheck {
                kind: CheckKind::Reachability,
                success: true,
                message: "host is reachable".to_string(),
                latency_ms: Some(rtt.as_millis() as u64),
            },
            None => ConnectionCheck {
                kind: CheckKind::Reachability,
                success: false,
                message: "host is not reachable".to_string(),
                latency_ms: None,
            },
        }
    }

    async fn check_ssh(&self, host: &Host) -> ConnectionCheck {
        let (success, message) = match self.deps.open_session(host).await {
            Ok(mut session) => {
                session.close().await;
                (true, "SSH login succeeded".to_string())
            }
            Err(e) => {
                warn!(address = %host.address, error = %e, "SSH login check failed");
                (false, e.to_string())
            }
        };
        ConnectionCheck {
            kind: CheckKind::Ssh,
            success,
            message,
            latency_ms: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credential::NewCredential;
    use crate::domain::host::AuthType;
    use crate::infra::host_directory::{HostDirectory, MemoryHostDirectory};
    use crate::services::credentials::CredentialRepository;
    use crate::services::vault::AesGcmVault;
    use crate::state::event_hub::EventHub;
    use crate::state::task_registry::TaskRegistry;
    use crate::state::task_store::MemoryTaskStore;
    use crate::testing::{ScriptedConnector, ScriptedHost, ScriptedProbe};

    struct Fixture {
        tester: ConnectionTester,
        hosts: Arc<MemoryHostDirectory>,
        credentials: Arc<CredentialRepository>,
    }

    fn fixture(probe: ScriptedProbe, connector: ScriptedConnector) -> Fixture {
        let hosts = Arc::new(MemoryHostDirectory::new());
        let credentials = Arc::new(CredentialRepository::new(Arc::new(AesGcmVault::from_key(
            &[9u8; 32],
        ))));
        let deps = TaskDeps {
            store: Arc::new(MemoryTaskStore::new()),
            events: Arc::new(EventHub::new()),
            hosts: hosts.clone(),
            credentials: credentials.clone(),
            connector: Arc::new(connector),
            registry: Arc::new(TaskRegistry::new()),
        };
        Fixture {
            tester: ConnectionTester::new(&PlatformConfig::default(), deps, Arc::new(probe)),
            hosts,
            credentials,
        }
    }

    async fn add_host(f: &Fixture, address: &str) -> u64 {
        let credential = f
            .credentials
            .create(NewCredential {
                name: format!("cred-{}", address),
                description: None,
                username: "ops".to_string(),
                auth_type: AuthType::Password,
                password: Some("pw".to_string()),
                private_key: None,
                passphrase: None,
                ranges: vec![],
                tags: vec![],
            })
            .await
            .unwrap();

        let mut host = Host::discovered(address);
        host.auth.username = "ops".to_string();
        host.auth.credential_id = Some(credential.id);
        f.hosts.upsert_host(host).await.id
    }

    #[tokio::test]
    async fn test_reachable_host_with_working_login_is_online() {
        let target = ScriptedHost::new();
        let f = fixture(
            ScriptedProbe::new().host("10.0.0.8".parse().unwrap(), &[22]),
            ScriptedConnector::new().host("10.0.0.8", target.clone()),
        );
        let id = add_host(&f, "10.0.0.8").await;

        let report = f.tester.test_host(id).await.unwrap();
        assert_eq!(report.status, HostStatus::Online);
        assert!(report.checks.iter().all(|c| c.success));
        assert_eq!(report.checks[0].kind, CheckKind::Reachability);
        assert_eq!(report.checks[1].kind, CheckKind::Ssh);
        assert_eq!(target.open_sessions(), 0);

        let host = f.hosts.get_host(id).await.unwrap();
        assert_eq!(host.status, HostStatus::Online);
        assert!(host.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_rejected_login_is_reported() {
        let f = fixture(
            ScriptedProbe::new().host("10.0.0.9".parse().unwrap(), &[22]),
            ScriptedConnector::new()
                .host("10.0.0.9", ScriptedHost::new())
                .reject_auth("10.0.0.9"),
        );
        let id = add_host(&f, "10.0.0.9").await;

        let report = f.tester.test_host(id).await.unwrap();
        assert!(report.checks[0].success);
        let ssh = &report.checks[1];
        assert!(!ssh.success);
        assert!(ssh.message.contains("authentication"), "{}", ssh.message);
        assert_eq!(report.status, HostStatus::Online);
    }

    #[tokio::test]
    async fn test_unreachable_host_goes_offline() {
        let f = fixture(ScriptedProbe::new(), ScriptedConnector::new());
        let id = add_host(&f, "10.0.0.10").await;

        let report = f.tester.test_host(id).await.unwrap();
        assert_eq!(report.status, HostStatus::Offline);
        assert!(report.checks.iter().all(|c| !c.success));

        let host = f.hosts.get_host(id).await.unwrap();
        assert_eq!(host.status, HostStatus::Offline);
        assert!(host.last_seen.is_none());

        assert!(matches!(
            f.tester.test_host(999).await,
            Err(CoreError::NotFound(_))
        ));
    }
}
