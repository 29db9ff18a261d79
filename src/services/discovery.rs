//! 主机发现任务引擎
//!
//! 任务状态：pending -> running -> {completed, failed}
//!
//! 执行流程：解析地址范围 -> 并发探测 -> 可达主机采集系统信息（附带凭据且 SSH 端口开放时）
//! -> 按地址写入主机目录。每处理完一个地址，在任务锁内更新计数并整条写回快照。
//! 只有地址解析失败、快照写入失败和取消会让任务失败。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::env::constants::DEFAULT_SSH_PORT;
use crate::config::env::{PlatformConfig, ScanConfig};
use crate::domain::discovery::{DiscoverySpec, DiscoveryStatus, DiscoveryTask};
use crate::domain::host::{AuthType, Host, HostAuth, HostStatus};
use crate::domain::ssh::{SshAuth, SshTarget};
use crate::error::{CoreError, CoreResult};
use crate::services::credentials::ResolvedCredential;
use crate::services::ip_range;
use crate::services::prober::{HostProber, Probe, ProbeResult, ScanCounters, ScanObserver};
use crate::services::sysinfo::SystemInfoCollector;
use crate::services::TaskDeps;
use crate::state::event_hub::{TaskEvent, TaskEventKind};
use crate::state::task_registry::TaskHandle;
use crate::state::task_store::{
    discovery_key, get_snapshot, list_snapshots, put_snapshot, StoreError, DISCOVERY_PREFIX,
};

/// 发现任务引擎
pub struct DiscoveryEngine {
    scan: ScanConfig,
    ttl: chrono::Duration,
    deps: TaskDeps,
    prober: HostProber,
    collector: SystemInfoCollector,
}

impl DiscoveryEngine {
    pub fn new(config: &PlatformConfig, deps: TaskDeps, probe: Arc<dyn Probe>) -> Self {
        let collector = SystemInfoCollector::new(
            deps.connector.clone(),
            Duration::from_secs(config.ssh.command_timeout_secs),
        );
        Self {
            scan: config.scan.clone(),
            ttl: chrono::Duration::hours(config.task_ttl_hours),
            prober: HostProber::new(probe, config.scan.concurrency),
            collector,
            deps,
        }
    }

    /// 创建发现任务
    ///
    /// 同步校验地址范围、端口和凭据引用，校验通过后写入 pending 快照
    pub async fn create(&self, spec: DiscoverySpec) -> CoreResult<DiscoveryTask> {
        let addresses = ip_range::resolve(&spec.ip_range, self.scan.max_addresses)?;
        let ports = ip_range::parse_ports(&spec.ports)?;

        let timeout_secs = spec.timeout_secs.unwrap_or(self.scan.default_timeout_secs);
        if timeout_secs == 0 {
            return Err(CoreError::invalid("timeout must be greater than zero"));
        }

        if let Some(credential_id) = spec.credential_id {
            if self.deps.credentials.get(credential_id).await.is_none() {
                return Err(CoreError::invalid(format!(
                    "credential {} does not exist",
                    credential_id
                )));
            }
        }

        let name = if spec.name.trim().is_empty() {
            format!("discovery {}", spec.ip_range.trim())
        } else {
            spec.name.trim().to_string()
        };

        let mut task = DiscoveryTask::new(
            Uuid::new_v4().to_string(),
            name,
            spec.ip_range.trim().to_string(),
            ports,
            timeout_secs,
            spec.credential_id,
        );
        task.total_hosts = addresses.len() as u32;

        self.persist(&task).await?;

        info!(
            task_id = %task.id,
            ip_range = %task.ip_range,
            total_hosts = task.total_hosts,
            ports = ?task.ports,
            "Discovery task created"
        );
        Ok(task)
    }

    /// 读取任务快照
    pub async fn get(&self, task_id: &str) -> CoreResult<DiscoveryTask> {
        get_snapshot(self.deps.store.as_ref(), &discovery_key(task_id))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("Discovery task {}", task_id)))
    }

    /// 列出未过期的任务，最新创建的在前
    pub async fn list(&self) -> CoreResult<Vec<DiscoveryTask>> {
        let mut tasks: Vec<DiscoveryTask> =
            list_snapshots(self.deps.store.as_ref(), DISCOVERY_PREFIX).await?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// 启动任务，返回任务句柄
    ///
    /// 只有 pending 状态的任务可以启动
    pub async fn start(self: &Arc<Self>, task_id: &str) -> CoreResult<TaskHandle> {
        let cancel = self.deps.registry.register(task_id).await.ok_or_else(|| {
            CoreError::Conflict(format!("discovery task {} is already running", task_id))
        })?;

        // 登记之后再读快照：之前的执行在注销前已写入终态
        let task = match self.get(task_id).await {
            Ok(task) if task.status == DiscoveryStatus::Pending => task,
            Ok(task) => {
                self.deps.registry.unregister(task_id).await;
                return Err(CoreError::Conflict(format!(
                    "discovery task {} is {}",
                    task_id,
                    task.status.as_str()
                )));
            }
            Err(e) => {
                self.deps.registry.unregister(task_id).await;
                return Err(e);
            }
        };

        let sender = self.deps.events.create(task_id).await;
        let events = sender.subscribe();

        let engine = Arc::clone(self);
        let token = cancel.clone();
        let join = tokio::spawn(async move {
            engine.run(task, token).await;
        });

        Ok(TaskHandle {
            task_id: task_id.to_string(),
            events,
            cancel,
            join,
        })
    }

    async fn run(&self, mut task: DiscoveryTask, cancel: CancellationToken) {
        let task_id = task.id.clone();

        task.status = DiscoveryStatus::Running;
        task.started_at = Some(Utc::now());
        if let Err(e) = self.persist(&task).await {
            error!(task_id = %task_id, error = %e, "Failed to persist running state");
            self.conclude(task, DiscoveryStatus::Failed, Some(e.to_string()))
                .await;
            return;
        }
        self.publish(&task, TaskEventKind::Started, None).await;
        info!(task_id = %task_id, ip_range = %task.ip_range, "Discovery started");

        let addresses = match ip_range::resolve(&task.ip_range, self.scan.max_addresses) {
            Ok(addresses) => addresses,
            Err(e) => {
                error!(task_id = %task_id, error = %e, "Failed to resolve address range");
                self.conclude(task, DiscoveryStatus::Failed, Some(e.to_string()))
                    .await;
                return;
            }
        };
        task.total_hosts = addresses.len() as u32;

        let login = self.unlock_credential(&task).await;
        let ports = task.ports.clone();
        let timeout = Duration::from_secs(task.timeout_secs);

        // 快照写入失败时单独中止扫描，与外部取消区分
        let abort = cancel.child_token();
        let run = DiscoveryRun {
            engine: self,
            snapshot: Mutex::new(task),
            login,
            abort: abort.clone(),
            persist_error: Mutex::new(None),
        };

        let counters = self
            .prober
            .scan(addresses, &ports, timeout, &abort, &run)
            .await;

        let persist_error = run.persist_error.lock().await.take();
        let mut task = run.snapshot.into_inner();
        task.found_hosts = counters.found;
        task.online_hosts = counters.online;
        task.failed_hosts = counters.failed;

        if let Some(e) = persist_error {
            self.conclude(task, DiscoveryStatus::Failed, Some(e)).await;
        } else if cancel.is_cancelled() {
            warn!(
                task_id = %task_id,
                processed = counters.processed,
                total = counters.total,
                "Discovery cancelled"
            );
            self.conclude(task, DiscoveryStatus::Failed, Some("cancelled".to_string()))
                .await;
        } else {
            info!(
                task_id = %task_id,
                total = counters.total,
                found = counters.found,
                online = counters.online,
                failed = counters.failed,
                "Discovery completed"
            );
            self.conclude(task, DiscoveryStatus::Completed, None).await;
        }
    }

    /// 每次运行只解密一次凭据
    async fn unlock_credential(&self, task: &DiscoveryTask) -> Login {
        let Some(credential_id) = task.credential_id else {
            return Login::None;
        };

        match self.deps.credentials.resolve(credential_id).await {
            Ok(resolved) => Login::Ready {
                credential_id,
                resolved,
            },
            Err(e) => {
                error!(
                    task_id = %task.id,
                    credential_id = credential_id,
                    error = %e,
                    "Credential unusable, system info collection disabled for this run"
                );
                Login::Unusable
            }
        }
    }

    /// 进入终态并收尾：写快照、推送结束事件、注销运行登记
    async fn conclude(
        &self,
        mut task: DiscoveryTask,
        status: DiscoveryStatus,
        error: Option<String>,
    ) {
        task.finish(status, error);
        if let Err(e) = self.persist(&task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist final state");
        }

        let message = task.error.clone();
        self.publish(&task, TaskEventKind::Finished, message).await;
        self.deps.events.finish(&task.id).await;
        self.deps.registry.unregister(&task.id).await;
    }

    async fn persist(&self, task: &DiscoveryTask) -> Result<(), StoreError> {
        put_snapshot(
            self.deps.store.as_ref(),
            &discovery_key(&task.id),
            task,
            self.ttl,
        )
        .await
    }

    async fn publish(&self, task: &DiscoveryTask, kind: TaskEventKind, message: Option<String>) {
        let mut event = TaskEvent::new(&task.id, kind, task.status.as_str(), task.progress);
        event.message = message;
        self.deps.events.publish(event).await;
    }
}

/// 本次运行的登录材料
enum Login {
    None,
    Ready {
        credential_id: u64,
        resolved: ResolvedCredential,
    },
    /// 凭据无法解密，需要采集的主机计为失败
    Unusable,
}

/// 单次扫描的观察者
struct DiscoveryRun<'a> {
    engine: &'a DiscoveryEngine,
    snapshot: Mutex<DiscoveryTask>,
    login: Login,
    abort: CancellationToken,
    persist_error: Mutex<Option<String>>,
}

impl DiscoveryRun<'_> {
    async fn collect_into(
        &self,
        host: &mut Host,
        credential_id: u64,
        login: &ResolvedCredential,
    ) -> bool {
        let target = SshTarget {
            address: host.address.clone(),
            port: host.ssh_port,
            username: login.username.clone(),
            auth: login.auth.clone(),
        };

        match self.engine.collector.collect(&target).await {
            Ok(facts) => {
                if let Some(hostname) = &facts.hostname {
                    host.name = hostname.clone();
                }
                host.facts = facts;
                host.auth = HostAuth {
                    username: login.username.clone(),
                    credential_id: Some(credential_id),
                    auth_type: match login.auth {
                        SshAuth::Password(_) => AuthType::Password,
                        SshAuth::PrivateKey { .. } => AuthType::Key,
                    },
                };
                true
            }
            Err(e) => {
                warn!(host = %host.address, error = %e, "System info collection failed");
                false
            }
        }
    }
}

#[async_trait]
impl ScanObserver for DiscoveryRun<'_> {
    async fn on_host(&self, result: &ProbeResult) -> bool {
        let mut host = Host::discovered(result.address.to_string());
        host.status = if result.open_ports.is_empty() {
            HostStatus::Offline
        } else {
            HostStatus::Online
        };
        host.last_seen = Some(Utc::now());

        let mut handled = true;
        if result.has_open_port(DEFAULT_SSH_PORT) {
            match &self.login {
                Login::None => {}
                Login::Ready {
                    credential_id,
                    resolved,
                } => {
                    handled = self.collect_into(&mut host, *credential_id, resolved).await;
                }
                Login::Unusable => handled = false,
            }
        }

        let stored = self.engine.deps.hosts.upsert_host(host).await;
        debug!(
            host_id = stored.id,
            address = %stored.address,
            status = stored.status.as_str(),
            "Host upserted"
        );
        handled
    }

    async fn on_progress(&self, counters: ScanCounters) {
        let mut task = self.snapshot.lock().await;
        task.found_hosts = counters.found;
        task.online_hosts = counters.online;
        task.failed_hosts = counters.failed;
        task.advance(counters.processed);

        if let Err(e) = self.engine.persist(&task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist progress, aborting scan");
            let mut slot = self.persist_error.lock().await;
            if slot.is_none() {
                *slot = Some(e.to_string());
            }
            self.abort.cancel();
            return;
        }

        self.engine
            .publish(&task, TaskEventKind::Progress, None)
            .await;
    }
}
