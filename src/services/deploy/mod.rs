//! 部署任务引擎
//!
//! 任务状态：pending -> running -> {completed, completed_with_errors, failed}
//!
//! 创建时渲染全部组件描述和配置文件（渲染失败不创建任务）；执行时按主机并发，
//! 每台主机一个 SSH 会话：上传配置 -> 逐个组件安装 -> 记录到主机目录。

pub mod strategy;

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use futures::StreamExt;
use serde_json::{json, Map, Value};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::config::env::{DeployConfig, PlatformConfig};
use crate::domain::component::ComponentKind;
use crate::domain::deployment::{
    ComponentSpec, DeploymentRequest, DeploymentResult, DeploymentStatus, DeploymentTask,
    Outcome, RenderedComponent,
};
use crate::domain::host::{ComponentStatus, DeployMethod, DeployedComponent, Host};
use crate::domain::ssh::SshClientConfig;
use crate::error::{CoreError, CoreResult};
use crate::infra::ssh::RemoteSession;
use crate::infra::templates::{TemplateCatalog, TemplateError};
use crate::services::TaskDeps;
use crate::state::event_hub::{TaskEvent, TaskEventKind};
use crate::state::task_registry::TaskHandle;
use crate::state::task_store::{
    deployment_key, get_snapshot, list_snapshots, put_snapshot, StoreError, DEPLOYMENT_PREFIX,
};

pub use strategy::{InstallContext, InstallError};

/// 部署任务引擎
pub struct DeploymentEngine {
    deploy: DeployConfig,
    ssh: SshClientConfig,
    ttl: chrono::Duration,
    deps: TaskDeps,
    templates: Arc<dyn TemplateCatalog>,
}

impl DeploymentEngine {
    pub fn new(
        config: &PlatformConfig,
        deps: TaskDeps,
        templates: Arc<dyn TemplateCatalog>,
    ) -> Self {
        Self {
            deploy: config.deploy.clone(),
            ssh: config.ssh.clone(),
            ttl: chrono::Duration::hours(config.task_ttl_hours),
            deps,
            templates,
        }
    }

    /// 创建部署任务
    ///
    /// 组件名无法识别或任一模板渲染失败都返回 `Template` 错误，不会创建任务
    pub async fn create(&self, request: DeploymentRequest) -> CoreResult<DeploymentTask> {
        if request.host_ids.is_empty() {
            return Err(CoreError::invalid("at least one host is required"));
        }
        if request.components.is_empty() {
            return Err(CoreError::invalid("at least one component is required"));
        }

        let mut host_ids: Vec<u64> = Vec::with_capacity(request.host_ids.len());
        for id in request.host_ids {
            if !host_ids.contains(&id) {
                host_ids.push(id);
            }
        }

        let mut components: Vec<RenderedComponent> = Vec::new();
        let mut configs = BTreeMap::new();
        for spec in &request.components {
            let kind: ComponentKind = spec.name.parse().map_err(TemplateError::from)?;
            if components.iter().any(|c| c.name == kind.as_str()) {
                return Err(CoreError::invalid(format!(
                    "component {} listed more than once",
                    kind
                )));
            }
            components.push(self.render_component(kind, spec, &mut configs)?);
        }

        let names: Vec<&str> = components.iter().map(|c| c.name.as_str()).collect();
        let name = request
            .name
            .filter(|n| !n.trim().is_empty())
            .unwrap_or_else(|| format!("deploy {}", names.join(", ")));

        let task = DeploymentTask::new(
            Uuid::new_v4().to_string(),
            name,
            host_ids,
            components,
            configs,
        );
        self.persist(&task).await?;

        info!(
            task_id = %task.id,
            hosts = task.host_ids.len(),
            components = ?task.components.iter().map(|c| c.name.as_str()).collect::<Vec<_>>(),
            configs = task.configs.len(),
            "Deployment task created"
        );
        Ok(task)
    }

    /// 参数合并顺序：平台配置 <- 组件默认值 <- 实例端口/镜像 <- 请求参数
    fn render_component(
        &self,
        kind: ComponentKind,
        spec: &ComponentSpec,
        configs: &mut BTreeMap<String, String>,
    ) -> Result<RenderedComponent, TemplateError> {
        let def = kind.definition();

        let mut params = self.platform_params();
        params.extend(kind.default_params());
        params.insert(
            "port".into(),
            json!(spec.port.unwrap_or(def.default_port)),
        );
        params.insert(
            "image".into(),
            json!(spec.image.as_deref().unwrap_or(def.image)),
        );
        params.extend(spec.params.clone());

        let exec_args_source = params
            .get("exec_args")
            .and_then(Value::as_str)
            .unwrap_or(def.exec_args)
            .to_string();
        let exec_args = self
            .templates
            .render_str(&exec_args_source, &Value::Object(params.clone()))?;
        params.insert("exec_args".into(), json!(exec_args));

        let context = Value::Object(params);
        let (compose_file, unit_file) = match spec.method {
            DeployMethod::Container => (
                Some(self.templates.render(def.compose_template, &context)?),
                None,
            ),
            DeployMethod::Binary | DeployMethod::ServiceManager => (
                None,
                Some(self.templates.render(def.unit_template, &context)?),
            ),
        };

        let mut config_files = Vec::with_capacity(def.config_templates.len());
        for template in def.config_templates {
            configs.insert(
                template.to_string(),
                self.templates.render(template, &context)?,
            );
            config_files.push(template.to_string());
        }

        let text = |key: &str, fallback: &str| -> String {
            context
                .get(key)
                .and_then(Value::as_str)
                .unwrap_or(fallback)
                .to_string()
        };

        Ok(RenderedComponent {
            name: def.name.to_string(),
            component_type: def.component_type,
            method: spec.method,
            port: context
                .get("port")
                .and_then(Value::as_u64)
                .and_then(|p| u16::try_from(p).ok())
                .unwrap_or(def.default_port),
            image: text("image", def.image),
            version: text("version", def.version),
            binary_url: (spec.method == DeployMethod::Binary)
                .then(|| text("binary_url", def.binary_url)),
            binary_name: text("binary_name", def.binary_name),
            service_user: text("service_user", def.name),
            compose_file,
            unit_file,
            config_files,
        })
    }

    /// 平台级模板参数
    fn platform_params(&self) -> Map<String, Value> {
        let mut params = Map::new();
        params.insert("install_root".into(), json!(self.deploy.install_root));
        params.insert("config_dir".into(), json!(self.config_dir()));
        params.insert("remote_write_url".into(), json!(self.deploy.remote_write_url));
        params.insert(
            "victoriametrics_url".into(),
            json!(self.deploy.victoriametrics_url),
        );
        params.insert(
            "grafana_admin_password".into(),
            json!(self.deploy.grafana_admin_password),
        );
        params
    }

    fn config_dir(&self) -> String {
        format!("{}/config", self.deploy.install_root)
    }

    /// 读取任务快照
    pub async fn get(&self, task_id: &str) -> CoreResult<DeploymentTask> {
        get_snapshot(self.deps.store.as_ref(), &deployment_key(task_id))
            .await?
            .ok_or_else(|| CoreError::not_found(format!("Deployment task {}", task_id)))
    }

    /// 列出未过期的任务，最新创建的在前
    pub async fn list(&self) -> CoreResult<Vec<DeploymentTask>> {
        let mut tasks: Vec<DeploymentTask> =
            list_snapshots(self.deps.store.as_ref(), DEPLOYMENT_PREFIX).await?;
        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    /// 执行任务，返回任务句柄
    pub async fn execute(self: &Arc<Self>, task_id: &str) -> CoreResult<TaskHandle> {
        let cancel = self.deps.registry.register(task_id).await.ok_or_else(|| {
            CoreError::Conflict(format!("deployment task {} is already running", task_id))
        })?;

        // 登记之后再读快照，已结束的任务不会被再次执行
        let task = match self.get(task_id).await {
            Ok(task) if task.status == DeploymentStatus::Pending => task,
            Ok(task) => {
                self.deps.registry.unregister(task_id).await;
                return Err(CoreError::Conflict(format!(
                    "deployment task {} is {}",
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

    async fn run(&self, mut task: DeploymentTask, cancel: CancellationToken) {
        let task_id = task.id.clone();

        task.status = DeploymentStatus::Running;
        task.started_at = Some(Utc::now());
        if let Err(e) = self.persist(&task).await {
            error!(task_id = %task_id, error = %e, "Failed to persist running state");
            task.finish(DeploymentStatus::Failed, Some(e.to_string()));
            self.conclude(task).await;
            return;
        }
        self.publish(&task, TaskEventKind::Started, None).await;
        info!(task_id = %task_id, hosts = task.host_ids.len(), "Deployment started");

        let plan = task.clone();
        let snapshot = Mutex::new(task);
        let persist_error: Mutex<Option<String>> = Mutex::new(None);
        let abort = cancel.child_token();
        let host_timeout = Duration::from_secs(self.deploy.host_timeout_secs);

        futures::stream::iter(plan.host_ids.iter().copied())
            .map(|host_id| {
                let plan = &plan;
                let snapshot = &snapshot;
                let persist_error = &persist_error;
                let abort = &abort;
                async move {
                    let result = self.deploy_host(plan, host_id, host_timeout).await;

                    let mut task = snapshot.lock().await;
                    let message = format!("host {}: {}", result.host_id, result.message);
                    task.record_result(result);

                    if let Err(e) = self.persist(&task).await {
                        error!(
                            task_id = %task.id,
                            error = %e,
                            "Failed to persist result, aborting deployment"
                        );
                        let mut slot = persist_error.lock().await;
                        if slot.is_none() {
                            *slot = Some(e.to_string());
                        }
                        abort.cancel();
                        return;
                    }
                    self.publish(&task, TaskEventKind::HostDone, Some(message))
                        .await;
                }
            })
            .buffer_unordered(self.deploy.concurrency.max(1))
            .take_until(abort.cancelled())
            .collect::<Vec<()>>()
            .await;

        let persist_error = persist_error.lock().await.take();
        let mut task = snapshot.into_inner();

        if let Some(e) = persist_error {
            task.finish(DeploymentStatus::Failed, Some(e));
        } else if cancel.is_cancelled() {
            warn!(
                task_id = %task_id,
                done = task.results.len(),
                total = task.host_ids.len(),
                "Deployment cancelled"
            );
            task.finish(DeploymentStatus::Failed, Some("cancelled".to_string()));
        } else {
            task.complete();
            info!(
                task_id = %task_id,
                status = task.status.as_str(),
                failed = task.failed_count(),
                total = task.results.len(),
                "Deployment finished"
            );
        }
        self.conclude(task).await;
    }

    /// 部署一台主机，错误和超时都转成失败结果
    async fn deploy_host(
        &self,
        plan: &DeploymentTask,
        host_id: u64,
        timeout: Duration,
    ) -> DeploymentResult {
        let started = Instant::now();

        let Some(host) = self.deps.hosts.get_host(host_id).await else {
            warn!(task_id = %plan.id, host_id = host_id, "Host not found");
            return DeploymentResult {
                host_id,
                address: String::new(),
                outcome: Outcome::Failed,
                message: format!("Host {} not found", host_id),
                deployed_files: Vec::new(),
                duration_ms: started.elapsed().as_millis() as i64,
            };
        };

        let outcome = tokio::time::timeout(timeout, self.deploy_to(plan, &host)).await;
        let (outcome, message, deployed_files) = match outcome {
            Ok(Ok(files)) => (
                Outcome::Success,
                format!("deployed {} component(s)", plan.components.len()),
                files,
            ),
            Ok(Err(e)) => {
                warn!(
                    task_id = %plan.id,
                    host = %host.address,
                    kind = e.kind(),
                    error = %e,
                    "Host deployment failed"
                );
                (Outcome::Failed, e.to_string(), Vec::new())
            }
            Err(_) => {
                warn!(
                    task_id = %plan.id,
                    host = %host.address,
                    timeout_secs = timeout.as_secs(),
                    "Host deployment timed out"
                );
                (
                    Outcome::Failed,
                    format!("deployment timed out after {}s", timeout.as_secs()),
                    Vec::new(),
                )
            }
        };

        DeploymentResult {
            host_id,
            address: host.address,
            outcome,
            message,
            deployed_files,
            duration_ms: started.elapsed().as_millis() as i64,
        }
    }

    async fn deploy_to(&self, plan: &DeploymentTask, host: &Host) -> CoreResult<Vec<String>> {
        let mut session = self.deps.open_session(host).await?;
        let outcome = self.install_all(session.as_ref(), plan, host).await;
        session.close().await;
        outcome
    }

    async fn install_all(
        &self,
        session: &dyn RemoteSession,
        plan: &DeploymentTask,
        host: &Host,
    ) -> CoreResult<Vec<String>> {
        let ctx = self.install_context(session);
        let mut files = Vec::new();

        let config_dir = self.config_dir();
        if !plan.configs.is_empty() {
            ctx.mkdir(&config_dir).await?;
            for (name, content) in &plan.configs {
                let path = format!("{}/{}", config_dir, name);
                ctx.upload(&path, content).await?;
                files.push(path);
            }
        }

        for component in &plan.components {
            files.extend(strategy::install(&ctx, component).await?);

            self.deps
                .hosts
                .record_component(DeployedComponent {
                    host_id: host.id,
                    name: component.name.clone(),
                    component_type: component.component_type,
                    version: component.version.clone(),
                    status: ComponentStatus::Running,
                    port: component.port,
                    deploy_method: component.method,
                    config_path: (!component.config_files.is_empty()).then(|| config_dir.clone()),
                    deployed_at: Utc::now(),
                })
                .await;
            info!(host = %host.address, component = %component.name, "Component deployed");
        }

        Ok(files)
    }

    fn install_context<'a>(&'a self, session: &'a dyn RemoteSession) -> InstallContext<'a> {
        InstallContext {
            session,
            sudo: self.ssh.sudo_prefix(),
            command_timeout: Duration::from_secs(self.ssh.command_timeout_secs),
            long_timeout: Duration::from_secs(self.deploy.host_timeout_secs),
            install_root: &self.deploy.install_root,
        }
    }

    /// 主机上已部署的组件
    pub async fn get_host_components(&self, host_id: u64) -> CoreResult<Vec<DeployedComponent>> {
        self.require_host(host_id).await?;
        Ok(self.deps.hosts.components(host_id).await)
    }

    /// 远程查询组件状态并更新目录
    pub async fn check_component_status(
        &self,
        host_id: u64,
        name: &str,
    ) -> CoreResult<ComponentStatus> {
        let (host, component) = self.require_component(host_id, name).await?;

        let mut session = self.deps.open_session(&host).await?;
        let status = strategy::component_status(
            &self.install_context(session.as_ref()),
            component.deploy_method,
            &component.name,
        )
        .await;
        session.close().await;

        self.deps
            .hosts
            .update_component_status(host_id, &component.name, status)
            .await;
        info!(
            host = %host.address,
            component = %component.name,
            status = status.as_str(),
            "Component status checked"
        );
        Ok(status)
    }

    pub async fn start_component(&self, host_id: u64, name: &str) -> CoreResult<()> {
        let (host, component) = self.require_component(host_id, name).await?;

        let mut session = self.deps.open_session(&host).await?;
        let outcome = strategy::start(
            &self.install_context(session.as_ref()),
            component.deploy_method,
            &component.name,
        )
        .await;
        session.close().await;
        outcome?;

        self.deps
            .hosts
            .update_component_status(host_id, &component.name, ComponentStatus::Running)
            .await;
        info!(host = %host.address, component = %component.name, "Component started");
        Ok(())
    }

    pub async fn stop_component(&self, host_id: u64, name: &str) -> CoreResult<()> {
        let (host, component) = self.require_component(host_id, name).await?;

        let mut session = self.deps.open_session(&host).await?;
        let outcome = strategy::stop(
            &self.install_context(session.as_ref()),
            component.deploy_method,
            &component.name,
        )
        .await;
        session.close().await;
        outcome?;

        self.deps
            .hosts
            .update_component_status(host_id, &component.name, ComponentStatus::Stopped)
            .await;
        info!(host = %host.address, component = %component.name, "Component stopped");
        Ok(())
    }

    /// 卸载组件并从目录中移除
    pub async fn uninstall_component(&self, host_id: u64, name: &str) -> CoreResult<()> {
        let (host, component) = self.require_component(host_id, name).await?;
        let binary_name = component
            .name
            .parse::<ComponentKind>()
            .ok()
            .map(|k| k.definition().binary_name);

        let mut session = self.deps.open_session(&host).await?;
        strategy::uninstall(
            &self.install_context(session.as_ref()),
            component.deploy_method,
            &component.name,
            binary_name,
        )
        .await;
        session.close().await;

        self.deps
            .hosts
            .remove_component(host_id, &component.name)
            .await;
        info!(host = %host.address, component = %component.name, "Component uninstalled");
        Ok(())
    }

    async fn require_host(&self, host_id: u64) -> CoreResult<Host> {
        self.deps
            .hosts
            .get_host(host_id)
            .await
            .ok_or_else(|| CoreError::not_found(format!("Host {}", host_id)))
    }

    async fn require_component(
        &self,
        host_id: u64,
        name: &str,
    ) -> CoreResult<(Host, DeployedComponent)> {
        let host = self.require_host(host_id).await?;
        let component = self
            .deps
            .hosts
            .components(host_id)
            .await
            .into_iter()
            .find(|c| c.name == name)
            .ok_or_else(|| {
                CoreError::not_found(format!("Component {} on host {}", name, host_id))
            })?;
        Ok((host, component))
    }

    /// 写终态快照、推送结束事件、注销运行登记
    async fn conclude(&self, task: DeploymentTask) {
        if let Err(e) = self.persist(&task).await {
            error!(task_id = %task.id, error = %e, "Failed to persist final state");
        }
        let message = task.error.clone();
        self.publish(&task, TaskEventKind::Finished, message).await;
        self.deps.events.finish(&task.id).await;
        self.deps.registry.unregister(&task.id).await;
    }

    async fn persist(&self, task: &DeploymentTask) -> Result<(), StoreError> {
        put_snapshot(
            self.deps.store.as_ref(),
            &deployment_key(&task.id),
            task,
            self.ttl,
        )
        .await
    }

    async fn publish(&self, task: &DeploymentTask, kind: TaskEventKind, message: Option<String>) {
        let mut event = TaskEvent::new(&task.id, kind, task.status.as_str(), task.progress);
        event.message = message;
        self.deps.events.publish(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::credential::NewCredential;
    use crate::domain::host::AuthType;
    use crate::infra::host_directory::{HostDirectory, MemoryHostDirectory};
    use crate::infra::templates::HandlebarsCatalog;
    use crate::services::credentials::CredentialRepository;
    use crate::services::vault::AesGcmVault;
    use crate::state::event_hub::EventHub;
    use crate::state::task_registry::TaskRegistry;
    use crate::state::task_store::MemoryTaskStore;
    use crate::testing::{ScriptedConnector, ScriptedHost};

    struct Fixture {
        engine: Arc<DeploymentEngine>,
        store: Arc<MemoryTaskStore>,
        hosts: Arc<MemoryHostDirectory>,
        credentials: Arc<CredentialRepository>,
    }

    fn fixture_with(connector: ScriptedConnector, host_timeout_secs: u64) -> Fixture {
        let mut config = PlatformConfig::default();
        config.deploy.host_timeout_secs = host_timeout_secs;
        config.deploy.remote_write_url = "http://vm.lab:8428/api/v1/write".to_string();

        let store = Arc::new(MemoryTaskStore::new());
        let hosts = Arc::new(MemoryHostDirectory::new());
        let credentials = Arc::new(CredentialRepository::new(Arc::new(AesGcmVault::from_key(
            &[5u8; 32],
        ))));
        let deps = TaskDeps {
            store: store.clone(),
            events: Arc::new(EventHub::new()),
            hosts: hosts.clone(),
            credentials: credentials.clone(),
            connector: Arc::new(connector),
            registry: Arc::new(TaskRegistry::new()),
        };
        let templates = Arc::new(HandlebarsCatalog::new().unwrap());

        Fixture {
            engine: Arc::new(DeploymentEngine::new(&config, deps, templates)),
            store,
            hosts,
            credentials,
        }
    }

    fn fixture(connector: ScriptedConnector) -> Fixture {
        fixture_with(connector, 30)
    }

    impl Fixture {
        /// 登记一台主机；scoped 为 true 时凭据按地址范围匹配，否则直接挂在主机上
        async fn add_host(&self, address: &str, scoped: bool) -> u64 {
            let credential = self
                .credentials
                .create(NewCredential {
                    name: format!("cred-{}", address),
                    description: None,
                    username: "ops".to_string(),
                    auth_type: AuthType::Password,
                    password: Some("pw".to_string()),
                    private_key: None,
                    passphrase: None,
                    ranges: if scoped {
                        vec![format!("{}/32", address)]
                    } else {
                        vec![]
                    },
                    tags: vec![],
                })
                .await
                .unwrap();

            let mut host = Host::discovered(address);
            if !scoped {
                host.auth.username = "ops".to_string();
                host.auth.credential_id = Some(credential.id);
            }
            self.hosts.upsert_host(host).await.id
        }
    }

    fn component(name: &str, method: DeployMethod) -> ComponentSpec {
        ComponentSpec {
            name: name.to_string(),
            method,
            port: None,
            image: None,
            params: Map::new(),
        }
    }

    fn request(host_ids: Vec<u64>, components: Vec<ComponentSpec>) -> DeploymentRequest {
        DeploymentRequest {
            name: None,
            host_ids,
            components,
        }
    }

    #[tokio::test]
    async fn test_container_deployment_completes() {
        let target = ScriptedHost::new().respond("docker --version", "Docker version 24.0.7\n");
        let f = fixture(ScriptedConnector::new().host("10.0.0.7", target.clone()));
        let h1 = f.add_host("10.0.0.7", false).await;

        let task = f
            .engine
            .create(request(
                vec![h1],
                vec![component("node-exporter", DeployMethod::Container)],
            ))
            .await
            .unwrap();
        assert_eq!(task.status, DeploymentStatus::Pending);
        assert!(task.components[0]
            .compose_file
            .as_deref()
            .unwrap()
            .contains("image: prom/node-exporter:latest"));

        let mut handle = f.engine.execute(&task.id).await.unwrap();
        let first = handle.events.recv().await.unwrap();
        assert_eq!(first.kind, TaskEventKind::Started);
        assert_eq!(first.status, "running");
        handle.wait().await.unwrap();

        let done = f.engine.get(&task.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::Completed);
        assert_eq!(done.progress, 100);
        assert_eq!(done.results.len(), 1);
        assert_eq!(done.results[0].outcome, Outcome::Success);
        assert!(done.results[0]
            .deployed_files
            .contains(&"/opt/monitoring/node-exporter/docker-compose.yml".to_string()));

        assert!(target
            .file("/opt/monitoring/node-exporter/docker-compose.yml")
            .unwrap()
            .contains("container_name: node-exporter"));
        assert!(target
            .commands()
            .iter()
            .any(|c| c.contains("docker compose up -d")));
        assert_eq!(target.open_sessions(), 0);

        let components = f.engine.get_host_components(h1).await.unwrap();
        assert_eq!(components.len(), 1);
        assert_eq!(components[0].status, ComponentStatus::Running);
        assert_eq!(components[0].port, 9100);
    }

    #[tokio::test]
    async fn test_unknown_component_creates_nothing() {
        let f = fixture(ScriptedConnector::new());
        let h1 = f.add_host("10.0.0.7", false).await;

        let err = f
            .engine
            .create(request(
                vec![h1],
                vec![
                    component("node-exporter", DeployMethod::Container),
                    component("nginx", DeployMethod::Container),
                ],
            ))
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CoreError::Template(TemplateError::UnknownComponent(ref n)) if n == "nginx"
        ));
        assert_eq!(f.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_create_validates_request() {
        let f = fixture(ScriptedConnector::new());

        let err = f
            .engine
            .create(request(vec![], vec![component("grafana", DeployMethod::Container)]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InputValidation(_)));

        let err = f.engine.create(request(vec![1], vec![])).await.unwrap_err();
        assert!(matches!(err, CoreError::InputValidation(_)));

        let mut broken = component("node-exporter", DeployMethod::Binary);
        broken
            .params
            .insert("exec_args".into(), json!("--listen={{listen_address}}"));
        let err = f
            .engine
            .create(request(vec![1], vec![broken]))
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::Template(TemplateError::Render { .. })));
        assert_eq!(f.store.len().await, 0);
    }

    #[tokio::test]
    async fn test_parameters_merge_in_order() {
        let f = fixture(ScriptedConnector::new());

        let mut vmagent = component("vmagent", DeployMethod::Binary);
        vmagent.port = Some(18429);
        vmagent
            .params
            .insert("scrape_targets".into(), json!(["10.0.0.7:9100"]));
        let task = f
            .engine
            .create(request(vec![1, 1], vec![vmagent]))
            .await
            .unwrap();

        assert_eq!(task.host_ids, vec![1]);
        let rendered = &task.components[0];
        assert_eq!(rendered.port, 18429);
        assert_eq!(rendered.service_user, "vmagent");
        assert!(rendered.binary_url.as_deref().unwrap().contains("vmutils"));

        let unit = rendered.unit_file.as_deref().unwrap();
        assert!(unit.contains(
            "ExecStart=/usr/local/bin/vmagent-prod -promscrape.config=/opt/monitoring/config/vmagent.yml \
             -remoteWrite.url=http://vm.lab:8428/api/v1/write -httpListenAddr=:18429"
        ));
        assert!(task.configs["vmagent.yml"].contains("targets: ['10.0.0.7:9100']"));
    }

    #[tokio::test]
    async fn test_partial_failure_completes_with_errors() {
        let ok = ScriptedHost::new();
        let f = fixture(
            ScriptedConnector::new()
                .host("10.0.0.7", ok.clone())
                .host("10.0.0.8", ScriptedHost::new())
                .reject_auth("10.0.0.8"),
        );
        let h1 = f.add_host("10.0.0.7", false).await;
        let h2 = f.add_host("10.0.0.8", true).await;
        let missing = 999;

        let task = f
            .engine
            .create(request(
                vec![h2, missing, h1],
                vec![component("grafana", DeployMethod::Container)],
            ))
            .await
            .unwrap();
        f.engine.execute(&task.id).await.unwrap().wait().await.unwrap();

        let done = f.engine.get(&task.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::CompletedWithErrors);
        assert_eq!(done.error.as_deref(), Some("2 out of 3 deployments failed"));

        let order: Vec<u64> = done.results.iter().map(|r| r.host_id).collect();
        assert_eq!(order, vec![h2, missing, h1]);
        assert!(done.results[0].message.contains("authentication"));
        assert!(done.results[1].message.contains("not found"));
        assert_eq!(done.results[2].outcome, Outcome::Success);
        assert!(done.results[2]
            .deployed_files
            .contains(&"/opt/monitoring/config/grafana-datasource.yml".to_string()));
        assert!(ok
            .file("/opt/monitoring/config/grafana-datasource.yml")
            .unwrap()
            .contains("url: http://victoriametrics:8428"));
    }

    #[tokio::test]
    async fn test_install_failure_is_reported_per_host() {
        let target = ScriptedHost::new()
            .fail("docker compose up", "pull access denied")
            .fail("docker-compose up", "pull access denied");
        let f = fixture(ScriptedConnector::new().host("10.0.0.7", target));
        let h1 = f.add_host("10.0.0.7", false).await;

        let task = f
            .engine
            .create(request(
                vec![h1],
                vec![component("alertmanager", DeployMethod::Container)],
            ))
            .await
            .unwrap();
        f.engine.execute(&task.id).await.unwrap().wait().await.unwrap();

        let done = f.engine.get(&task.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::CompletedWithErrors);
        assert!(done.results[0].message.contains("start failed for alertmanager"));
        assert!(f.engine.get_host_components(h1).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_host_timeout_fails_only_that_host() {
        let f = fixture_with(
            ScriptedConnector::new()
                .host("10.0.0.7", ScriptedHost::new().hang("docker --version"))
                .host("10.0.0.8", ScriptedHost::new()),
            1,
        );
        let slow = f.add_host("10.0.0.7", false).await;
        let fast = f.add_host("10.0.0.8", false).await;

        let task = f
            .engine
            .create(request(
                vec![slow, fast],
                vec![component("node-exporter", DeployMethod::Container)],
            ))
            .await
            .unwrap();
        f.engine.execute(&task.id).await.unwrap().wait().await.unwrap();

        let done = f.engine.get(&task.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::CompletedWithErrors);
        assert!(done.results[0].message.contains("timed out"));
        assert_eq!(done.results[1].outcome, Outcome::Success);
    }

    #[tokio::test]
    async fn test_execute_twice_conflicts() {
        let f = fixture(ScriptedConnector::new());
        let task = f
            .engine
            .create(request(vec![1], vec![component("grafana", DeployMethod::Container)]))
            .await
            .unwrap();

        f.engine.execute(&task.id).await.unwrap().wait().await.unwrap();
        assert!(matches!(
            f.engine.execute(&task.id).await,
            Err(CoreError::Conflict(_))
        ));
        assert!(matches!(
            f.engine.execute("missing").await,
            Err(CoreError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_list_skips_expired_tasks() {
        let f = fixture(ScriptedConnector::new());
        let live = f
            .engine
            .create(request(vec![1], vec![component("grafana", DeployMethod::Container)]))
            .await
            .unwrap();

        let mut stale = live.clone();
        stale.id = "stale".to_string();
        put_snapshot(
            f.store.as_ref(),
            &deployment_key(&stale.id),
            &stale,
            chrono::Duration::milliseconds(-1),
        )
        .await
        .unwrap();

        let tasks = f.engine.list().await.unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].id, live.id);
    }

    #[tokio::test]
    async fn test_concurrent_execute_runs_once() {
        let target = ScriptedHost::new();
        let f = fixture(ScriptedConnector::new().host("10.0.0.21", target.clone()));
        let h1 = f.add_host("10.0.0.21", false).await;
        let task = f
            .engine
            .create(request(vec![h1], vec![component("grafana", DeployMethod::Container)]))
            .await
            .unwrap();

        let attempts =
            futures::future::join_all((0..8).map(|_| f.engine.execute(&task.id))).await;
        let mut executed = 0;
        for attempt in attempts {
            match attempt {
                Ok(handle) => {
                    executed += 1;
                    handle.wait().await.unwrap();
                }
                Err(e) => assert!(matches!(e, CoreError::Conflict(_)), "{:?}", e),
            }
        }
        assert_eq!(executed, 1);

        let done = f.engine.get(&task.id).await.unwrap();
        assert_eq!(done.status, DeploymentStatus::Completed);
        assert_eq!(done.results.len(), 1);
        let compose_runs = target
            .commands()
            .iter()
            .filter(|c| c.contains("docker compose up -d"))
            .count();
        assert_eq!(compose_runs, 1);

        assert!(matches!(
            f.engine.execute(&task.id).await,
            Err(CoreError::Conflict(_))
        ));
        assert_eq!(f.engine.get(&task.id).await.unwrap().completed_at, done.completed_at);
    }

    #[tokio::test]
    async fn test_component_lifecycle() {
        let target = ScriptedHost::new()
            .respond("docker ps", "Up 2 minutes\n")
            .respond("is-active", "failed\n");
        let f = fixture(ScriptedConnector::new().host("10.0.0.7", target.clone()));
        let h1 = f.add_host("10.0.0.7", false).await;

        let task = f
            .engine
            .create(request(
                vec![h1],
                vec![
                    component("node-exporter", DeployMethod::Container),
                    component("victoriametrics", DeployMethod::ServiceManager),
                ],
            ))
            .await
            .unwrap();
        f.engine.execute(&task.id).await.unwrap().wait().await.unwrap();
        assert_eq!(f.engine.get_host_components(h1).await.unwrap().len(), 2);

        assert_eq!(
            f.engine
                .check_component_status(h1, "node-exporter")
                .await
                .unwrap(),
            ComponentStatus::Running
        );
        assert_eq!(
            f.engine
                .check_component_status(h1, "victoriametrics")
                .await
                .unwrap(),
            ComponentStatus::Failed
        );

        f.engine.stop_component(h1, "node-exporter").await.unwrap();
        let components = f.engine.get_host_components(h1).await.unwrap();
        let node = components.iter().find(|c| c.name == "node-exporter").unwrap();
        assert_eq!(node.status, ComponentStatus::Stopped);

        f.engine
            .uninstall_component(h1, "victoriametrics")
            .await
            .unwrap();
        assert_eq!(f.engine.get_host_components(h1).await.unwrap().len(), 1);
        assert!(matches!(
            f.engine.check_component_status(h1, "victoriametrics").await,
            Err(CoreError::NotFound(_))
        ));
        assert_eq!(target.open_sessions(), 0);
    }
}
