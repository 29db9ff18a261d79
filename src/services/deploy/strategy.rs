//! 组件安装策略
//!
//! - container：确保 docker 可用，上传 compose 文件，`docker compose up -d`
//! - binary：下载发布包、解压、安装可执行文件、创建服务账户，然后按 service_manager 处理
//! - service_manager：要求可执行文件已存在，创建服务账户，上传 systemd unit，daemon-reload / enable / start
//!
//! 另含已部署组件的状态检查与启停卸载。

use std::time::Duration;

use thiserror::Error;
use tracing::{debug, info, warn};

use crate::domain::deployment::RenderedComponent;
use crate::domain::host::{ComponentStatus, DeployMethod};
use crate::domain::ssh::CommandOutput;
use crate::infra::ssh::{shell_quote, RemoteSession};

const DOCKER_INSTALL_SCRIPT: &str = "https://get.docker.com";
const UNIT_DIR: &str = "/etc/systemd/system";
const BIN_DIR: &str = "/usr/local/bin";

/// 安装步骤失败
#[derive(Debug, Error)]
pub enum InstallError {
    #[error("download failed for {target}: {message}")]
    Download { target: String, message: String },

    #[error("install failed for {target}: {message}")]
    Install { target: String, message: String },

    #[error("upload failed for {target}: {message}")]
    Upload { target: String, message: String },

    #[error("start failed for {target}: {message}")]
    Start { target: String, message: String },
}

/// 单台主机上的执行环境
pub struct InstallContext<'a> {
    pub session: &'a dyn RemoteSession,
    /// 特权命令前缀
    pub sudo: &'static str,
    /// 普通命令超时
    pub command_timeout: Duration,
    /// 安装 docker、拉镜像、下载等长耗时命令的超时
    pub long_timeout: Duration,
    pub install_root: &'a str,
}

impl InstallContext<'_> {
    async fn run(&self, command: &str, timeout: Duration) -> Result<CommandOutput, String> {
        debug!(command = %command, "Running remote command");
        match self.session.exec(command, timeout).await {
            Ok(output) if output.success() => Ok(output),
            Ok(output) => Err(output.diagnostic()),
            Err(e) => Err(e.to_string()),
        }
    }

    /// 失败只记日志
    async fn run_best_effort(&self, command: &str) {
        if let Err(reason) = self.run(command, self.command_timeout).await {
            warn!(command = %command, reason = %reason, "Remote command failed, continuing");
        }
    }

    pub async fn mkdir(&self, dir: &str) -> Result<(), InstallError> {
        self.run(
            &format!("{}mkdir -p {}", self.sudo, shell_quote(dir)),
            self.command_timeout,
        )
        .await
        .map(|_| ())
        .map_err(|message| InstallError::Install {
            target: dir.to_string(),
            message,
        })
    }

    pub async fn upload(&self, path: &str, content: &str) -> Result<(), InstallError> {
        self.session
            .write_file(path, content.as_bytes())
            .await
            .map_err(|e| InstallError::Upload {
                target: path.to_string(),
                message: e.to_string(),
            })
    }

    /// 容器组件的工作目录
    fn component_dir(&self, name: &str) -> String {
        format!("{}/{}", self.install_root, name)
    }
}

/// 安装单个组件，返回写入远端的文件路径
pub async fn install(
    ctx: &InstallContext<'_>,
    component: &RenderedComponent,
) -> Result<Vec<String>, InstallError> {
    info!(
        component = %component.name,
        method = component.method.as_str(),
        "Installing component"
    );

    match component.method {
        DeployMethod::Container => install_container(ctx, component).await,
        DeployMethod::Binary => {
            let mut files = install_binary(ctx, component).await?;
            files.extend(install_service(ctx, component).await?);
            Ok(files)
        }
        DeployMethod::ServiceManager => {
            require_binary(ctx, component).await?;
            install_service(ctx, component).await
        }
    }
}

/// service_manager 方式不下载发布包，可执行文件必须已在主机上
async fn require_binary(
    ctx: &InstallContext<'_>,
    component: &RenderedComponent,
) -> Result<(), InstallError> {
    let binary_path = format!("{}/{}", BIN_DIR, component.binary_name);
    ctx.run(
        &format!("test -x {}", shell_quote(&binary_path)),
        ctx.command_timeout,
    )
    .await
    .map(|_| ())
    .map_err(|_| InstallError::Install {
        target: component.name.clone(),
        message: format!("{} is not installed", binary_path),
    })
}

/// 创建无登录的服务账户，已存在时跳过
async fn ensure_service_user(
    ctx: &InstallContext<'_>,
    component: &RenderedComponent,
) -> Result<(), InstallError> {
    let user = shell_quote(&component.service_user);
    ctx.run(
        &format!(
            "id -u {user} >/dev/null 2>&1 || {sudo}useradd --no-create-home --shell /bin/false {user}",
            user = user,
            sudo = ctx.sudo
        ),
        ctx.command_timeout,
    )
    .await
    .map(|_| ())
    .map_err(|message| InstallError::Install {
        target: component.name.clone(),
        message,
    })
}

async fn ensure_docker(ctx: &InstallContext<'_>) -> Result<(), InstallError> {
    if ctx.run("docker --version", ctx.command_timeout).await.is_ok() {
        return Ok(());
    }

    info!("Docker not found, installing");
    let script = format!(
        "curl -fsSL {} | {}sh",
        DOCKER_INSTALL_SCRIPT, ctx.sudo
    );
    ctx.run(&script, ctx.long_timeout)
        .await
        .map_err(|message| InstallError::Install {
            target: "docker".to_string(),
            message,
        })?;
    ctx.run_best_effort(&format!("{}systemctl enable --now docker", ctx.sudo))
        .await;
    Ok(())
}

async fn install_container(
    ctx: &InstallContext<'_>,
    component: &RenderedComponent,
) -> Result<Vec<String>, InstallError> {
    let compose = component
        .compose_file
        .as_deref()
        .ok_or_else(|| InstallError::Install {
            target: component.name.clone(),
            message: "no compose file rendered".to_string(),
        })?;

    ensure_docker(ctx).await?;

    let dir = ctx.component_dir(&component.name);
    ctx.mkdir(&dir).await?;
    let path = format!("{}/docker-compose.yml", dir);
    ctx.upload(&path, compose).await?;

    let quoted = shell_quote(&dir);
    let up = format!("cd {} && {}docker compose up -d", quoted, ctx.sudo);
    if let Err(first) = ctx.run(&up, ctx.long_timeout).await {
        debug!(reason = %first, "docker compose failed, trying docker-compose");
        let legacy = format!("cd {} && {}docker-compose up -d", quoted, ctx.sudo);
        ctx.run(&legacy, ctx.long_timeout)
            .await
            .map_err(|message| InstallError::Start {
                target: component.name.clone(),
                message,
            })?;
    }

    Ok(vec![path])
}

async fn install_binary(
    ctx: &InstallContext<'_>,
    component: &RenderedComponent,
) -> Result<Vec<String>, InstallError> {
    let url = component
        .binary_url
        .as_deref()
        .ok_or_else(|| InstallError::Download {
            target: component.name.clone(),
            message: "no release url".to_string(),
        })?;
    let install_err = |message: String| InstallError::Install {
        target: component.name.clone(),
        message,
    };

    let archive = format!("/tmp/{}.tar.gz", component.name);
    let work_dir = format!("/tmp/{}-install", component.name);

    ctx.run(
        &format!("wget -q -O {} {}", shell_quote(&archive), shell_quote(url)),
        ctx.long_timeout,
    )
    .await
    .map_err(|message| InstallError::Download {
        target: component.name.clone(),
        message,
    })?;

    ctx.run(
        &format!(
            "rm -rf {dir} && mkdir -p {dir} && tar -xzf {archive} -C {dir}",
            dir = shell_quote(&work_dir),
            archive = shell_quote(&archive)
        ),
        ctx.long_timeout,
    )
    .await
    .map_err(install_err)?;

    let binary_path = format!("{}/{}", BIN_DIR, component.binary_name);
    let found = ctx
        .run(
            &format!(
                "find {} -type f -name {} | head -n 1",
                shell_quote(&work_dir),
                shell_quote(&component.binary_name)
            ),
            ctx.command_timeout,
        )
        .await
        .map_err(install_err)?;
    let extracted = found.trimmed();
    if extracted.is_empty() {
        return Err(install_err(format!(
            "{} not found in release archive",
            component.binary_name
        )));
    }

    ctx.run(
        &format!(
            "{}install -m 0755 {} {}",
            ctx.sudo,
            shell_quote(extracted),
            shell_quote(&binary_path)
        ),
        ctx.command_timeout,
    )
    .await
    .map_err(install_err)?;

    ctx.run_best_effort(&format!(
        "rm -rf {} {}",
        shell_quote(&work_dir),
        shell_quote(&archive)
    ))
    .await;

    Ok(vec![binary_path])
}

async fn install_service(
    ctx: &InstallContext<'_>,
    component: &RenderedComponent,
) -> Result<Vec<String>, InstallError> {
    let unit = component
        .unit_file
        .as_deref()
        .ok_or_else(|| InstallError::Install {
            target: component.name.clone(),
            message: "no service unit rendered".to_string(),
        })?;

    ensure_service_user(ctx, component).await?;

    let path = format!("{}/{}.service", UNIT_DIR, component.name);
    ctx.upload(&path, unit).await?;

    let service = shell_quote(&component.name);
    for step in ["daemon-reload".to_string(), format!("enable {}", service)] {
        ctx.run(&format!("{}systemctl {}", ctx.sudo, step), ctx.command_timeout)
            .await
            .map_err(|message| InstallError::Install {
                target: component.name.clone(),
                message,
            })?;
    }

    ctx.run(
        &format!("{}systemctl restart {}", ctx.sudo, service),
        ctx.command_timeout,
    )
    .await
    .map_err(|message| InstallError::Start {
        target: component.name.clone(),
        message,
    })?;

    Ok(vec![path])
}

/// 查询组件运行状态
pub async fn component_status(
    ctx: &InstallContext<'_>,
    method: DeployMethod,
    name: &str,
) -> ComponentStatus {
    match method {
        DeployMethod::Container => {
            let command = format!(
                "{}docker ps --filter name={} --format '{}'",
                ctx.sudo,
                shell_quote(name),
                "{{.Status}}"
            );
            match ctx.run(&command, ctx.command_timeout).await {
                Ok(output) if output.stdout.contains("Up") => ComponentStatus::Running,
                Ok(_) => ComponentStatus::Stopped,
                Err(reason) => {
                    debug!(component = %name, reason = %reason, "docker ps failed");
                    ComponentStatus::Unknown
                }
            }
        }
        DeployMethod::Binary | DeployMethod::ServiceManager => {
            // is-active 对非 active 状态返回非零退出码，只看输出
            let command = format!("systemctl is-active {}", shell_quote(name));
            match ctx.session.exec(&command, ctx.command_timeout).await {
                Ok(output) => match output.trimmed() {
                    "active" => ComponentStatus::Running,
                    "failed" => ComponentStatus::Failed,
                    _ => ComponentStatus::Stopped,
                },
                Err(e) => {
                    debug!(component = %name, error = %e, "systemctl is-active failed");
                    ComponentStatus::Unknown
                }
            }
        }
    }
}

/// 启动组件
pub async fn start(
    ctx: &InstallContext<'_>,
    method: DeployMethod,
    name: &str,
) -> Result<(), InstallError> {
    let command = match method {
        DeployMethod::Container => format!("{}docker start {}", ctx.sudo, shell_quote(name)),
        _ => format!("{}systemctl start {}", ctx.sudo, shell_quote(name)),
    };
    ctx.run(&command, ctx.command_timeout)
        .await
        .map(|_| ())
        .map_err(|message| InstallError::Start {
            target: name.to_string(),
            message,
        })
}

/// 停止组件
pub async fn stop(
    ctx: &InstallContext<'_>,
    method: DeployMethod,
    name: &str,
) -> Result<(), InstallError> {
    let command = match method {
        DeployMethod::Container => format!("{}docker stop {}", ctx.sudo, shell_quote(name)),
        _ => format!("{}systemctl stop {}", ctx.sudo, shell_quote(name)),
    };
    ctx.run(&command, ctx.command_timeout)
        .await
        .map(|_| ())
        .map_err(|message| InstallError::Install {
            target: name.to_string(),
            message,
        })
}

/// 卸载组件，逐条尽力执行
pub async fn uninstall(
    ctx: &InstallContext<'_>,
    method: DeployMethod,
    name: &str,
    binary_name: Option<&str>,
) {
    info!(component = %name, method = method.as_str(), "Uninstalling component");

    match method {
        DeployMethod::Container => {
            let dir = shell_quote(&ctx.component_dir(name));
            let down = format!("cd {} && {}docker compose down", dir, ctx.sudo);
            if ctx.run(&down, ctx.long_timeout).await.is_err() {
                ctx.run_best_effort(&format!(
                    "cd {} && {}docker-compose down",
                    dir, ctx.sudo
                ))
                .await;
            }
            ctx.run_best_effort(&format!("{}rm -rf {}", ctx.sudo, dir))
                .await;
        }
        DeployMethod::Binary | DeployMethod::ServiceManager => {
            let service = shell_quote(name);
            ctx.run_best_effort(&format!("{}systemctl stop {}", ctx.sudo, service))
                .await;
            ctx.run_best_effort(&format!("{}systemctl disable {}", ctx.sudo, service))
                .await;
            ctx.run_best_effort(&format!(
                "{}rm -f {}",
                ctx.sudo,
                shell_quote(&format!("{}/{}.service", UNIT_DIR, name))
            ))
            .await;
            ctx.run_best_effort(&format!("{}systemctl daemon-reload", ctx.sudo))
                .await;

            if let (DeployMethod::Binary, Some(binary)) = (method, binary_name) {
                ctx.run_best_effort(&format!(
                    "{}rm -f {}",
                    ctx.sudo,
                    shell_quote(&format!("{}/{}", BIN_DIR, binary))
                ))
                .await;
            }
        }
    }
}
