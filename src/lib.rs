//! Netmon Orchestrator - 主机发现与监控组件部署编排
//!
//! 扫描地址范围发现主机，通过 SSH 采集系统信息，并把监控组件
//! （采集器、存储、可视化、告警）部署到已发现的主机上。

pub mod api;
pub mod config;
pub mod domain;
pub mod error;
pub mod infra;
pub mod services;
pub mod state;

#[cfg(test)]
mod testing;

use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use config::env::constants::{CLEANUP_INTERVAL_SECS, SHUTDOWN_GRACE_SECS, VERSION};
use config::PlatformConfig;
use state::AppState;

/// 命令行覆盖的运行参数
#[derive(Debug, Default, Clone)]
pub struct RuntimeConfig {
    pub port_override: Option<u16>,
}

/// 初始化日志
pub fn init_tracing() {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// 加载配置并运行 HTTP 服务，直到收到 Ctrl-C
pub async fn run(runtime: RuntimeConfig) -> anyhow::Result<()> {
    let mut config = PlatformConfig::from_env();
    if let Some(port) = runtime.port_override {
        config.port = port;
    }
    let port = config.port;

    let state = Arc::new(AppState::new(config).await?);

    tracing::info!(version = VERSION, port, "Starting netmon orchestrator");

    let cleanup = spawn_cleanup(state.clone());

    let app = api::router(state.clone());
    let listener = tokio::net::TcpListener::bind(("0.0.0.0", port))
        .await
        .with_context(|| format!("failed to bind port {}", port))?;

    tracing::info!(addr = %listener.local_addr()?, "Listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    // 通知所有运行中的任务退出，等它们写完 cancelled 快照
    state.registry.shutdown();
    state
        .registry
        .drain(Duration::from_secs(SHUTDOWN_GRACE_SECS))
        .await;
    cleanup.abort();
    tracing::info!("Shutdown complete");
    Ok(())
}

/// 后台定期清理过期快照和事件通道
fn spawn_cleanup(state: Arc<AppState>) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(CLEANUP_INTERVAL_SECS));
        interval.tick().await;
        loop {
            interval.tick().await;
            state.cleanup().await;
        }
    })
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    tracing::info!("Shutdown signal received");
}
