//! 健康检查 API

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::infra::host_directory::HostDirectory;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    instance_id: String,
    timestamp: String,
    uptime_secs: i64,
    running_tasks: usize,
    event_channels: usize,
    known_hosts: usize,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// 健康检查 - 返回状态、版本、运行时间等信息
///
/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let now = chrono::Utc::now();
    Json(HealthResponse {
        status: "ok",
        service: "netmon-orchestrator",
        version: VERSION,
        instance_id: state.config.instance_id.clone(),
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        running_tasks: state.registry.running_count().await,
        event_channels: state.events.active_count().await,
        known_hosts: state.hosts.list_hosts().await.len(),
    })
}
