//! 主机与组件 API
//!
//! 包含 /hosts/* 端点

use axum::{
    extract::{Path, State},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;

use crate::domain::host::ComponentStatus;
use crate::error::{ApiError, ApiResult};
use crate::infra::host_directory::HostDirectory;
use crate::state::AppState;

/// 组件状态响应
#[derive(Debug, Serialize)]
struct ComponentStatusResponse {
    host_id: u64,
    name: String,
    status: ComponentStatus,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/hosts", get(list_hosts))
        .route("/hosts/:id", get(get_host))
        .route("/hosts/:id/test", post(test_connection))
        .route("/hosts/:id/components", get(list_components))
        .route(
            "/hosts/:id/components/:name",
            axum::routing::delete(uninstall_component),
        )
        .route("/hosts/:id/components/:name/status", get(component_status))
        .route("/hosts/:id/components/:name/start", post(start_component))
        .route("/hosts/:id/components/:name/stop", post(stop_component))
}

/// GET /hosts
async fn list_hosts(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let hosts = state.hosts.list_hosts().await;
    Json(serde_json::json!({ "total": hosts.len(), "hosts": hosts }))
}

/// GET /hosts/:id
async fn get_host(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    let host = state
        .hosts
        .get_host(id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Host {}", id)))?;
    Ok(Json(host))
}

/// 检查可达性与 SSH 登录，并更新主机状态
///
/// POST /hosts/:id/test
async fn test_connection(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.connections.test_host(id).await?))
}

/// 主机上已部署的组件
///
/// GET /hosts/:id/components
async fn list_components(
    State(state): State<Arc<AppState>>,
    Path(id): Path<u64>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.deployment.get_host_components(id).await?))
}

/// 远程检查组件运行状态
///
/// GET /hosts/:id/components/:name/status
async fn component_status(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(u64, String)>,
) -> ApiResult<impl IntoResponse> {
    let status = state.deployment.check_component_status(id, &name).await?;
    Ok(Json(ComponentStatusResponse {
        host_id: id,
        name,
        status,
    }))
}

/// POST /hosts/:id/components/:name/start
async fn start_component(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(u64, String)>,
) -> ApiResult<impl IntoResponse> {
    state.deployment.start_component(id, &name).await?;
    Ok(Json(ComponentStatusResponse {
        host_id: id,
        name,
        status: ComponentStatus::Running,
    }))
}

/// POST /hosts/:id/components/:name/stop
async fn stop_component(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(u64, String)>,
) -> ApiResult<impl IntoResponse> {
    state.deployment.stop_component(id, &name).await?;
    Ok(Json(ComponentStatusResponse {
        host_id: id,
        name,
        status: ComponentStatus::Stopped,
    }))
}

/// 卸载组件
///
/// DELETE /hosts/:id/components/:name
async fn uninstall_component(
    State(state): State<Arc<AppState>>,
    Path((id, name)): Path<(u64, String)>,
) -> ApiResult<impl IntoResponse> {
    state.deployment.uninstall_component(id, &name).await?;
    Ok(Json(serde_json::json!({ "success": true, "host_id": id, "name": name })))
}
