//! 部署 API
//!
//! 包含 /deployments/* 端点

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::TaskAccepted;
use crate::domain::deployment::DeploymentRequest;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/deployments", get(list_deployments).post(create_deployment))
        .route("/deployments/:id", get(get_deployment))
        .route("/deployments/:id/execute", post(execute_deployment))
}

/// 创建部署任务，组件模板在此时渲染
///
/// POST /deployments
async fn create_deployment(
    State(state): State<Arc<AppState>>,
    Json(request): Json<DeploymentRequest>,
) -> ApiResult<impl IntoResponse> {
    let task = state.deployment.create(request).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// 执行部署任务
///
/// POST /deployments/:id/execute
async fn execute_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.deployment.execute(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskAccepted::running(handle.task_id))))
}

/// GET /deployments
async fn list_deployments(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.deployment.list().await?))
}

/// GET /deployments/:id
async fn get_deployment(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.deployment.get(&id).await?))
}
