//! 主机发现 API
//!
//! 包含 /discovery/tasks/* 端点

use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;

use super::TaskAccepted;
use crate::domain::discovery::DiscoverySpec;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/discovery/tasks", get(list_tasks).post(create_task))
        .route("/discovery/tasks/:id", get(get_task))
        .route("/discovery/tasks/:id/start", post(start_task))
}

/// 创建发现任务（不会立即执行）
///
/// POST /discovery/tasks
async fn create_task(
    State(state): State<Arc<AppState>>,
    Json(spec): Json<DiscoverySpec>,
) -> ApiResult<impl IntoResponse> {
    let task = state.discovery.create(spec).await?;
    Ok((StatusCode::CREATED, Json(task)))
}

/// 列出未过期的发现任务
///
/// GET /discovery/tasks
async fn list_tasks(State(state): State<Arc<AppState>>) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.discovery.list().await?))
}

/// 启动发现任务，立即返回，进度通过快照或事件流获取
///
/// POST /discovery/tasks/:id/start
async fn start_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let handle = state.discovery.start(&id).await?;
    Ok((StatusCode::ACCEPTED, Json(TaskAccepted::running(handle.task_id))))
}

/// 查询发现任务快照
///
/// GET /discovery/tasks/:id
async fn get_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    Ok(Json(state.discovery.get(&id).await?))
}
