//! 任务控制 API
//!
//! 包含 /tasks/:id/cancel 和 /tasks/:id/events 端点

use axum::{
    extract::{Path, State},
    response::{
        sse::{Event, KeepAlive, Sse},
        IntoResponse,
    },
    routing::{get, post},
    Json, Router,
};
use futures::stream::Stream;
use std::{convert::Infallible, sync::Arc, time::Duration};
use tokio::sync::broadcast;
use tracing::warn;

use crate::error::{ApiError, ApiResult};
use crate::state::event_hub::{TaskEvent, TaskEventKind};
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tasks/:id/cancel", post(cancel_task))
        .route("/tasks/:id/events", get(stream_events))
}

/// 取消运行中的任务，任务以 failed / "cancelled" 结束
///
/// POST /tasks/:id/cancel
async fn cancel_task(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    if !state.cancel_task(&id).await {
        return Err(ApiError::not_found(format!("Running task '{}'", id)));
    }
    Ok(Json(serde_json::json!({ "task_id": id, "cancelled": true })))
}

/// 实时推送任务事件 (SSE)，收到 finished 事件后结束
///
/// GET /tasks/:id/events
async fn stream_events(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> ApiResult<Sse<impl Stream<Item = Result<Event, Infallible>>>> {
    let rx = state
        .events
        .subscribe(&id)
        .await
        .ok_or_else(|| ApiError::not_found(format!("Task '{}' events", id)))?;

    // 先订阅再检查，避免错过结束事件
    if !state.registry.is_running(&id).await {
        return Err(ApiError::not_found(format!(
            "Task '{}' not running or already completed",
            id
        )));
    }

    let stream = async_stream::stream! {
        let mut rx = rx;
        loop {
            match rx.recv().await {
                Ok(event) => {
                    let done = event.kind == TaskEventKind::Finished;
                    yield Ok(to_sse(&event));
                    if done {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!(task_id = %id, lagged = n, "Event subscriber lagged");
                    continue;
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Ok(Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keepalive"),
    ))
}

fn to_sse(event: &TaskEvent) -> Event {
    let json = serde_json::to_string(event).unwrap_or_default();
    let name = match event.kind {
        TaskEventKind::Started => "started",
        TaskEventKind::Progress => "progress",
        TaskEventKind::HostDone => "host_done",
        TaskEventKind::Finished => "finished",
    };
    Event::default().event(name).data(json)
}
