//! API 模块
//!
//! HTTP handlers 和路由组装

pub mod credentials;
pub mod deployment;
pub mod discovery;
pub mod health;
pub mod hosts;
pub mod tasks;

use axum::Router;
use serde::Serialize;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::state::AppState;

/// 启动 / 执行任务后的响应
#[derive(Debug, Serialize)]
pub struct TaskAccepted {
    pub task_id: String,
    pub status: &'static str,
    pub events_url: String,
}

impl TaskAccepted {
    pub fn running(task_id: String) -> Self {
        let events_url = format!("/tasks/{}/events", task_id);
        Self {
            task_id,
            status: "running",
            events_url,
        }
    }
}

/// 构建完整的 API 路由
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        // Health
        .merge(health::router())
        // Discovery
        .merge(discovery::router())
        // Deployment
        .merge(deployment::router())
        // Hosts & components
        .merge(hosts::router())
        // Credentials
        .merge(credentials::router())
        // Task control & events
        .merge(tasks::router())
        // Middleware
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}
