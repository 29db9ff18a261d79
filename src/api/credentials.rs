//! 凭据 API
//!
//! 返回体中不包含任何秘密字段

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use std::sync::Arc;

use crate::domain::credential::NewCredential;
use crate::error::ApiResult;
use crate::state::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/credentials", get(list_credentials).post(create_credential))
}

/// POST /credentials
async fn create_credential(
    State(state): State<Arc<AppState>>,
    Json(request): Json<NewCredential>,
) -> ApiResult<impl IntoResponse> {
    let credential = state.credentials.create(request).await?;
    Ok((StatusCode::CREATED, Json(credential)))
}

/// GET /credentials
async fn list_credentials(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let credentials = state.credentials.list().await;
    Json(serde_json::json!({ "total": credentials.len(), "credentials": credentials }))
}
