//! 统一错误处理
//!
//! - `CoreError`：发现/部署核心的错误分类，供引擎和服务层使用
//! - `ApiError`：实现 `IntoResponse`，HTTP 层统一的错误出口

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;

use crate::infra::ssh::SshError;
use crate::infra::templates::TemplateError;
use crate::services::deploy::InstallError;
use crate::services::ip_range::{InvalidPortError, InvalidRangeError};
use crate::services::vault::{DecryptionError, EncryptionError};
use crate::state::task_store::StoreError;

/// 核心错误分类
#[derive(Debug, Error)]
pub enum CoreError {
    /// 输入无效（地址范围、端口列表、参数）
    #[error("invalid input: {0}")]
    InputValidation(String),

    /// 主机不可达 / 连接失败 / 主机密钥不匹配
    #[error("connectivity error: {0}")]
    Connectivity(String),

    /// 凭据被远端拒绝
    #[error("authentication failed: {0}")]
    Authentication(String),

    /// 模板渲染失败或未知组件
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// 组件安装步骤失败
    #[error("install failed: {0}")]
    Install(String),

    /// 任务存储读写失败
    #[error("persistence error: {0}")]
    Persistence(String),

    /// 密文损坏或非本密钥加密
    #[error(transparent)]
    Decryption(#[from] DecryptionError),

    /// 资源不存在
    #[error("{0} not found")]
    NotFound(String),

    /// 状态冲突（如：重复启动任务）
    #[error("conflict: {0}")]
    Conflict(String),
}

impl CoreError {
    pub fn invalid(message: impl Into<String>) -> Self {
        Self::InputValidation(message.into())
    }

    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 错误类别标识，用于日志和 API 响应
    pub fn kind(&self) -> &'static str {
        match self {
            CoreError::InputValidation(_) => "input_validation",
            CoreError::Connectivity(_) => "connectivity",
            CoreError::Authentication(_) => "authentication",
            CoreError::Template(_) => "template",
            CoreError::Install(_) => "install",
            CoreError::Persistence(_) => "persistence",
            CoreError::Decryption(_) => "decryption",
            CoreError::NotFound(_) => "not_found",
            CoreError::Conflict(_) => "conflict",
        }
    }
}

impl From<InvalidRangeError> for CoreError {
    fn from(e: InvalidRangeError) -> Self {
        CoreError::InputValidation(e.to_string())
    }
}

impl From<InvalidPortError> for CoreError {
    fn from(e: InvalidPortError) -> Self {
        CoreError::InputValidation(e.to_string())
    }
}

impl From<EncryptionError> for CoreError {
    fn from(e: EncryptionError) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

impl From<InstallError> for CoreError {
    fn from(e: InstallError) -> Self {
        CoreError::Install(e.to_string())
    }
}

impl From<StoreError> for CoreError {
    fn from(e: StoreError) -> Self {
        CoreError::Persistence(e.to_string())
    }
}

impl From<SshError> for CoreError {
    fn from(e: SshError) -> Self {
        match e {
            SshError::AuthenticationRejected { .. } | SshError::InvalidKey(_) => {
                CoreError::Authentication(e.to_string())
            }
            _ => CoreError::Connectivity(e.to_string()),
        }
    }
}

/// 便捷类型别名
pub type CoreResult<T> = Result<T, CoreError>;

/// API 错误响应结构
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: error.into(),
            message: message.into(),
        }
    }
}

/// 统一 API 错误类型
#[derive(Debug)]
pub enum ApiError {
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest { kind: &'static str, message: String },
    /// 409 - 冲突（如：任务已在执行）
    Conflict(String),
    /// 502 - 远端主机操作失败
    BadGateway { kind: &'static str, message: String },
    /// 500 - 内部错误
    Internal(String),
}

impl ApiError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }
}

impl From<CoreError> for ApiError {
    fn from(e: CoreError) -> Self {
        let kind = e.kind();
        match e {
            CoreError::NotFound(resource) => ApiError::NotFound(resource),
            CoreError::Conflict(msg) => ApiError::Conflict(msg),
            CoreError::InputValidation(_) | CoreError::Template(_) => ApiError::BadRequest {
                kind,
                message: e.to_string(),
            },
            CoreError::Connectivity(_) | CoreError::Authentication(_) | CoreError::Install(_) => {
                ApiError::BadGateway {
                    kind,
                    message: e.to_string(),
                }
            }
            CoreError::Persistence(_) | CoreError::Decryption(_) => {
                ApiError::Internal(e.to_string())
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest { kind, message } => (StatusCode::BAD_REQUEST, kind, message),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::BadGateway { kind, message } => (StatusCode::BAD_GATEWAY, kind, message),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest { message, .. } => write!(f, "Bad request: {}", message),
            ApiError::Conflict(m) => write!(f, "Conflict: {}", m),
            ApiError::BadGateway { message, .. } => write!(f, "Remote failure: {}", message),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;
