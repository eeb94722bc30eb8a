//! 统一错误处理
//!
//! 提供 `ApiError` 枚举实现 `IntoResponse`，各模块错误通过 `From` 转换

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::infra::command::CommandError;
use crate::infra::github::GitHubError;
use crate::services::scanner::ScanError;

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
    /// 401 - GitHub token 无效或缺失
    Unauthorized(String),
    /// 404 - 资源未找到
    NotFound(String),
    /// 400 - 请求无效
    BadRequest(String),
    /// 409 - 冲突（如：同一仓库的部署已在进行）
    Conflict(String),
    /// 502 - 上游（GitHub）返回错误
    BadGateway(String),
    /// 500 - 内部错误
    Internal(String),
}

impl ApiError {
    /// 创建未授权错误
    pub fn unauthorized(message: impl Into<String>) -> Self {
        Self::Unauthorized(message.into())
    }

    /// 创建未找到错误
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound(resource.into())
    }

    /// 创建请求无效错误
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::BadRequest(message.into())
    }

    /// 创建冲突错误
    pub fn conflict(message: impl Into<String>) -> Self {
        Self::Conflict(message.into())
    }

    pub fn bad_gateway(message: impl Into<String>) -> Self {
        Self::BadGateway(message.into())
    }

    /// 创建内部错误
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal(message.into())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, error_type, message) = match self {
            ApiError::Unauthorized(msg) => (StatusCode::UNAUTHORIZED, "unauthorized", msg),
            ApiError::NotFound(resource) => (
                StatusCode::NOT_FOUND,
                "not_found",
                format!("{} not found", resource),
            ),
            ApiError::BadRequest(msg) => (StatusCode::BAD_REQUEST, "bad_request", msg),
            ApiError::Conflict(msg) => (StatusCode::CONFLICT, "conflict", msg),
            ApiError::BadGateway(msg) => (StatusCode::BAD_GATEWAY, "upstream_error", msg),
            ApiError::Internal(msg) => (StatusCode::INTERNAL_SERVER_ERROR, "internal_error", msg),
        };

        let body = ErrorResponse::new(error_type, message);
        (status, Json(body)).into_response()
    }
}

impl std::fmt::Display for ApiError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ApiError::Unauthorized(m) => write!(f, "Unauthorized: {}", m),
            ApiError::NotFound(r) => write!(f, "Not found: {}", r),
            ApiError::BadRequest(m) => write!(f, "Bad request: {}", m),
            ApiError::Conflict(m) => write!(f, "Conflict: {}", m),
            ApiError::BadGateway(m) => write!(f, "Bad gateway: {}", m),
            ApiError::Internal(m) => write!(f, "Internal error: {}", m),
        }
    }
}

impl std::error::Error for ApiError {}

impl From<GitHubError> for ApiError {
    fn from(err: GitHubError) -> Self {
        match err {
            GitHubError::Unauthorized => {
                ApiError::unauthorized("GitHub rejected the token (invalid, expired or missing scopes)")
            }
            GitHubError::NotFound(what) => ApiError::not_found(what),
            GitHubError::Validation(msg) => ApiError::bad_request(msg),
            other => ApiError::bad_gateway(other.to_string()),
        }
    }
}

impl From<ScanError> for ApiError {
    fn from(err: ScanError) -> Self {
        match err {
            ScanError::NotFound(path) => {
                ApiError::not_found(format!("Folder '{}'", path.display()))
            }
            ScanError::NotADirectory(path) => {
                ApiError::bad_request(format!("Not a directory: {}", path.display()))
            }
            ScanError::Io { .. } => ApiError::internal(err.to_string()),
        }
    }
}

impl From<CommandError> for ApiError {
    fn from(err: CommandError) -> Self {
        ApiError::internal(err.to_string())
    }
}

/// 便捷类型别名
pub type ApiResult<T> = Result<T, ApiError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_response_new() {
        let resp = ErrorResponse::new("test_error", "Test message");
        assert_eq!(resp.error, "test_error");
        assert_eq!(resp.message, "Test message");
    }

    #[test]
    fn test_github_unauthorized_maps_to_401() {
        let resp = ApiError::from(GitHubError::Unauthorized).into_response();
        assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
    }

    #[test]
    fn test_github_api_error_maps_to_502() {
        let err = GitHubError::Api {
            status: 500,
            message: "boom".to_string(),
        };
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::BAD_GATEWAY);
    }

    #[test]
    fn test_scan_not_found_maps_to_404() {
        let err = ScanError::NotFound(std::path::PathBuf::from("/nope"));
        let resp = ApiError::from(err).into_response();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }
}
