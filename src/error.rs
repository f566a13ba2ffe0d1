use crate::access::AccessDecision;
use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    /// 守卫拒绝（需要密码 / 密码错误 / 已锁定）
    #[error("访问被拒绝: {0:?}")]
    AccessDenied(AccessDecision),

    #[error("请求参数错误: {0}")]
    BadRequest(String),

    #[error("禁止访问: {0}")]
    Forbidden(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error("文件过大: {0}")]
    PayloadTooLarge(String),

    #[error("内部错误: {0}")]
    InternalError(String),
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            AppError::AccessDenied(decision) => {
                // 守卫的拒绝是正常结果，统一 401，结构由判定本身决定
                let body = decision
                    .denial_body()
                    .unwrap_or_else(|| json!({ "requiresPassword": true }));
                return (StatusCode::UNAUTHORIZED, Json(body)).into_response();
            }
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            AppError::Forbidden(msg) => (StatusCode::FORBIDDEN, msg),
            AppError::NotFound(msg) => (StatusCode::NOT_FOUND, msg),
            AppError::PayloadTooLarge(msg) => (StatusCode::PAYLOAD_TOO_LARGE, msg),
            AppError::InternalError(msg) => (StatusCode::INTERNAL_SERVER_ERROR, msg),
        };

        // 浏览器端读取的是 result.error 字符串
        (status, Json(json!({ "error": message }))).into_response()
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => {
                tracing::debug!(error = %err, "文件不存在");
                AppError::NotFound("文件不存在".to_string())
            }
            kind => {
                tracing::error!(error = %err, kind = ?kind, "IO 错误");
                AppError::InternalError(format!("IO 错误: {}", err))
            }
        }
    }
}

impl AppError {
    /// 记录上下文后返回给客户端一条简短的消息
    ///
    /// 使用示例：
    /// ```ignore
    /// AppError::internal_with_context("获取文件列表失败", &err)
    /// ```
    pub fn internal_with_context(context: &str, err: &dyn std::fmt::Display) -> Self {
        tracing::error!(
            context = context,
            error = %err,
            "内部错误发生"
        );
        AppError::InternalError(context.to_string())
    }
}
