//! 错误处理模块
//!
//! 定义应用程序的错误类型和错误处理逻辑。
//! 重复事件、迟到事件与异常标记都是处理结果而不是错误，不在这里出现。

use axum::{
    Json,
    extract::rejection::JsonRejection,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigValidationError;
use crate::ingest::RejectReason;
use crate::models::evidence::Skill;
use crate::models::session::SessionStatus;
use crate::storage::StoreError;

/// 应用程序错误类型
#[derive(Error, Debug)]
pub enum AppError {
    /// 参数验证错误
    #[error("参数验证失败: {0}")]
    Validation(String),

    /// 会话不存在
    #[error("会话不存在: {0}")]
    SessionNotFound(String),

    /// 会话已处于终态
    #[error("会话 {session_id} 已结束 ({})", status.as_str())]
    SessionTerminal {
        session_id: String,
        status: SessionStatus,
    },

    /// 单个事件被拒绝
    #[error("事件被拒绝: {0}")]
    Rejected(RejectReason),

    /// 事件存储暂时不可用（可重试）
    #[error("事件存储不可用: {0}")]
    StoreUnavailable(String),

    /// 会话执行上下文饱和（可重试）
    #[error("会话 {session_id} 繁忙，请在 {retry_after_ms}ms 后重试")]
    Backpressure {
        session_id: String,
        retry_after_ms: u64,
    },

    /// 调用方取消
    #[error("操作已取消: {0}")]
    Cancelled(String),

    /// 没有新鲜证据可供融合
    #[error("学生 {student_id} 的 {skill} 没有可用的新鲜证据")]
    NoEvidence { student_id: String, skill: Skill },

    /// 资源不存在
    #[error("资源不存在: {0}")]
    NotFound(String),

    /// 配置错误
    #[error("配置错误: {0}")]
    Config(String),

    /// 序列化错误
    #[error("序列化错误: {0}")]
    Serialization(String),

    /// 内部错误
    #[error("内部错误: {0}")]
    Internal(String),

    /// IO 错误
    #[error("IO 错误: {0}")]
    Io(String),
}

impl AppError {
    /// 调用方重发同一请求是否可能成功
    pub fn is_retryable(&self) -> bool {
        match self {
            AppError::StoreUnavailable(_) | AppError::Backpressure { .. } => true,
            AppError::Rejected(reason) => reason.retryable(),
            _ => false,
        }
    }
}

impl From<RejectReason> for AppError {
    fn from(reason: RejectReason) -> Self {
        match reason {
            RejectReason::SessionNotFound { session_id } => AppError::SessionNotFound(session_id),
            RejectReason::SessionTerminal { session_id, status } => {
                AppError::SessionTerminal { session_id, status }
            }
            RejectReason::StoreUnavailable { message } => AppError::StoreUnavailable(message),
            RejectReason::Backpressure {
                session_id,
                retry_after_ms,
            } => AppError::Backpressure {
                session_id,
                retry_after_ms,
            },
            other => AppError::Rejected(other),
        }
    }
}

impl From<StoreError> for AppError {
    fn from(e: StoreError) -> Self {
        AppError::StoreUnavailable(e.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e.to_string())
    }
}

impl From<figment::Error> for AppError {
    fn from(e: figment::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<ConfigValidationError> for AppError {
    fn from(e: ConfigValidationError) -> Self {
        AppError::Config(e.to_string())
    }
}

impl From<validator::ValidationErrors> for AppError {
    fn from(e: validator::ValidationErrors) -> Self {
        AppError::Validation(e.to_string())
    }
}

/// 请求体无法解析时同样返回结构化错误
impl From<JsonRejection> for AppError {
    fn from(rejection: JsonRejection) -> Self {
        AppError::Validation(rejection.body_text())
    }
}

/// Axum response implementation for AppError
impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code) = (&self).into();
        let mut body = ErrorResponse::new(&code, &self.to_string()).with_retryable(self.is_retryable());
        if let AppError::Rejected(reason) = &self {
            body = body.with_details(reason.code());
        }
        (
            StatusCode::from_u16(status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
            Json(body),
        )
            .into_response()
    }
}

/// 错误响应
#[derive(Debug, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// 错误代码
    pub code: String,
    /// 错误消息
    pub message: String,
    /// 详细信息（事件拒绝时为原因代码）
    pub details: Option<String>,
    /// 是否可以原样重试
    #[serde(default)]
    pub retryable: bool,
}

impl ErrorResponse {
    /// 创建新错误响应
    pub fn new(code: &str, message: &str) -> Self {
        Self {
            code: code.to_string(),
            message: message.to_string(),
            details: None,
            retryable: false,
        }
    }

    /// 添加详细信息
    pub fn with_details(mut self, details: &str) -> Self {
        self.details = Some(details.to_string());
        self
    }

    pub fn with_retryable(mut self, retryable: bool) -> Self {
        self.retryable = retryable;
        self
    }
}

/// HTTP 状态码映射
impl From<&AppError> for (u16, String) {
    fn from(err: &AppError) -> (u16, String) {
        match err {
            AppError::Validation(_) => (400, "BAD_REQUEST".to_string()),
            AppError::Rejected(_) => (422, "VALIDATION_ERROR".to_string()),
            AppError::SessionNotFound(_) => (404, "SESSION_NOT_FOUND".to_string()),
            AppError::NotFound(_) => (404, "NOT_FOUND".to_string()),
            AppError::SessionTerminal { .. } => (409, "SESSION_TERMINAL".to_string()),
            AppError::NoEvidence { .. } => (422, "NO_EVIDENCE".to_string()),
            AppError::Backpressure { .. } => (429, "BACKPRESSURE".to_string()),
            AppError::Cancelled(_) => (499, "CANCELLED".to_string()),
            AppError::StoreUnavailable(_) => (503, "STORE_UNAVAILABLE".to_string()),
            AppError::Config(_) => (500, "CONFIG_ERROR".to_string()),
            _ => (500, "INTERNAL_ERROR".to_string()),
        }
    }
}

/// 结果类型别名
pub type Result<T> = std::result::Result<T, AppError>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::FieldKind;

    #[test]
    fn test_reject_reason_maps_to_taxonomy() {
        let err: AppError = RejectReason::SessionNotFound {
            session_id: "s1".into(),
        }
        .into();
        assert!(matches!(err, AppError::SessionNotFound(_)));

        let err: AppError = RejectReason::FieldTypeMismatch {
            field: "task_id".into(),
            expected: FieldKind::Text,
        }
        .into();
        let (status, code) = (&err).into();
        assert_eq!((status, code.as_str()), (422, "VALIDATION_ERROR"));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = AppError::StoreUnavailable("timeout".into());
        assert!(err.is_retryable());
        let (status, _) = (&err).into();
        assert_eq!(status, 503);

        let err = AppError::Backpressure {
            session_id: "s1".into(),
            retry_after_ms: 200,
        };
        assert!(err.is_retryable());
    }
}
