//! 批处理服务错误类型定义
//!
//! `JobError` 是任务与调度层的错误；`ApiError` 负责把它们映射为运维 API 的 HTTP 响应。

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use credit_ledger::LedgerError;
use credit_shared::error::CreditError;
use serde_json::json;
use tracing::error;

/// 任务执行错误
#[derive(Debug, thiserror::Error)]
pub enum JobError {
    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Infra(#[from] CreditError),

    #[error("租户不存在: {0}")]
    TenantNotFound(String),

    #[error("无效的 cron 表达式 {expression}: {message}")]
    InvalidCron { expression: String, message: String },

    #[error("无效的触发参数: {0}")]
    InvalidTrigger(String),

    #[error("操作超时: {0}")]
    Timeout(String),
}

impl JobError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Ledger(e) => e.code(),
            Self::Infra(e) => e.code(),
            Self::TenantNotFound(_) => "TENANT_NOT_FOUND",
            Self::InvalidCron { .. } => "INVALID_CRON",
            Self::InvalidTrigger(_) => "INVALID_TRIGGER",
            Self::Timeout(_) => "TIMEOUT",
        }
    }

    /// 是否值得在条目级别内联重试
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Ledger(e) => e.is_retryable(),
            Self::Infra(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            Self::TenantNotFound(_) | Self::InvalidCron { .. } | Self::InvalidTrigger(_) => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, JobError>;

/// 运维 API 错误
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("资源不存在: {0}")]
    NotFound(String),

    #[error(transparent)]
    Job(#[from] JobError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),
}

impl ApiError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::Validation(_) => StatusCode::BAD_REQUEST,
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::Job(JobError::TenantNotFound(_)) => StatusCode::NOT_FOUND,
            Self::Job(JobError::InvalidTrigger(_)) => StatusCode::BAD_REQUEST,
            Self::Job(JobError::Ledger(e)) | Self::Ledger(e) => ledger_status(e),
            Self::Job(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn error_code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::NotFound(_) => "NOT_FOUND",
            Self::Job(e) => e.code(),
            Self::Ledger(e) => e.code(),
        }
    }
}

fn ledger_status(e: &LedgerError) -> StatusCode {
    match e {
        LedgerError::UnknownTenant(_)
        | LedgerError::UnknownMember { .. }
        | LedgerError::TenantMismatch { .. }
        | LedgerError::JobRunNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::InvalidPeriod(_) | LedgerError::InvalidTimezone(_) => StatusCode::BAD_REQUEST,
        LedgerError::InvalidProgram { .. } => StatusCode::UNPROCESSABLE_ENTITY,
        _ => StatusCode::INTERNAL_SERVER_ERROR,
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();

        // 内部错误只记录日志，不向调用方暴露细节
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            error!(error = %self, code = self.error_code(), "运维 API 内部错误");
            "服务内部错误".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "success": false,
            "code": self.error_code(),
            "message": message,
            "data": null
        }));

        (status, body).into_response()
    }
}

impl From<validator::ValidationErrors> for ApiError {
    fn from(errors: validator::ValidationErrors) -> Self {
        Self::Validation(errors.to_string())
    }
}
