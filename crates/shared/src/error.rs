//! 统一错误处理模块
//!
//! 定义各服务共享的基础设施错误类型。领域错误（余额不足、会员不存在等）
//! 由各业务 crate 自行定义，并通过 `#[from]` 包装此类型。

use thiserror::Error;

/// 基础设施错误类型
#[derive(Debug, Error)]
pub enum CreditError {
    // ==================== 数据库错误 ====================
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("数据库迁移失败: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),

    #[error("记录未找到: {entity} id={id}")]
    NotFound { entity: String, id: String },

    // ==================== 消息队列错误 ====================
    #[error("Kafka 错误: {0}")]
    Kafka(String),

    #[error("序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    // ==================== 验证错误 ====================
    #[error("参数验证失败: {0}")]
    Validation(String),

    #[error("无效的参数: {field} - {message}")]
    InvalidArgument { field: String, message: String },

    // ==================== 外部服务错误 ====================
    #[error("外部服务错误: {service} - {message}")]
    ExternalService { service: String, message: String },

    #[error("操作超时: {operation}")]
    Timeout { operation: String },

    // ==================== 系统错误 ====================
    #[error("配置错误: {0}")]
    Config(#[from] config::ConfigError),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl CreditError {
    /// 返回错误码，用于日志聚合与 API 响应
    pub fn code(&self) -> &'static str {
        match self {
            Self::Database(_) => "DATABASE_ERROR",
            Self::Migration(_) => "MIGRATION_ERROR",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Kafka(_) => "KAFKA_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Validation(_) => "VALIDATION_ERROR",
            Self::InvalidArgument { .. } => "INVALID_ARGUMENT",
            Self::ExternalService { .. } => "EXTERNAL_SERVICE_ERROR",
            Self::Timeout { .. } => "TIMEOUT",
            Self::Config(_) => "CONFIG_ERROR",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否为瞬时故障
    ///
    /// 连接池耗尽、网络抖动、超时可以重试；约束冲突和数据错误重试也不会成功。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_sqlx_error(e),
            Self::Kafka(_) | Self::ExternalService { .. } | Self::Timeout { .. } => true,
            _ => false,
        }
    }

    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }
}

/// 判断 sqlx 错误是否为瞬时故障
///
/// 序列化失败（40001）和死锁（40P01）在 Postgres 中需要调用方重试整个事务。
pub fn is_transient_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        sqlx::Error::Database(db) => matches!(db.code().as_deref(), Some("40001" | "40P01")),
        _ => false,
    }
}

/// 判断 sqlx 错误是否为唯一约束冲突（23505）
pub fn is_unique_violation(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Database(db) => db.code().as_deref() == Some("23505"),
        _ => false,
    }
}

pub type Result<T> = std::result::Result<T, CreditError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_codes() {
        assert_eq!(CreditError::not_found("member", "m-1").code(), "NOT_FOUND");
        assert_eq!(CreditError::timeout("post").code(), "TIMEOUT");
        assert_eq!(CreditError::Kafka("x".into()).code(), "KAFKA_ERROR");
    }

    #[test]
    fn test_retryable_classification() {
        assert!(CreditError::timeout("ledger.post").is_retryable());
        assert!(CreditError::Kafka("broker down".into()).is_retryable());
        assert!(CreditError::Database(sqlx::Error::PoolTimedOut).is_retryable());
        assert!(!CreditError::Database(sqlx::Error::RowNotFound).is_retryable());
        assert!(!CreditError::Validation("bad".into()).is_retryable());
        assert!(!CreditError::not_found("tenant", "t-1").is_retryable());
    }

    #[test]
    fn test_error_display() {
        let err = CreditError::not_found("member", "m-42");
        assert_eq!(err.to_string(), "记录未找到: member id=m-42");
    }
}
