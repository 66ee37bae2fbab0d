//! 账本服务错误类型
//!
//! 区分三类错误：瞬时故障（可重试）、领域错误（不可重试，直接上报）、
//! 以及重复投递（不是错误，由幂等键吸收，不会出现在这里）。

use credit_shared::error::{CreditError, is_transient_sqlx_error};
use thiserror::Error;

use crate::models::EntryKind;

/// 账本服务错误类型
#[derive(Debug, Error)]
pub enum LedgerError {
    // === 引用解析错误 ===
    #[error("租户不存在: {0}")]
    UnknownTenant(String),

    #[error("会员不存在: tenant_id={tenant_id}, member_id={member_id}")]
    UnknownMember { tenant_id: String, member_id: String },

    #[error("顾客未注册为会员: tenant_id={tenant_id}, customer_ref={customer_ref}")]
    UnknownCustomer {
        tenant_id: String,
        customer_ref: String,
    },

    #[error("会员不属于该租户: member_id={member_id}, 请求租户={requested}, 实际租户={actual}")]
    TenantMismatch {
        member_id: String,
        requested: String,
        actual: String,
    },

    // === 记账规则错误 ===
    #[error("余额不足: member_id={member_id}, 当前余额={balance}, 请求扣减={requested}")]
    InsufficientBalance {
        member_id: String,
        balance: i64,
        requested: i64,
    },

    #[error("无效的记账金额: kind={kind}, amount={amount}")]
    InvalidAmount { kind: EntryKind, amount: i64 },

    #[error("过期来源记录均已核销: member_id={member_id}")]
    AlreadySettled { member_id: String },

    #[error("无效的账期: {0}")]
    InvalidPeriod(String),

    #[error("无效的时区: {0}")]
    InvalidTimezone(String),

    #[error("租户积分计划配置无效: tenant_id={tenant_id}, {message}")]
    InvalidProgram { tenant_id: String, message: String },

    #[error("任务运行记录不存在: {0}")]
    JobRunNotFound(i64),

    #[error("任务运行租约已失效: run_id={run_id}, attempt={attempt}")]
    LeaseLost { run_id: i64, attempt: i32 },

    // === 系统错误 ===
    #[error("数据库错误: {0}")]
    Database(#[from] sqlx::Error),

    #[error("JSON 序列化错误: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Infra(#[from] CreditError),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl LedgerError {
    /// 错误码
    pub fn code(&self) -> &'static str {
        match self {
            Self::UnknownTenant(_) => "UNKNOWN_TENANT",
            Self::UnknownMember { .. } => "UNKNOWN_MEMBER",
            Self::UnknownCustomer { .. } => "UNKNOWN_CUSTOMER",
            Self::TenantMismatch { .. } => "TENANT_MISMATCH",
            Self::InsufficientBalance { .. } => "INSUFFICIENT_BALANCE",
            Self::InvalidAmount { .. } => "INVALID_AMOUNT",
            Self::AlreadySettled { .. } => "ALREADY_SETTLED",
            Self::InvalidPeriod(_) => "INVALID_PERIOD",
            Self::InvalidTimezone(_) => "INVALID_TIMEZONE",
            Self::InvalidProgram { .. } => "INVALID_PROGRAM",
            Self::JobRunNotFound(_) => "JOB_RUN_NOT_FOUND",
            Self::LeaseLost { .. } => "LEASE_LOST",
            Self::Database(_) => "DATABASE_ERROR",
            Self::Serialization(_) => "SERIALIZATION_ERROR",
            Self::Infra(e) => e.code(),
            Self::Timeout(_) => "TIMEOUT",
            Self::Internal(_) => "INTERNAL_ERROR",
        }
    }

    /// 是否可重试
    ///
    /// 只有存储/网络层的瞬时故障可以重试；领域错误重试结果不会改变。
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Database(e) => is_transient_sqlx_error(e),
            Self::Infra(e) => e.is_retryable(),
            Self::Timeout(_) => true,
            _ => false,
        }
    }
}

/// 服务层 Result 类型别名
pub type Result<T> = std::result::Result<T, LedgerError>;
