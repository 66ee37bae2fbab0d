//! webhook 事件处理错误类型
//!
//! 负载格式错误与不支持的 topic 是永久失败，重投不会改变结果；
//! 账本与基础设施的瞬时故障可以用同一幂等键安全重试。

use credit_ledger::LedgerError;
use credit_shared::error::CreditError;

#[derive(Debug, thiserror::Error)]
pub enum WebhookError {
    #[error("负载格式错误: {0}")]
    Malformed(String),

    #[error("不支持的 topic: {0}")]
    UnsupportedTopic(String),

    #[error("租户不存在: {0}")]
    UnknownTenant(String),

    #[error("顾客未注册为会员: tenant_id={tenant_id}, customer_ref={customer_ref}")]
    UnknownMember {
        tenant_id: String,
        customer_ref: String,
    },

    #[error("等级不存在: tenant_id={tenant_id}, tier_id={tier_id}")]
    UnknownTier { tenant_id: String, tier_id: String },

    #[error("处理超时: {0}")]
    Timeout(String),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Infra(#[from] CreditError),
}

impl WebhookError {
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "MALFORMED_PAYLOAD",
            Self::UnsupportedTopic(_) => "UNSUPPORTED_TOPIC",
            Self::UnknownTenant(_) => "UNKNOWN_TENANT",
            Self::UnknownMember { .. } => "UNKNOWN_MEMBER",
            Self::UnknownTier { .. } => "UNKNOWN_TIER",
            Self::Timeout(_) => "TIMEOUT",
            Self::Ledger(e) => e.code(),
            Self::Infra(e) => e.code(),
        }
    }

    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Timeout(_) => true,
            Self::Ledger(e) => e.is_retryable(),
            Self::Infra(e) => e.is_retryable(),
            _ => false,
        }
    }
}

pub type Result<T> = std::result::Result<T, WebhookError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_errors_are_permanent() {
        assert!(!WebhookError::Malformed("totalCents 为负".into()).is_retryable());
        assert!(!WebhookError::UnsupportedTopic("carts/update".into()).is_retryable());
        assert!(
            !WebhookError::UnknownMember {
                tenant_id: "t-1".into(),
                customer_ref: "c-1".into(),
            }
            .is_retryable()
        );
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        assert!(WebhookError::Timeout("orders/create".into()).is_retryable());
        assert!(WebhookError::Ledger(LedgerError::Timeout("post".into())).is_retryable());
        assert!(WebhookError::Infra(CreditError::timeout("post")).is_retryable());
        assert!(
            !WebhookError::Ledger(LedgerError::UnknownTenant("t-9".into())).is_retryable()
        );
    }

    #[test]
    fn test_error_codes() {
        assert_eq!(WebhookError::Malformed("x".into()).code(), "MALFORMED_PAYLOAD");
        assert_eq!(
            WebhookError::Ledger(LedgerError::UnknownTenant("t".into())).code(),
            "UNKNOWN_TENANT"
        );
    }
}
