//! 记账规则
//!
//! 纯函数，Postgres 与内存实现共用，确保两者对金额符号、透支与过期时间的处理一致。

use chrono::{DateTime, Utc};
use credit_shared::error::CreditError;

use crate::error::{LedgerError, Result};
use crate::models::{EntryKind, OverdraftPolicy, PostRequest};

/// 单笔入账或调整的金额上限（绝对值）
pub const MAX_AMOUNT_CENTS: i64 = 1_000_000_000;

/// 记账计划：事务内锁定会员后计算出的最终写入值
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PostingPlan {
    pub amount_cents: i64,
    pub balance_after_cents: i64,
    pub expires_at: Option<DateTime<Utc>>,
}

/// 请求结构校验（不依赖余额）
pub fn validate_request(req: &PostRequest) -> Result<()> {
    if req.tenant_id.trim().is_empty() {
        return Err(invalid("tenant_id", "不能为空"));
    }
    if req.member_id.trim().is_empty() {
        return Err(invalid("member_id", "不能为空"));
    }
    if req.idempotency_key.trim().is_empty() {
        return Err(invalid("idempotency_key", "不能为空"));
    }
    if !req.settles.is_empty() && req.kind != EntryKind::Expiration {
        return Err(invalid("settles", "只有过期扣减可以核销来源记录"));
    }
    if req.overdraft == OverdraftPolicy::ClampToBalance && req.kind != EntryKind::Expiration {
        return Err(invalid("overdraft", "只有过期扣减允许截断到余额"));
    }
    check_sign(req.kind, req.amount_cents)?;
    // 过期扣减金额由来源记录汇总得出，不受单笔上限约束
    if req.kind != EntryKind::Expiration
        && req.amount_cents.unsigned_abs() > MAX_AMOUNT_CENTS.unsigned_abs()
    {
        return Err(LedgerError::InvalidAmount {
            kind: req.kind,
            amount: req.amount_cents,
        });
    }
    Ok(())
}

fn invalid(field: &str, message: &str) -> LedgerError {
    LedgerError::Infra(CreditError::InvalidArgument {
        field: field.to_string(),
        message: message.to_string(),
    })
}

fn check_sign(kind: EntryKind, amount_cents: i64) -> Result<()> {
    let ok = match kind {
        k if k.is_credit() => amount_cents > 0,
        EntryKind::Expiration => amount_cents < 0,
        _ => amount_cents != 0,
    };
    if ok {
        Ok(())
    } else {
        Err(LedgerError::InvalidAmount {
            kind,
            amount: amount_cents,
        })
    }
}

/// 根据当前余额计算记账计划
///
/// `amount_cents` 是最终要写入的金额（过期扣减时由存储层按未核销来源重新计算）。
pub fn plan_posting(
    balance_cents: i64,
    req: &PostRequest,
    amount_cents: i64,
) -> Result<PostingPlan> {
    check_sign(req.kind, amount_cents)?;

    let mut amount = amount_cents;
    let overflow = || LedgerError::InvalidAmount {
        kind: req.kind,
        amount: amount_cents,
    };
    if amount < 0 && balance_cents.checked_add(amount).ok_or_else(overflow)? < 0 {
        match req.overdraft {
            OverdraftPolicy::Reject => {
                return Err(LedgerError::InsufficientBalance {
                    member_id: req.member_id.clone(),
                    balance: balance_cents,
                    requested: -amount,
                });
            }
            // 截断到零时仍写入一条 0 金额记录，使来源记录被核销
            OverdraftPolicy::ClampToBalance => amount = -balance_cents.max(0),
        }
    }

    let expires_at = if req.kind.is_credit() {
        req.expires_at
    } else {
        None
    };

    Ok(PostingPlan {
        amount_cents: amount,
        balance_after_cents: balance_cents.checked_add(amount).ok_or_else(overflow)?,
        expires_at,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn credit(amount: i64) -> PostRequest {
        PostRequest::credit("t-1", "m-1", amount, EntryKind::MonthlyCredit, "k-1", None)
    }

    #[test]
    fn test_credit_must_be_positive() {
        assert!(validate_request(&credit(500)).is_ok());
        assert!(matches!(
            validate_request(&credit(0)),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(matches!(
            validate_request(&credit(-1)),
            Err(LedgerError::InvalidAmount { .. })
        ));
    }

    #[test]
    fn test_empty_key_rejected() {
        let mut req = credit(500);
        req.idempotency_key = " ".into();
        let err = validate_request(&req).unwrap_err();
        assert_eq!(err.code(), "INVALID_ARGUMENT");
    }

    #[test]
    fn test_settles_only_for_expiration() {
        let mut req = credit(500);
        req.settles = vec![1];
        assert!(validate_request(&req).is_err());

        let exp = PostRequest::expiration("t-1", "m-1", 500, "k-2", vec![1]);
        assert!(validate_request(&exp).is_ok());
    }

    #[test]
    fn test_plan_credit() {
        let plan = plan_posting(1_000, &credit(500), 500).unwrap();
        assert_eq!(plan.balance_after_cents, 1_500);
    }

    #[test]
    fn test_debit_rejected_when_overdrawn() {
        let mut req = credit(0);
        req.kind = EntryKind::ManualAdjustment;
        let err = plan_posting(300, &req, -500).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientBalance {
                balance: 300,
                requested: 500,
                ..
            }
        ));
    }

    #[test]
    fn test_expiration_clamped_to_balance() {
        let req = PostRequest::expiration("t-1", "m-1", 2_000, "k", vec![1]);
        let plan = plan_posting(1_200, &req, -2_000).unwrap();
        assert_eq!(plan.amount_cents, -1_200);
        assert_eq!(plan.balance_after_cents, 0);

        let plan = plan_posting(0, &req, -2_000).unwrap();
        assert_eq!(plan.amount_cents, 0);
        assert_eq!(plan.balance_after_cents, 0);
    }

    #[test]
    fn test_amount_above_limit_rejected() {
        let mut req = credit(MAX_AMOUNT_CENTS + 1);
        req.kind = EntryKind::TradeIn;
        assert!(matches!(
            validate_request(&req),
            Err(LedgerError::InvalidAmount { .. })
        ));
        assert!(validate_request(&credit(MAX_AMOUNT_CENTS)).is_ok());
    }

    #[test]
    fn test_balance_overflow_is_invalid_amount() {
        let err = plan_posting(i64::MAX - 10, &credit(500), 500).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount { amount: 500, .. }));
        assert!(!err.is_retryable());

        let mut req = credit(0);
        req.kind = EntryKind::ManualAdjustment;
        assert!(plan_posting(i64::MIN + 10, &req, -500).is_err());
    }

    #[test]
    fn test_debit_drops_expiry() {
        let mut req = PostRequest::expiration("t-1", "m-1", 100, "k", vec![]);
        req.expires_at = Some(Utc::now());
        let plan = plan_posting(1_000, &req, -100).unwrap();
        assert!(plan.expires_at.is_none());
    }
}
