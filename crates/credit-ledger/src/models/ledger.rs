//! 账本流水与记账请求
//!
//! 账本只追加不修改：更正通过新的冲销记录完成。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{EntryKind, OverdraftPolicy};

/// 账本流水（写入后不可变）
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct LedgerEntry {
    pub id: i64,
    pub tenant_id: String,
    pub member_id: String,
    /// 正数为入账，负数为扣减
    pub amount_cents: i64,
    pub kind: EntryKind,
    pub created_at: DateTime<Utc>,
    /// 仅入账记录携带
    #[sqlx(default)]
    pub expires_at: Option<DateTime<Utc>>,
    /// 写入时的余额快照
    pub balance_after_cents: i64,
    pub idempotency_key: String,
    #[sqlx(default)]
    pub memo: Option<String>,
}

/// 记账请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PostRequest {
    pub tenant_id: String,
    pub member_id: String,
    pub amount_cents: i64,
    pub kind: EntryKind,
    pub idempotency_key: String,
    pub expires_at: Option<DateTime<Utc>>,
    /// 本次过期扣减要核销的来源入账记录 ID（按 FIFO 排序）
    ///
    /// 非空时实际扣减金额由存储层在事务内根据仍未核销的来源重新计算，
    /// `amount_cents` 仅作为调用方的预估值。
    #[serde(default)]
    pub settles: Vec<i64>,
    #[serde(default)]
    pub overdraft: OverdraftPolicy,
    pub memo: Option<String>,
}

impl PostRequest {
    /// 发放额度请求
    pub fn credit(
        tenant_id: impl Into<String>,
        member_id: impl Into<String>,
        amount_cents: i64,
        kind: EntryKind,
        idempotency_key: impl Into<String>,
        expires_at: Option<DateTime<Utc>>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            member_id: member_id.into(),
            amount_cents,
            kind,
            idempotency_key: idempotency_key.into(),
            expires_at,
            settles: Vec::new(),
            overdraft: OverdraftPolicy::Reject,
            memo: None,
        }
    }

    /// 过期扣减请求，核销给定的来源记录并截断到余额
    pub fn expiration(
        tenant_id: impl Into<String>,
        member_id: impl Into<String>,
        expiring_cents: i64,
        idempotency_key: impl Into<String>,
        settles: Vec<i64>,
    ) -> Self {
        Self {
            tenant_id: tenant_id.into(),
            member_id: member_id.into(),
            amount_cents: -expiring_cents.abs(),
            kind: EntryKind::Expiration,
            idempotency_key: idempotency_key.into(),
            expires_at: None,
            settles,
            overdraft: OverdraftPolicy::ClampToBalance,
            memo: None,
        }
    }

    pub fn with_memo(mut self, memo: impl Into<String>) -> Self {
        self.memo = Some(memo.into());
        self
    }
}

/// 记账结果
///
/// 重复投递不是错误：相同幂等键返回已存在的记录。
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "entry", rename_all = "snake_case")]
pub enum PostOutcome {
    Posted(LedgerEntry),
    Duplicate(LedgerEntry),
}

impl PostOutcome {
    pub fn entry(&self) -> &LedgerEntry {
        match self {
            Self::Posted(e) | Self::Duplicate(e) => e,
        }
    }

    pub fn into_entry(self) -> LedgerEntry {
        match self {
            Self::Posted(e) | Self::Duplicate(e) => e,
        }
    }

    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posted(_) => "posted",
            Self::Duplicate(_) => "duplicate",
        }
    }
}

/// 即将或已经到期、尚未被核销的入账记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExpiringEntry {
    pub entry_id: i64,
    pub tenant_id: String,
    pub member_id: String,
    pub amount_cents: i64,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// 到期记录查询
///
/// 返回 `after_member` 之后最多 `member_limit` 个会员的全部命中记录，
/// 按 (member_id, expires_at, created_at, entry_id) 排序，同一会员的记录不会被分页拆开。
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExpiringQuery {
    pub tenant_id: String,
    /// 包含下界
    pub expires_from: Option<DateTime<Utc>>,
    /// 不包含上界
    pub expires_before: DateTime<Utc>,
    pub after_member: Option<String>,
    pub member_limit: i64,
    /// 排除已发过预警的记录
    pub exclude_warned: bool,
}

/// 过期扣减与来源记录的核销关系
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct ExpirationOffset {
    pub expiration_entry_id: i64,
    pub source_entry_id: i64,
    /// 实际扣减的金额，截断时可能小于来源金额甚至为 0
    pub expired_cents: i64,
}

/// 批处理任务的去重键：`tenant:jobKind:period:memberId`
pub fn batch_idempotency_key(
    tenant_id: &str,
    job_kind: &str,
    period_key: &str,
    member_id: &str,
) -> String {
    format!("{tenant_id}:{job_kind}:{period_key}:{member_id}")
}

/// 事件驱动的去重键：`tenant:eventKind:sourceEventId`
pub fn event_idempotency_key(tenant_id: &str, event_kind: &str, source_event_id: &str) -> String {
    format!("{tenant_id}:{event_kind}:{source_event_id}")
}

/// 按到期先后把截断后的总额分摊到来源记录上
///
/// `sources` 需已按 FIFO 排好序，元素为 (entry_id, amount_cents)。
/// 额度用尽后的来源记 0。
pub fn attribute_fifo(sources: &[(i64, i64)], total_cents: i64) -> Vec<(i64, i64)> {
    let mut remaining = total_cents.max(0);
    sources
        .iter()
        .map(|&(id, amount)| {
            let take = amount.min(remaining).max(0);
            remaining -= take;
            (id, take)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_idempotency_keys() {
        assert_eq!(
            batch_idempotency_key("t-1", "monthly_credit", "2025-03", "m-9"),
            "t-1:monthly_credit:2025-03:m-9"
        );
        assert_eq!(
            event_idempotency_key("t-1", "order_created", "evt-1"),
            "t-1:order_created:evt-1"
        );
    }

    #[test]
    fn test_attribute_fifo_uncapped() {
        let parts = attribute_fifo(&[(1, 1_000), (2, 1_500)], 2_500);
        assert_eq!(parts, vec![(1, 1_000), (2, 1_500)]);
    }

    #[test]
    fn test_attribute_fifo_capped_takes_oldest_first() {
        let parts = attribute_fifo(&[(1, 1_000), (2, 1_500), (3, 700)], 1_200);
        assert_eq!(parts, vec![(1, 1_000), (2, 200), (3, 0)]);
    }

    #[test]
    fn test_attribute_fifo_zero_cap() {
        let parts = attribute_fifo(&[(1, 1_000)], 0);
        assert_eq!(parts, vec![(1, 0)]);
    }

    #[test]
    fn test_expiration_request_is_negative_and_clamped() {
        let req = PostRequest::expiration("t", "m", 2_000, "k", vec![7]);
        assert_eq!(req.amount_cents, -2_000);
        assert_eq!(req.overdraft, OverdraftPolicy::ClampToBalance);
        assert!(req.expires_at.is_none());
    }
}
