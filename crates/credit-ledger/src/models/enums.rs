//! 账本领域枚举类型
//!
//! 所有枚举都支持数据库（sqlx）和 JSON（serde）序列化，
//! 数据库中统一以小写蛇形字符串存储。

use std::fmt;

use serde::{Deserialize, Serialize};

/// 账本记录类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum EntryKind {
    /// 以旧换新入账
    TradeIn,
    /// 消费返现
    PurchaseCashback,
    /// 促销/注册/会员赠送
    PromotionBonus,
    /// 月度额度发放
    MonthlyCredit,
    /// 额度过期扣减
    Expiration,
    /// 人工调整，可正可负
    ManualAdjustment,
}

impl EntryKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::TradeIn => "trade_in",
            Self::PurchaseCashback => "purchase_cashback",
            Self::PromotionBonus => "promotion_bonus",
            Self::MonthlyCredit => "monthly_credit",
            Self::Expiration => "expiration",
            Self::ManualAdjustment => "manual_adjustment",
        }
    }

    /// 是否为发放额度的类型（金额必须为正，并可携带过期时间）
    pub fn is_credit(&self) -> bool {
        matches!(
            self,
            Self::TradeIn | Self::PurchaseCashback | Self::PromotionBonus | Self::MonthlyCredit
        )
    }
}

impl fmt::Display for EntryKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 会员状态
///
/// 状态变更由外部系统驱动，本系统只读取
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum MemberStatus {
    #[default]
    Active,
    Paused,
    Cancelled,
}

/// 批处理任务类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "snake_case")]
pub enum JobKind {
    /// 月度额度发放，账期为 `YYYY-MM`
    MonthlyCredit,
    /// 过期扫描，账期为 ISO 日期
    Expiration,
    /// 过期预警扫描，账期为 ISO 日期
    ExpirationWarning,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MonthlyCredit => "monthly_credit",
            Self::Expiration => "expiration",
            Self::ExpirationWarning => "expiration_warning",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 任务运行状态
///
/// ```text
/// running ──> completed
///    │  └───> failed ──(下次触发)──> running
///    └──────> cancelled ──(显式恢复)──> running
/// ```
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, sqlx::Type)]
#[serde(rename_all = "snake_case")]
#[sqlx(type_name = "varchar", rename_all = "lowercase")]
pub enum JobRunStatus {
    #[default]
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl JobRunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Cancelled)
    }
}

impl fmt::Display for JobRunStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 余额不足时的处理策略
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverdraftPolicy {
    /// 拒绝并返回 `InsufficientBalance`
    #[default]
    Reject,
    /// 将扣减金额截断到当前余额（仅过期扣减使用）
    ClampToBalance,
}
