//! 租户与积分计划配置
//!
//! 计划规则存放在 `tenants.program` JSON 列中，每次任务或事件处理时重新加载，
//! 进程内不缓存租户状态。

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use serde::{Deserialize, Serialize};

use crate::error::{LedgerError, Result};

/// 单一基点换算：10_000 bps = 100%
pub const BPS_DENOMINATOR: i64 = 10_000;

/// 有效期与预警窗口允许的最大天数
pub const MAX_PROGRAM_DAYS: i64 = 3_650;

/// 按基点计算金额，向下取整
pub fn apply_bps(value_cents: i64, rate_bps: i64) -> i64 {
    value_cents.saturating_mul(rate_bps) / BPS_DENOMINATOR
}

/// 会员等级权益
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TierBenefit {
    pub tier_id: String,
    pub name: String,
    /// 月度额度基数（分）
    #[serde(default)]
    pub monthly_stipend_base_cents: i64,
    /// 月度额度比例（基点）
    #[serde(default)]
    pub monthly_stipend_rate_bps: i64,
    /// 消费返现比例（基点）
    #[serde(default)]
    pub cashback_rate_bps: i64,
    /// 以旧换新加成比例（基点）
    #[serde(default)]
    pub trade_in_bonus_rate_bps: i64,
    /// 购买该等级会员资格时的固定赠送额度（分）
    #[serde(default)]
    pub membership_bonus_cents: i64,
}

impl TierBenefit {
    /// 月度额度 = 基数 × 比例
    pub fn monthly_stipend_cents(&self) -> i64 {
        apply_bps(self.monthly_stipend_base_cents, self.monthly_stipend_rate_bps)
    }

    pub fn cashback_cents(&self, order_total_cents: i64) -> i64 {
        apply_bps(order_total_cents, self.cashback_rate_bps)
    }

    /// 以旧换新入账 = 估值 + 估值 × 加成比例
    pub fn trade_in_credit_cents(&self, value_cents: i64) -> i64 {
        value_cents.saturating_add(apply_bps(value_cents, self.trade_in_bonus_rate_bps))
    }
}

fn default_validity_days() -> i64 {
    90
}

fn default_warning_window_days() -> i64 {
    7
}

/// 租户积分计划
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgramConfig {
    #[serde(default)]
    pub tiers: Vec<TierBenefit>,
    /// 新会员注册赠送（分）
    #[serde(default)]
    pub signup_bonus_cents: i64,
    /// 额度有效期（天）
    #[serde(default = "default_validity_days")]
    pub credit_validity_days: i64,
    /// 过期预警窗口（天）
    #[serde(default = "default_warning_window_days")]
    pub warning_window_days: i64,
}

impl Default for ProgramConfig {
    fn default() -> Self {
        Self {
            tiers: Vec::new(),
            signup_bonus_cents: 0,
            credit_validity_days: default_validity_days(),
            warning_window_days: default_warning_window_days(),
        }
    }
}

impl ProgramConfig {
    pub fn tier(&self, tier_id: &str) -> Option<&TierBenefit> {
        self.tiers.iter().find(|t| t.tier_id == tier_id)
    }

    /// 成员所在等级的权益，未分配等级或等级已被移除时返回 None
    pub fn tier_for(&self, tier_id: Option<&str>) -> Option<&TierBenefit> {
        tier_id.and_then(|id| self.tier(id))
    }

    pub fn validity(&self) -> chrono::Duration {
        chrono::Duration::days(self.credit_validity_days)
    }

    /// 天数在 `[0, MAX_PROGRAM_DAYS]` 内，金额与比例非负
    pub fn validate(&self) -> std::result::Result<(), String> {
        let days = [
            ("creditValidityDays", self.credit_validity_days),
            ("warningWindowDays", self.warning_window_days),
        ];
        for (field, value) in days {
            if !(0..=MAX_PROGRAM_DAYS).contains(&value) {
                return Err(format!("{field} 超出范围 0..={MAX_PROGRAM_DAYS}: {value}"));
            }
        }
        if self.signup_bonus_cents < 0 {
            return Err(format!("signupBonusCents 不能为负: {}", self.signup_bonus_cents));
        }
        for tier in &self.tiers {
            let values = [
                tier.monthly_stipend_base_cents,
                tier.monthly_stipend_rate_bps,
                tier.cashback_rate_bps,
                tier.trade_in_bonus_rate_bps,
                tier.membership_bonus_cents,
            ];
            if values.iter().any(|v| *v < 0) {
                return Err(format!("等级 {} 的金额或比例不能为负", tier.tier_id));
            }
        }
        Ok(())
    }
}

/// 租户（一个商户店铺）
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Tenant {
    pub id: String,
    pub name: String,
    pub active: bool,
    /// IANA 时区名，决定"月"与"日"的边界
    pub timezone: String,
    #[sqlx(json)]
    pub program: ProgramConfig,
    pub created_at: DateTime<Utc>,
}

impl Tenant {
    pub fn tz(&self) -> Result<Tz> {
        self.timezone
            .parse::<Tz>()
            .map_err(|_| LedgerError::InvalidTimezone(self.timezone.clone()))
    }

    /// 加载后校验积分计划，避免越界天数进入日期运算
    pub fn validate_program(&self) -> Result<()> {
        self.program
            .validate()
            .map_err(|message| LedgerError::InvalidProgram {
                tenant_id: self.id.clone(),
                message,
            })
    }
}
