//! 会员实体

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::MemberStatus;

/// 会员
///
/// `balance_cents` 是账本的缓存汇总，只能由记账路径在同一事务内更新。
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct Member {
    pub id: String,
    pub tenant_id: String,
    /// 电商平台的顾客引用
    pub customer_ref: String,
    #[sqlx(default)]
    pub email: Option<String>,
    #[sqlx(default)]
    pub tier_id: Option<String>,
    pub status: MemberStatus,
    pub balance_cents: i64,
    /// 每次记账递增
    pub version: i64,
    #[sqlx(default)]
    pub last_activity_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Member {
    pub fn is_active(&self) -> bool {
        self.status == MemberStatus::Active
    }
}

/// 按顾客引用注册会员的请求
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMember {
    pub tenant_id: String,
    pub customer_ref: String,
    pub email: Option<String>,
    pub tier_id: Option<String>,
}

/// 会员资料更新，None 字段保持原值
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemberProfileUpdate {
    pub email: Option<String>,
    pub tier_id: Option<String>,
}

impl MemberProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.email.is_none() && self.tier_id.is_none()
    }
}
