//! 消息契约定义
//!
//! 服务之间通过 Kafka 传递的两类消息：
//! - `WebhookEnvelope`：电商平台 webhook 的原始信封，入站时不解析业务负载，
//!   由事件服务在边界处解码为强类型事件
//! - `NotificationEvent`：账本写入成功后发给通知服务的"给会员 Y 发送 X"请求

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// WebhookEnvelope — 入站 webhook 信封
// ---------------------------------------------------------------------------

/// 电商平台 webhook 信封
///
/// `event_id` 是平台侧稳定的事件 ID，重复投递时保持不变，是幂等键的输入。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEnvelope {
    pub event_id: String,
    pub tenant_id: String,
    /// 平台 topic，如 `orders/create`、`customers/update`
    pub topic: String,
    pub occurred_at: DateTime<Utc>,
    pub payload: serde_json::Value,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub trace_id: Option<String>,
}

impl WebhookEnvelope {
    /// Kafka 分区键
    ///
    /// 同一租户同一顾客的事件必须进入同一分区，保证单会员事件按序处理；
    /// 负载中缺少顾客引用时退化为事件 ID。
    pub fn partition_key(&self) -> String {
        let customer = self
            .payload
            .get("customerRef")
            .and_then(|v| v.as_str())
            .unwrap_or(&self.event_id);
        format!("{}:{}", self.tenant_id, customer)
    }
}

// ---------------------------------------------------------------------------
// NotificationEvent — 通知请求
// ---------------------------------------------------------------------------

/// 通知请求
///
/// 由账本写入方在事务提交后发出，通知服务按模板渲染并投递。
/// 投递失败不影响已提交的账本记录。
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NotificationEvent {
    pub notification_id: String,
    pub tenant_id: String,
    pub member_id: String,
    pub template: NotificationTemplate,
    /// 模板变量，如金额、过期时间
    pub context: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl NotificationEvent {
    pub fn new(
        tenant_id: impl Into<String>,
        member_id: impl Into<String>,
        template: NotificationTemplate,
        context: serde_json::Value,
    ) -> Self {
        Self {
            notification_id: uuid::Uuid::now_v7().to_string(),
            tenant_id: tenant_id.into(),
            member_id: member_id.into(),
            template,
            context,
            created_at: Utc::now(),
        }
    }
}

/// 通知模板类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NotificationTemplate {
    CreditIssued,
    CashbackEarned,
    BonusEarned,
    TradeInCredited,
    CreditExpired,
    CreditExpiring,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CreditIssued => "CREDIT_ISSUED",
            Self::CashbackEarned => "CASHBACK_EARNED",
            Self::BonusEarned => "BONUS_EARNED",
            Self::TradeInCredited => "TRADE_IN_CREDITED",
            Self::CreditExpired => "CREDIT_EXPIRED",
            Self::CreditExpiring => "CREDIT_EXPIRING",
        }
    }
}

impl std::fmt::Display for NotificationTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// 单元测试
// ---------------------------------------------------------------------------
