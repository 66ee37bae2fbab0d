//! 电商事件边界
//!
//! 入站信封只带原始 JSON 负载，在这里按 topic 解码为强类型事件并校验。
//! 解码或校验失败都是永久失败，不会被重试。

use chrono::{DateTime, Utc};
use credit_ledger::posting::MAX_AMOUNT_CENTS;
use credit_shared::events::WebhookEnvelope;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::error::{Result, WebhookError};

/// 平台 webhook topic
pub mod webhook_topics {
    pub const ORDER_CREATED: &str = "orders/create";
    pub const MEMBERSHIP_PURCHASED: &str = "memberships/purchase";
    pub const CUSTOMER_CREATED: &str = "customers/create";
    pub const CUSTOMER_UPDATED: &str = "customers/update";
    pub const TRADE_IN_SUBMITTED: &str = "trade_ins/create";
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrderCreated {
    pub customer_ref: String,
    pub order_id: String,
    pub total_cents: i64,
    #[serde(default)]
    pub currency: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MembershipPurchased {
    pub customer_ref: String,
    pub tier_id: String,
    #[serde(default)]
    pub order_id: Option<String>,
    #[serde(default)]
    pub price_cents: i64,
}

/// 顾客创建 / 更新共用的资料
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomerProfile {
    pub customer_ref: String,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub tier_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeInSubmitted {
    pub customer_ref: String,
    pub trade_in_id: String,
    pub value_cents: i64,
}

/// 强类型电商事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum CommerceEvent {
    OrderCreated(OrderCreated),
    MembershipPurchased(MembershipPurchased),
    CustomerCreated(CustomerProfile),
    CustomerUpdated(CustomerProfile),
    TradeInSubmitted(TradeInSubmitted),
}

impl CommerceEvent {
    /// 事件类型名，用于幂等键与指标标签
    pub fn kind(&self) -> &'static str {
        match self {
            Self::OrderCreated(_) => "order_created",
            Self::MembershipPurchased(_) => "membership_purchased",
            Self::CustomerCreated(_) => "customer_created",
            Self::CustomerUpdated(_) => "customer_updated",
            Self::TradeInSubmitted(_) => "trade_in_submitted",
        }
    }

    pub fn customer_ref(&self) -> &str {
        match self {
            Self::OrderCreated(e) => &e.customer_ref,
            Self::MembershipPurchased(e) => &e.customer_ref,
            Self::CustomerCreated(e) | Self::CustomerUpdated(e) => &e.customer_ref,
            Self::TradeInSubmitted(e) => &e.customer_ref,
        }
    }

    /// 按 topic 解码负载
    pub fn decode(topic: &str, payload: &serde_json::Value) -> Result<Self> {
        use webhook_topics::*;

        let event = match topic {
            ORDER_CREATED => Self::OrderCreated(parse(topic, payload)?),
            MEMBERSHIP_PURCHASED => Self::MembershipPurchased(parse(topic, payload)?),
            CUSTOMER_CREATED => Self::CustomerCreated(parse(topic, payload)?),
            CUSTOMER_UPDATED => Self::CustomerUpdated(parse(topic, payload)?),
            TRADE_IN_SUBMITTED => Self::TradeInSubmitted(parse(topic, payload)?),
            other => return Err(WebhookError::UnsupportedTopic(other.to_string())),
        };
        event.validate()?;
        Ok(event)
    }

    /// 引用非空，金额在 `[0, MAX_AMOUNT_CENTS]` 内
    pub fn validate(&self) -> Result<()> {
        require_non_empty("customerRef", self.customer_ref())?;
        match self {
            Self::OrderCreated(e) => {
                require_non_empty("orderId", &e.order_id)?;
                require_amount("totalCents", e.total_cents)
            }
            Self::MembershipPurchased(e) => {
                require_non_empty("tierId", &e.tier_id)?;
                require_amount("priceCents", e.price_cents)
            }
            Self::CustomerCreated(_) | Self::CustomerUpdated(_) => Ok(()),
            Self::TradeInSubmitted(e) => {
                require_non_empty("tradeInId", &e.trade_in_id)?;
                require_amount("valueCents", e.value_cents)
            }
        }
    }
}

/// 解码后的 webhook 事件
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WebhookEvent {
    /// 平台事件 ID，重复投递时不变
    pub source_event_id: String,
    pub tenant_id: String,
    pub occurred_at: DateTime<Utc>,
    pub event: CommerceEvent,
}

impl WebhookEvent {
    pub fn decode(envelope: &WebhookEnvelope) -> Result<Self> {
        require_non_empty("eventId", &envelope.event_id)?;
        require_non_empty("tenantId", &envelope.tenant_id)?;
        Ok(Self {
            source_event_id: envelope.event_id.clone(),
            tenant_id: envelope.tenant_id.clone(),
            occurred_at: envelope.occurred_at,
            event: CommerceEvent::decode(&envelope.topic, &envelope.payload)?,
        })
    }

    /// `tenant:eventKind:sourceEventId`
    pub fn idempotency_key(&self) -> String {
        format!(
            "{}:{}:{}",
            self.tenant_id,
            self.event.kind(),
            self.source_event_id
        )
    }
}

fn parse<T: DeserializeOwned>(topic: &str, payload: &serde_json::Value) -> Result<T> {
    T::deserialize(payload).map_err(|e| WebhookError::Malformed(format!("{topic}: {e}")))
}

fn require_non_empty(field: &str, value: &str) -> Result<()> {
    if value.trim().is_empty() {
        return Err(WebhookError::Malformed(format!("{field} 不能为空")));
    }
    Ok(())
}

fn require_amount(field: &str, value: i64) -> Result<()> {
    if value < 0 {
        return Err(WebhookError::Malformed(format!("{field} 不能为负: {value}")));
    }
    if value > MAX_AMOUNT_CENTS {
        return Err(WebhookError::Malformed(format!(
            "{field} 超出上限 {MAX_AMOUNT_CENTS}: {value}"
        )));
    }
    Ok(())
}
