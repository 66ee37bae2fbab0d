//! webhook 事件处理器
//!
//! 每种事件一个处理分支：
//! - **订单创建**：按会员等级返现比例入账，并刷新会员活跃时间
//! - **会员资格购买**：更新会员等级，按购买等级的固定额度赠送
//! - **顾客创建**：按顾客引用注册会员，发放注册赠送
//! - **顾客更新**：同步邮箱与等级，不记账
//! - **以旧换新**：估值加等级加成入账
//!
//! 记账统一使用 `tenant:eventKind:sourceEventId` 作为幂等键，平台的重复投递与
//! 进程内重试都只会得到 Duplicate。入账有效期从事件发生时间起算。

use std::sync::Arc;

use credit_ledger::{
    EntryKind, LedgerEntry, Member, MemberProfileUpdate, MemberRepositoryTrait, NewMember,
    NotificationSender, PostOutcome, PostRequest, PostingService, Tenant, TenantRepositoryTrait,
};
use credit_shared::events::NotificationTemplate;
use credit_shared::observability::metrics;
use serde_json::json;
use tracing::{debug, info, instrument, warn};

use crate::error::{Result, WebhookError};
use crate::event::{
    CommerceEvent, CustomerProfile, MembershipPurchased, OrderCreated, TradeInSubmitted,
    WebhookEvent,
};

/// 单个事件的处理结果
#[derive(Debug, Clone)]
pub enum HandleOutcome {
    Posted(LedgerEntry),
    /// 同一事件此前已入账
    Duplicate(LedgerEntry),
    Skipped(&'static str),
    /// 只更新了会员资料
    MemberUpserted(Member),
}

impl HandleOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Posted(_) => "posted",
            Self::Duplicate(_) => "duplicate",
            Self::Skipped(_) => "skipped",
            Self::MemberUpserted(_) => "member_upserted",
        }
    }
}

/// 一次入账的参数
struct Award<'a> {
    member_id: &'a str,
    amount_cents: i64,
    kind: EntryKind,
    template: NotificationTemplate,
    memo: String,
}

/// webhook 事件处理器
#[derive(Clone)]
pub struct EventProcessor {
    tenants: Arc<dyn TenantRepositoryTrait>,
    members: Arc<dyn MemberRepositoryTrait>,
    posting: PostingService,
    notifier: NotificationSender,
}

impl EventProcessor {
    pub fn new(
        tenants: Arc<dyn TenantRepositoryTrait>,
        members: Arc<dyn MemberRepositoryTrait>,
        posting: PostingService,
        notifier: NotificationSender,
    ) -> Self {
        Self {
            tenants,
            members,
            posting,
            notifier,
        }
    }

    /// 处理一个已解码的事件
    #[instrument(skip(self, event), fields(
        tenant_id = %event.tenant_id,
        event_id = %event.source_event_id,
        event_kind = event.event.kind(),
    ))]
    pub async fn handle(&self, event: &WebhookEvent) -> Result<HandleOutcome> {
        let result = self.dispatch(event).await;

        let outcome = match &result {
            Ok(outcome) => outcome.as_str(),
            Err(e) if e.is_retryable() => "retryable_error",
            Err(_) => "failed",
        };
        metrics::record_webhook_event(event.event.kind(), outcome);

        match &result {
            Ok(HandleOutcome::Skipped(reason)) => {
                info!(reason, "事件已跳过");
            }
            Ok(outcome) => debug!(outcome = outcome.as_str(), "事件处理完成"),
            Err(e) => warn!(error = %e, code = e.code(), "事件处理失败"),
        }
        result
    }

    async fn dispatch(&self, event: &WebhookEvent) -> Result<HandleOutcome> {
        let tenant = self
            .tenants
            .get(&event.tenant_id)
            .await?
            .ok_or_else(|| WebhookError::UnknownTenant(event.tenant_id.clone()))?;
        if !tenant.active {
            return Ok(HandleOutcome::Skipped("tenant_inactive"));
        }

        match &event.event {
            CommerceEvent::OrderCreated(order) => self.on_order_created(&tenant, event, order).await,
            CommerceEvent::MembershipPurchased(purchase) => {
                self.on_membership_purchased(&tenant, event, purchase).await
            }
            CommerceEvent::CustomerCreated(profile) => {
                self.on_customer_created(&tenant, event, profile).await
            }
            CommerceEvent::CustomerUpdated(profile) => {
                self.on_customer_updated(&tenant, profile).await
            }
            CommerceEvent::TradeInSubmitted(trade_in) => {
                self.on_trade_in(&tenant, event, trade_in).await
            }
        }
    }

    async fn on_order_created(
        &self,
        tenant: &Tenant,
        event: &WebhookEvent,
        order: &OrderCreated,
    ) -> Result<HandleOutcome> {
        let member = self.resolve_member(tenant, &order.customer_ref).await?;
        if !member.is_active() {
            return Ok(HandleOutcome::Skipped("member_inactive"));
        }
        self.members.touch_activity(&tenant.id, &member.id).await?;

        let cashback = tenant
            .program
            .tier_for(member.tier_id.as_deref())
            .map(|tier| tier.cashback_cents(order.total_cents))
            .unwrap_or(0);

        self.award(
            tenant,
            event,
            Award {
                member_id: &member.id,
                amount_cents: cashback,
                kind: EntryKind::PurchaseCashback,
                template: NotificationTemplate::CashbackEarned,
                memo: format!("订单 {} 返现", order.order_id),
            },
        )
        .await
    }

    async fn on_membership_purchased(
        &self,
        tenant: &Tenant,
        event: &WebhookEvent,
        purchase: &MembershipPurchased,
    ) -> Result<HandleOutcome> {
        let tier = tenant
            .program
            .tier(&purchase.tier_id)
            .ok_or_else(|| WebhookError::UnknownTier {
                tenant_id: tenant.id.clone(),
                tier_id: purchase.tier_id.clone(),
            })?;
        let member = self.resolve_member(tenant, &purchase.customer_ref).await?;
        if !member.is_active() {
            return Ok(HandleOutcome::Skipped("member_inactive"));
        }

        if member.tier_id.as_deref() != Some(tier.tier_id.as_str()) {
            let update = MemberProfileUpdate {
                email: None,
                tier_id: Some(tier.tier_id.clone()),
            };
            self.members
                .update_profile(&tenant.id, &member.id, &update)
                .await?;
            info!(member_id = %member.id, tier_id = %tier.tier_id, "会员等级已更新");
        }

        self.award(
            tenant,
            event,
            Award {
                member_id: &member.id,
                amount_cents: tier.membership_bonus_cents,
                kind: EntryKind::PromotionBonus,
                template: NotificationTemplate::BonusEarned,
                memo: format!("购买 {} 会员赠送", tier.name),
            },
        )
        .await
    }

    async fn on_customer_created(
        &self,
        tenant: &Tenant,
        event: &WebhookEvent,
        profile: &CustomerProfile,
    ) -> Result<HandleOutcome> {
        let member = self.upsert_member(tenant, profile).await?;
        if !member.is_active() || tenant.program.signup_bonus_cents <= 0 {
            return Ok(HandleOutcome::MemberUpserted(member));
        }

        self.award(
            tenant,
            event,
            Award {
                member_id: &member.id,
                amount_cents: tenant.program.signup_bonus_cents,
                kind: EntryKind::PromotionBonus,
                template: NotificationTemplate::BonusEarned,
                memo: "注册赠送".to_string(),
            },
        )
        .await
    }

    async fn on_customer_updated(
        &self,
        tenant: &Tenant,
        profile: &CustomerProfile,
    ) -> Result<HandleOutcome> {
        Ok(HandleOutcome::MemberUpserted(
            self.upsert_member(tenant, profile).await?,
        ))
    }

    async fn on_trade_in(
        &self,
        tenant: &Tenant,
        event: &WebhookEvent,
        trade_in: &TradeInSubmitted,
    ) -> Result<HandleOutcome> {
        let member = self.resolve_member(tenant, &trade_in.customer_ref).await?;
        if !member.is_active() {
            return Ok(HandleOutcome::Skipped("member_inactive"));
        }

        // 无等级时只入账估值本身
        let amount = tenant
            .program
            .tier_for(member.tier_id.as_deref())
            .map(|tier| tier.trade_in_credit_cents(trade_in.value_cents))
            .unwrap_or(trade_in.value_cents);

        self.award(
            tenant,
            event,
            Award {
                member_id: &member.id,
                amount_cents: amount,
                kind: EntryKind::TradeIn,
                template: NotificationTemplate::TradeInCredited,
                memo: format!("以旧换新 {}", trade_in.trade_in_id),
            },
        )
        .await
    }

    async fn resolve_member(&self, tenant: &Tenant, customer_ref: &str) -> Result<Member> {
        self.members
            .find_by_customer_ref(&tenant.id, customer_ref)
            .await?
            .ok_or_else(|| WebhookError::UnknownMember {
                tenant_id: tenant.id.clone(),
                customer_ref: customer_ref.to_string(),
            })
    }

    /// 注册或同步会员资料；资料中的等级必须是租户已配置的等级
    async fn upsert_member(&self, tenant: &Tenant, profile: &CustomerProfile) -> Result<Member> {
        if let Some(tier_id) = &profile.tier_id
            && tenant.program.tier(tier_id).is_none()
        {
            return Err(WebhookError::UnknownTier {
                tenant_id: tenant.id.clone(),
                tier_id: tier_id.clone(),
            });
        }

        let new_member = NewMember {
            tenant_id: tenant.id.clone(),
            customer_ref: profile.customer_ref.clone(),
            email: profile.email.clone(),
            tier_id: profile.tier_id.clone(),
        };
        let (member, created) = self.members.upsert_by_customer_ref(&new_member).await?;
        if created {
            info!(member_id = %member.id, customer_ref = %member.customer_ref, "新会员已注册");
            return Ok(member);
        }

        let update = MemberProfileUpdate {
            email: profile.email.clone().filter(|e| member.email.as_ref() != Some(e)),
            tier_id: profile
                .tier_id
                .clone()
                .filter(|t| member.tier_id.as_ref() != Some(t)),
        };
        if update.is_empty() {
            return Ok(member);
        }
        Ok(self
            .members
            .update_profile(&tenant.id, &member.id, &update)
            .await?)
    }

    async fn award(
        &self,
        tenant: &Tenant,
        event: &WebhookEvent,
        award: Award<'_>,
    ) -> Result<HandleOutcome> {
        if award.amount_cents <= 0 {
            return Ok(HandleOutcome::Skipped("zero_amount"));
        }

        let expires_at = event.occurred_at + tenant.program.validity();
        let req = PostRequest::credit(
            &tenant.id,
            award.member_id,
            award.amount_cents,
            award.kind,
            event.idempotency_key(),
            Some(expires_at),
        )
        .with_memo(award.memo);

        match self.posting.post(&req).await? {
            PostOutcome::Posted(entry) => {
                self.notifier.notify(
                    &tenant.id,
                    award.member_id,
                    award.template,
                    json!({
                        "amountCents": entry.amount_cents,
                        "balanceCents": entry.balance_after_cents,
                        "expiresAt": entry.expires_at,
                        "sourceEventId": event.source_event_id,
                    }),
                );
                Ok(HandleOutcome::Posted(entry))
            }
            PostOutcome::Duplicate(entry) => Ok(HandleOutcome::Duplicate(entry)),
        }
    }
}
