//! 月度额度发放
//!
//! 按会员 ID 升序遍历租户的 active 会员，按等级配置的月度额度入账。
//! 未分配等级或额度为 0 的会员直接跳过，不写零金额记录。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use credit_ledger::period::monthly_credit_expires_at;
use credit_ledger::{
    EntryKind, JobKind, Member, MemberRepositoryTrait, Period, PostOutcome, PostRequest,
    PostingService, Tenant, TierBenefit, batch_idempotency_key,
};
use credit_shared::events::NotificationTemplate;
use serde_json::json;
use tracing::debug;

use crate::error::Result;
use crate::runner::{BatchJob, ItemOutcome, Notice};

pub struct MonthlyCreditJob {
    tenant: Tenant,
    tz: Tz,
    period: Period,
    period_key: String,
    members: Arc<dyn MemberRepositoryTrait>,
    posting: PostingService,
}

impl MonthlyCreditJob {
    pub fn new(
        tenant: Tenant,
        period: Period,
        members: Arc<dyn MemberRepositoryTrait>,
        posting: PostingService,
    ) -> Result<Self> {
        let tz = tenant.tz()?;
        Ok(Self {
            tenant,
            tz,
            period,
            period_key: period.key(),
            members,
            posting,
        })
    }

    /// 本账期发放额度的过期时间
    pub fn expires_at(&self) -> DateTime<Utc> {
        monthly_credit_expires_at(
            self.tz,
            self.period,
            self.tenant.program.credit_validity_days,
        )
    }

    fn stipend_for(&self, member: &Member) -> i64 {
        self.tenant
            .program
            .tier_for(member.tier_id.as_deref())
            .map(TierBenefit::monthly_stipend_cents)
            .unwrap_or(0)
    }
}

#[async_trait]
impl BatchJob for MonthlyCreditJob {
    type Item = Member;

    fn job_kind(&self) -> JobKind {
        JobKind::MonthlyCredit
    }

    fn tenant_id(&self) -> &str {
        &self.tenant.id
    }

    fn period_key(&self) -> &str {
        &self.period_key
    }

    async fn next_chunk(&self, after: Option<String>, limit: usize) -> Result<Vec<Member>> {
        Ok(self
            .members
            .list_active_page(&self.tenant.id, after, limit as i64)
            .await?)
    }

    fn item_key(&self, member: &Member) -> String {
        member.id.clone()
    }

    async fn process(&self, member: &Member) -> Result<ItemOutcome> {
        let stipend = self.stipend_for(member);
        if stipend <= 0 {
            debug!(
                tenant_id = %self.tenant.id,
                member_id = %member.id,
                tier_id = ?member.tier_id,
                "会员无月度额度，跳过"
            );
            return Ok(ItemOutcome::Skipped("no_stipend"));
        }

        let key = batch_idempotency_key(
            &self.tenant.id,
            JobKind::MonthlyCredit.as_str(),
            &self.period_key,
            &member.id,
        );
        let expires_at = self.expires_at();
        let req = PostRequest::credit(
            &self.tenant.id,
            &member.id,
            stipend,
            EntryKind::MonthlyCredit,
            key,
            Some(expires_at),
        )
        .with_memo(format!("{} 月度额度", self.period_key));

        match self.posting.post(&req).await? {
            PostOutcome::Posted(entry) => Ok(ItemOutcome::Succeeded(Some(Notice {
                member_id: member.id.clone(),
                template: NotificationTemplate::CreditIssued,
                context: json!({
                    "amountCents": entry.amount_cents,
                    "balanceCents": entry.balance_after_cents,
                    "period": self.period_key,
                    "expiresAt": expires_at,
                }),
            }))),
            PostOutcome::Duplicate(_) => Ok(ItemOutcome::Duplicate),
        }
    }
}
