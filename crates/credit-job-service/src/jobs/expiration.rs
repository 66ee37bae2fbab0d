//! 到期扣减
//!
//! 扫描日期 D 覆盖"在 D 当天或之前到期且尚未核销"的入账记录。
//! 每个会员一条负数 `expiration` 记录，核销其全部到期来源，金额截断到当前余额。

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use credit_ledger::period::expiration_cutoff;
use credit_ledger::{
    ExpiringQuery, JobKind, LedgerError, PostOutcome, PostRequest, PostingService, Tenant,
    batch_idempotency_key,
};
use credit_shared::events::NotificationTemplate;
use serde_json::json;
use tracing::info;

use super::{MemberExpiry, group_by_member};
use crate::error::Result;
use crate::runner::{BatchJob, ItemOutcome, Notice};

pub struct ExpirationJob {
    tenant_id: String,
    date_key: String,
    cutoff: DateTime<Utc>,
    posting: PostingService,
}

impl ExpirationJob {
    pub fn new(tenant: &Tenant, date: NaiveDate, posting: PostingService) -> Result<Self> {
        let tz = tenant.tz()?;
        Ok(Self {
            tenant_id: tenant.id.clone(),
            date_key: date.format("%Y-%m-%d").to_string(),
            cutoff: expiration_cutoff(tz, date),
            posting,
        })
    }

    /// 到期时间早于该时刻的记录会被扣减
    pub fn cutoff(&self) -> DateTime<Utc> {
        self.cutoff
    }
}

#[async_trait]
impl BatchJob for ExpirationJob {
    type Item = MemberExpiry;

    fn job_kind(&self) -> JobKind {
        JobKind::Expiration
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn period_key(&self) -> &str {
        &self.date_key
    }

    async fn next_chunk(&self, after: Option<String>, limit: usize) -> Result<Vec<MemberExpiry>> {
        let query = ExpiringQuery {
            tenant_id: self.tenant_id.clone(),
            expires_from: None,
            expires_before: self.cutoff,
            after_member: after,
            member_limit: limit as i64,
            exclude_warned: false,
        };
        let entries = self.posting.repository().list_expiring_entries(&query).await?;
        Ok(group_by_member(entries))
    }

    fn item_key(&self, item: &MemberExpiry) -> String {
        item.member_id.clone()
    }

    async fn process(&self, item: &MemberExpiry) -> Result<ItemOutcome> {
        let key = batch_idempotency_key(
            &self.tenant_id,
            JobKind::Expiration.as_str(),
            &self.date_key,
            &item.member_id,
        );
        let req = PostRequest::expiration(
            &self.tenant_id,
            &item.member_id,
            item.total_cents(),
            key,
            item.entry_ids(),
        )
        .with_memo(format!("{} 到期", self.date_key));

        match self.posting.post(&req).await {
            Ok(PostOutcome::Posted(entry)) if entry.amount_cents == 0 => {
                info!(
                    tenant_id = %self.tenant_id,
                    member_id = %item.member_id,
                    nominal_cents = item.total_cents(),
                    "余额为 0，来源记录已核销但未扣减"
                );
                Ok(ItemOutcome::Succeeded(None))
            }
            Ok(PostOutcome::Posted(entry)) => Ok(ItemOutcome::Succeeded(Some(Notice {
                member_id: item.member_id.clone(),
                template: NotificationTemplate::CreditExpired,
                context: json!({
                    "amountCents": -entry.amount_cents,
                    "balanceCents": entry.balance_after_cents,
                    "date": self.date_key,
                }),
            }))),
            Ok(PostOutcome::Duplicate(_)) => Ok(ItemOutcome::Duplicate),
            // 并发的另一次扫描已核销全部来源
            Err(LedgerError::AlreadySettled { .. }) => Ok(ItemOutcome::Skipped("already_settled")),
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    use credit_ledger::{EntryKind, InMemoryStore, ProgramConfig};

    fn tenant() -> Tenant {
        Tenant {
            id: "t-1".into(),
            name: "Shop".into(),
            active: true,
            timezone: "UTC".into(),
            program: ProgramConfig::default(),
            created_at: Utc::now(),
        }
    }

    fn date(s: &str) -> NaiveDate {
        NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
    }

    #[tokio::test]
    async fn test_cutoff_is_exclusive_midnight_after_date() {
        let store = Arc::new(InMemoryStore::new());
        let job = ExpirationJob::new(&tenant(), date("2025-04-02"), PostingService::new(store))
            .unwrap();
        assert_eq!(
            job.cutoff(),
            "2025-04-03T00:00:00Z".parse::<DateTime<Utc>>().unwrap()
        );
        assert_eq!(job.period_key(), "2025-04-02");
    }

    #[tokio::test]
    async fn test_concurrently_settled_sources_are_skipped() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_tenant(tenant());
        store.add_member("t-1", "m-1", None);
        let posting = PostingService::new(store.clone());

        let source = posting
            .post(&PostRequest::credit(
                "t-1",
                "m-1",
                2_000,
                EntryKind::TradeIn,
                "t-1:trade_in:evt-1",
                Some("2025-04-01T00:00:00Z".parse().unwrap()),
            ))
            .await
            .unwrap()
            .into_entry();

        let job = ExpirationJob::new(&tenant(), date("2025-04-02"), posting.clone()).unwrap();
        let chunk = job.next_chunk(None, 10).await.unwrap();
        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk[0].entry_ids(), vec![source.id]);

        // 另一日期的扫描先核销了同一来源
        posting
            .post(&PostRequest::expiration(
                "t-1",
                "m-1",
                2_000,
                "t-1:expiration:2025-04-01:m-1",
                vec![source.id],
            ))
            .await
            .unwrap();

        let outcome = job.process(&chunk[0]).await.unwrap();
        assert_eq!(outcome, ItemOutcome::Skipped("already_settled"));
        assert_eq!(store.member("m-1").unwrap().balance_cents, 0);
    }
}
