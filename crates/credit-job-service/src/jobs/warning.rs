//! 过期预警
//!
//! 只读扫描：找出将在之后 `warning_window_days` 天内的过期扫描中被扣减、且尚未预警的记录，
//! 逐条标记后通知会员。账本本身不被修改，预警标记按记录幂等。
//!
//! 标记先于通知写入，通知在标记成功后立即入队而不等分块进度保存；
//! 两者之间进程退出时该预警不会补发（至多一次）。

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use credit_ledger::period::warning_window;
use credit_ledger::{ExpiringQuery, JobKind, LedgerRepositoryTrait, NotificationSender, Tenant};
use credit_shared::events::NotificationTemplate;
use serde_json::json;

use super::{MemberExpiry, group_by_member};
use crate::error::Result;
use crate::runner::{BatchJob, ItemOutcome};

pub struct WarningJob {
    tenant_id: String,
    date_key: String,
    window_days: i64,
    window: (DateTime<Utc>, DateTime<Utc>),
    ledger: Arc<dyn LedgerRepositoryTrait>,
    notifier: NotificationSender,
}

impl WarningJob {
    pub fn new(
        tenant: &Tenant,
        date: NaiveDate,
        ledger: Arc<dyn LedgerRepositoryTrait>,
        notifier: NotificationSender,
    ) -> Result<Self> {
        let tz = tenant.tz()?;
        let window_days = tenant.program.warning_window_days;
        Ok(Self {
            tenant_id: tenant.id.clone(),
            date_key: date.format("%Y-%m-%d").to_string(),
            window_days,
            window: warning_window(tz, date, window_days),
            ledger,
            notifier,
        })
    }

    /// `[from, until)`
    pub fn window(&self) -> (DateTime<Utc>, DateTime<Utc>) {
        self.window
    }
}

#[async_trait]
impl BatchJob for WarningJob {
    type Item = MemberExpiry;

    fn job_kind(&self) -> JobKind {
        JobKind::ExpirationWarning
    }

    fn tenant_id(&self) -> &str {
        &self.tenant_id
    }

    fn period_key(&self) -> &str {
        &self.date_key
    }

    async fn next_chunk(&self, after: Option<String>, limit: usize) -> Result<Vec<MemberExpiry>> {
        let (from, until) = self.window;
        let query = ExpiringQuery {
            tenant_id: self.tenant_id.clone(),
            expires_from: Some(from),
            expires_before: until,
            after_member: after,
            member_limit: limit as i64,
            exclude_warned: true,
        };
        Ok(group_by_member(self.ledger.list_expiring_entries(&query).await?))
    }

    fn item_key(&self, item: &MemberExpiry) -> String {
        item.member_id.clone()
    }

    async fn process(&self, item: &MemberExpiry) -> Result<ItemOutcome> {
        let claimed = self
            .ledger
            .claim_expiry_warnings(&self.tenant_id, &item.entry_ids())
            .await?;
        if claimed.is_empty() {
            return Ok(ItemOutcome::Duplicate);
        }

        let fresh: Vec<_> = item
            .entries
            .iter()
            .filter(|e| claimed.contains(&e.entry_id))
            .collect();
        let amount: i64 = fresh.iter().map(|e| e.amount_cents).sum();
        let expires_at = fresh.iter().map(|e| e.expires_at).min();

        self.notifier.notify(
            &self.tenant_id,
            &item.member_id,
            NotificationTemplate::CreditExpiring,
            json!({
                "amountCents": amount,
                "expiresAt": expires_at,
                "windowDays": self.window_days,
            }),
        );
        Ok(ItemOutcome::Succeeded(None))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use credit_ledger::notification::RecordingDispatcher;
    use credit_ledger::{EntryKind, InMemoryStore, PostRequest, PostingService, ProgramConfig};
    use credit_shared::retry::RetryPolicy;

    fn tenant() -> Tenant {
        Tenant {
            id: "t-1".into(),
            name: "Shop".into(),
            active: true,
            timezone: "UTC".into(),
            program: ProgramConfig {
                warning_window_days: 7,
                ..ProgramConfig::default()
            },
            created_at: Utc::now(),
        }
    }

    async fn credit(posting: &PostingService, key: &str, amount: i64, expires: &str) -> i64 {
        posting
            .post(&PostRequest::credit(
                "t-1",
                "m-1",
                amount,
                EntryKind::PromotionBonus,
                key,
                Some(expires.parse().unwrap()),
            ))
            .await
            .unwrap()
            .entry()
            .id
    }

    #[tokio::test]
    async fn test_window_selects_entries_expiring_in_next_days() {
        let store = Arc::new(InMemoryStore::new());
        store.insert_tenant(tenant());
        store.add_member("t-1", "m-1", None);
        let posting = PostingService::new(store.clone());

        // 2025-04-01 当天到期：属于当天的过期扫描，不再预警
        credit(&posting, "k-today", 100, "2025-04-01T12:00:00Z").await;
        let inside = credit(&posting, "k-inside", 200, "2025-04-05T00:00:00Z").await;
        let edge = credit(&posting, "k-edge", 300, "2025-04-08T23:59:59Z").await;
        credit(&posting, "k-outside", 400, "2025-04-09T00:00:00Z").await;

        let dispatcher = Arc::new(RecordingDispatcher::new());
        let notifier =
            NotificationSender::new(dispatcher.clone(), RetryPolicy::none(), Duration::from_secs(1));
        let job = WarningJob::new(
            &tenant(),
            NaiveDate::from_ymd_opt(2025, 4, 1).unwrap(),
            store.clone(),
            notifier,
        )
        .unwrap();
        let chunk = job.next_chunk(None, 10).await.unwrap();

        assert_eq!(chunk.len(), 1);
        assert_eq!(chunk[0].entry_ids(), vec![inside, edge]);

        // 标记成功后通知随即入队，不依赖执行器保存分块进度
        assert_eq!(job.process(&chunk[0]).await.unwrap(), ItemOutcome::Succeeded(None));
        let delivered = dispatcher.wait_for(1, Duration::from_secs(2)).await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].template, NotificationTemplate::CreditExpiring);
        assert_eq!(delivered[0].context["amountCents"], 500);

        // 已标记的记录不会再被选中，也不会再次通知
        assert!(job.next_chunk(None, 10).await.unwrap().is_empty());
        assert_eq!(job.process(&chunk[0]).await.unwrap(), ItemOutcome::Duplicate);
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert_eq!(dispatcher.delivered().len(), 1);
    }
}
