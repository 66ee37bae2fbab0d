//! 批处理端到端场景（内存账本）

mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use common::{Harness, date, gold_tenant, ts};
use credit_jobs::jobs::MonthlyCreditJob;
use credit_jobs::worker::ScheduleWorker;
use credit_jobs::{BatchJob, ItemOutcome, JobError, TenantRunOutcome, TriggerOrigin};
use credit_ledger::{
    BeginOptions, ChunkProgress, EntryKind, JobClaim, JobKind, JobRunRepositoryTrait,
    JobRunStatus, LedgerError, LedgerRepositoryTrait, MemberStatus, Period, PostRequest,
};
use credit_shared::config::SchedulerConfig;
use credit_shared::events::NotificationTemplate;

fn march() -> Period {
    "2025-03".parse().unwrap()
}

async fn credit(h: &Harness, member: &str, cents: i64, key: &str, expires: &str) -> i64 {
    h.posting
        .post(&PostRequest::credit(
            "t-1",
            member,
            cents,
            EntryKind::TradeIn,
            key,
            Some(ts(expires)),
        ))
        .await
        .unwrap()
        .entry()
        .id
}

#[tokio::test]
async fn test_monthly_credit_for_gold_member_is_idempotent_per_period() {
    let h = Harness::new(50).with_gold_members(gold_tenant("t-1", "America/New_York"), 1);

    let report = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    let summary = report.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.claim, "started");
    assert_eq!(summary.status, JobRunStatus::Completed);
    assert_eq!(summary.succeeded, 1);

    let entries = h.store.entries_for("m-000");
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].amount_cents, 500);
    assert_eq!(entries[0].kind, EntryKind::MonthlyCredit);
    assert_eq!(
        entries[0].expires_at,
        Some(ts("2025-04-01T04:00:00Z") + chrono::Duration::days(90))
    );

    let again = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    let summary = again.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.claim, "already_completed");
    assert_eq!(h.store.entries_for("m-000").len(), 1);
    assert_eq!(h.store.member("m-000").unwrap().balance_cents, 500);

    let delivered = h.dispatcher.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(delivered.len(), 1);
    assert_eq!(delivered[0].template, NotificationTemplate::CreditIssued);
    assert_eq!(delivered[0].member_id, "m-000");
}

#[tokio::test]
async fn test_paused_members_are_not_credited() {
    let h = Harness::new(50).with_gold_members(gold_tenant("t-1", "UTC"), 3);
    h.store.set_member_status("m-001", MemberStatus::Paused);

    let report = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Manual)
        .await
        .unwrap();

    assert_eq!(report.for_tenant("t-1").unwrap().summary().unwrap().succeeded, 2);
    assert!(h.store.entries_for("m-001").is_empty());
}

#[tokio::test]
async fn test_expiration_posts_once_for_entry_expiring_before_scan_date() {
    let h = Harness::new(50).with_gold_members(gold_tenant("t-1", "UTC"), 0);
    h.store.add_member("t-1", "m-1", None);
    credit(&h, "m-1", 2_000, "t-1:trade_in:evt-1", "2025-04-01T00:00:00Z").await;

    let first = h
        .scheduler
        .trigger_expiration_scan(Some("t-1"), Some(date("2025-04-02")), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    assert_eq!(first.for_tenant("t-1").unwrap().summary().unwrap().succeeded, 1);

    let entries = h.store.entries_for("m-1");
    assert_eq!(entries.len(), 2);
    assert_eq!(entries[1].kind, EntryKind::Expiration);
    assert_eq!(entries[1].amount_cents, -2_000);
    assert_eq!(entries[1].idempotency_key, "t-1:expiration:2025-04-02:m-1");

    let second = h
        .scheduler
        .trigger_expiration_scan(Some("t-1"), Some(date("2025-04-03")), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    let summary = second.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.status, JobRunStatus::Completed);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(h.store.entries_for("m-1").len(), 2);
    assert_eq!(h.store.member("m-1").unwrap().balance_cents, 0);

    let delivered = h.dispatcher.wait_for(1, Duration::from_secs(2)).await;
    assert_eq!(delivered[0].template, NotificationTemplate::CreditExpired);
    assert_eq!(delivered[0].context["amountCents"], 2_000);
}

#[tokio::test]
async fn test_expiration_is_fifo_by_expiry() {
    let h = Harness::new(50).with_gold_members(gold_tenant("t-1", "UTC"), 0);
    h.store.add_member("t-1", "m-1", None);
    let ten = credit(&h, "m-1", 1_000, "t-1:trade_in:a", "2025-04-01T10:00:00Z").await;
    let fifteen = credit(&h, "m-1", 1_500, "t-1:trade_in:b", "2025-04-05T10:00:00Z").await;

    h.scheduler
        .trigger_expiration_scan(Some("t-1"), Some(date("2025-04-01")), TriggerOrigin::Scheduled)
        .await
        .unwrap();

    let expiration = h.store.entries_for("m-1").pop().unwrap();
    assert_eq!(expiration.amount_cents, -1_000);
    assert_eq!(h.store.member("m-1").unwrap().balance_cents, 1_500);

    let offsets = h.store.list_offsets(expiration.id).await.unwrap();
    assert_eq!(offsets.len(), 1);
    assert_eq!(offsets[0].source_entry_id, ten);

    h.scheduler
        .trigger_expiration_scan(Some("t-1"), Some(date("2025-04-05")), TriggerOrigin::Scheduled)
        .await
        .unwrap();

    let expiration = h.store.entries_for("m-1").pop().unwrap();
    assert_eq!(expiration.amount_cents, -1_500);
    let offsets = h.store.list_offsets(expiration.id).await.unwrap();
    assert_eq!(offsets[0].source_entry_id, fifteen);
    assert_eq!(h.store.member("m-1").unwrap().balance_cents, 0);
}

#[tokio::test]
async fn test_warning_scan_notifies_once() {
    let h = Harness::new(50).with_gold_members(gold_tenant("t-1", "UTC"), 0);
    h.store.add_member("t-1", "m-1", None);
    credit(&h, "m-1", 700, "t-1:trade_in:w", "2025-04-04T12:00:00Z").await;

    for scan_date in ["2025-04-01", "2025-04-02"] {
        h.scheduler
            .trigger_warning_scan(Some("t-1"), Some(date(scan_date)), TriggerOrigin::Scheduled)
            .await
            .unwrap();
    }

    let delivered = h.dispatcher.wait_for(1, Duration::from_secs(2)).await;
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(h.dispatcher.delivered().len(), 1);
    assert_eq!(delivered[0].template, NotificationTemplate::CreditExpiring);
    assert_eq!(delivered[0].context["amountCents"], 700);
    // 预警不改账本
    assert_eq!(h.store.entries_for("m-1").len(), 1);
}

#[tokio::test]
async fn test_member_failure_is_recorded_and_run_continues() {
    let h = Harness::new(2).with_gold_members(gold_tenant("t-1", "UTC"), 5);
    h.store.fail_next_posts("m-002", 10);

    let report = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    let summary = report.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.status, JobRunStatus::Completed);
    assert_eq!(summary.succeeded, 4);
    assert_eq!(summary.failed, 1);

    let run = JobRunRepositoryTrait::get(&*h.store, summary.run_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.failures.len(), 1);
    assert_eq!(run.failures[0].item_id, "m-002");
    assert_eq!(run.failures[0].attempts, 3);
    assert!(h.store.entries_for("m-002").is_empty());
}

#[tokio::test]
async fn test_transient_failure_is_retried_inline() {
    let h = Harness::new(2).with_gold_members(gold_tenant("t-1", "UTC"), 3);
    h.store.fail_next_posts("m-001", 1);

    let report = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    let summary = report.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.succeeded, 3);
    assert_eq!(summary.failed, 0);
    assert_eq!(h.store.entries_for("m-001").len(), 1);
}

/// 在第 `crash_at` 次拉取分块时 panic，模拟进程崩溃
struct CrashingJob {
    inner: MonthlyCreditJob,
    fetches: AtomicUsize,
    crash_at: usize,
}

#[async_trait]
impl BatchJob for CrashingJob {
    type Item = <MonthlyCreditJob as BatchJob>::Item;

    fn job_kind(&self) -> JobKind {
        self.inner.job_kind()
    }

    fn tenant_id(&self) -> &str {
        self.inner.tenant_id()
    }

    fn period_key(&self) -> &str {
        self.inner.period_key()
    }

    async fn next_chunk(
        &self,
        after: Option<String>,
        limit: usize,
    ) -> credit_jobs::Result<Vec<Self::Item>> {
        if self.fetches.fetch_add(1, Ordering::SeqCst) + 1 == self.crash_at {
            panic!("simulated crash");
        }
        self.inner.next_chunk(after, limit).await
    }

    fn item_key(&self, item: &Self::Item) -> String {
        self.inner.item_key(item)
    }

    async fn process(&self, item: &Self::Item) -> credit_jobs::Result<ItemOutcome> {
        self.inner.process(item).await
    }
}

#[tokio::test]
async fn test_crashed_run_resumes_from_cursor_without_duplicates() {
    let h = Harness::new(2).with_gold_members(gold_tenant("t-1", "UTC"), 10);
    let tenant = gold_tenant("t-1", "UTC");

    let job = Arc::new(CrashingJob {
        inner: MonthlyCreditJob::new(tenant, march(), h.store.clone(), h.posting.clone()).unwrap(),
        fetches: AtomicUsize::new(0),
        crash_at: 3,
    });
    let runner = h.runner.clone();
    let crashed = tokio::spawn({
        let job = job.clone();
        async move { runner.run(&*job, false).await }
    })
    .await;
    assert!(crashed.is_err());

    let run = h
        .store
        .find("t-1", JobKind::MonthlyCredit, "2025-03")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(run.status, JobRunStatus::Running);
    assert_eq!(run.cursor.as_deref(), Some("m-003"));
    assert_eq!(h.store.post_calls(), 4);

    // 租约未过期时视为仍在执行
    let busy = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    assert_eq!(busy.for_tenant("t-1").unwrap().summary().unwrap().claim, "in_progress");

    h.store.expire_lease(run.id);
    let resumed = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    let summary = resumed.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.claim, "resumed");
    assert_eq!(summary.status, JobRunStatus::Completed);
    assert_eq!(summary.succeeded, 10);
    assert_eq!(summary.duplicates, 0);
    assert_eq!(summary.attempt, 2);

    // 已处理的会员不会再被调用
    assert_eq!(h.store.post_calls(), 10);
    assert_eq!(h.store.all_entries().len(), 10);
}

fn chunk(cursor: &str, succeeded: i64) -> ChunkProgress {
    ChunkProgress {
        cursor: Some(cursor.into()),
        succeeded,
        lease: chrono::Duration::seconds(60),
        ..Default::default()
    }
}

#[tokio::test]
async fn test_stale_runner_writes_are_rejected_after_resume() {
    let h = Harness::new(5);
    let opts = BeginOptions::default();

    let JobClaim::Started(first) = h
        .store
        .begin("t-1", JobKind::MonthlyCredit, "2025-03", opts)
        .await
        .unwrap()
    else {
        panic!("expected started");
    };
    h.store.expire_lease(first.id);
    let JobClaim::Resumed(second) = h
        .store
        .begin("t-1", JobKind::MonthlyCredit, "2025-03", opts)
        .await
        .unwrap()
    else {
        panic!("expected resumed");
    };
    assert_eq!(second.attempt, first.attempt + 1);

    h.store
        .save_progress(second.id, second.attempt, &chunk("m-009", 5))
        .await
        .unwrap();

    let stale = h
        .store
        .save_progress(first.id, first.attempt, &chunk("m-004", 5))
        .await;
    assert!(matches!(stale, Err(LedgerError::LeaseLost { attempt: 1, .. })));
    assert!(matches!(
        h.store.complete(first.id, first.attempt).await,
        Err(LedgerError::LeaseLost { .. })
    ));
    assert!(matches!(
        h.store.fail(first.id, first.attempt, "boom").await,
        Err(LedgerError::LeaseLost { .. })
    ));
    assert!(matches!(
        h.store.mark_cancelled(first.id, first.attempt).await,
        Err(LedgerError::LeaseLost { .. })
    ));

    let run = h.store.get(first.id).await.unwrap().unwrap();
    assert_eq!(run.status, JobRunStatus::Running);
    assert_eq!(run.cursor.as_deref(), Some("m-009"));
    assert_eq!(run.succeeded_count, 5);
    assert_eq!(run.chunks_processed, 1);

    let done = h.store.complete(second.id, second.attempt).await.unwrap();
    assert_eq!(done.status, JobRunStatus::Completed);
    assert!(matches!(
        h.store
            .save_progress(second.id, second.attempt, &chunk("m-010", 1))
            .await,
        Err(LedgerError::LeaseLost { .. })
    ));
}

/// 处理第一个条目时模拟租约过期并被另一次触发接管
struct TakenOverJob {
    inner: MonthlyCreditJob,
    store: Arc<credit_ledger::InMemoryStore>,
    taken: AtomicBool,
}

#[async_trait]
impl BatchJob for TakenOverJob {
    type Item = <MonthlyCreditJob as BatchJob>::Item;

    fn job_kind(&self) -> JobKind {
        self.inner.job_kind()
    }

    fn tenant_id(&self) -> &str {
        self.inner.tenant_id()
    }

    fn period_key(&self) -> &str {
        self.inner.period_key()
    }

    async fn next_chunk(
        &self,
        after: Option<String>,
        limit: usize,
    ) -> credit_jobs::Result<Vec<Self::Item>> {
        self.inner.next_chunk(after, limit).await
    }

    fn item_key(&self, item: &Self::Item) -> String {
        self.inner.item_key(item)
    }

    async fn process(&self, item: &Self::Item) -> credit_jobs::Result<ItemOutcome> {
        if !self.taken.swap(true, Ordering::SeqCst) {
            let run = self
                .store
                .find("t-1", JobKind::MonthlyCredit, "2025-03")
                .await?
                .ok_or_else(|| JobError::InvalidTrigger("run missing".into()))?;
            self.store.expire_lease(run.id);
            self.store
                .begin("t-1", JobKind::MonthlyCredit, "2025-03", BeginOptions::default())
                .await?;
        }
        self.inner.process(item).await
    }
}

#[tokio::test]
async fn test_runner_stops_without_writing_after_losing_lease() {
    let h = Harness::new(2).with_gold_members(gold_tenant("t-1", "UTC"), 6);
    let job = TakenOverJob {
        inner: MonthlyCreditJob::new(
            gold_tenant("t-1", "UTC"),
            march(),
            h.store.clone(),
            h.posting.clone(),
        )
        .unwrap(),
        store: h.store.clone(),
        taken: AtomicBool::new(false),
    };

    let summary = h.runner.run(&job, false).await.unwrap();
    assert_eq!(summary.claim, "lease_lost");
    assert_eq!(summary.status, JobRunStatus::Running);
    assert_eq!(summary.attempt, 2);
    assert_eq!(summary.succeeded, 0);
    assert_eq!(summary.chunks, 0);

    let run = h
        .store
        .find("t-1", JobKind::MonthlyCredit, "2025-03")
        .await
        .unwrap()
        .unwrap();
    assert!(run.cursor.is_none());

    // 已落库的记账照常通知，之后不再拉取分块
    assert_eq!(h.store.all_entries().len(), 2);
    let delivered = h.dispatcher.wait_for(2, Duration::from_secs(2)).await;
    assert_eq!(delivered.len(), 2);
}

/// 处理第一个条目时请求取消
struct CancellingJob {
    inner: MonthlyCreditJob,
    store: Arc<credit_ledger::InMemoryStore>,
    requested: AtomicBool,
}

#[async_trait]
impl BatchJob for CancellingJob {
    type Item = <MonthlyCreditJob as BatchJob>::Item;

    fn job_kind(&self) -> JobKind {
        self.inner.job_kind()
    }

    fn tenant_id(&self) -> &str {
        self.inner.tenant_id()
    }

    fn period_key(&self) -> &str {
        self.inner.period_key()
    }

    async fn next_chunk(
        &self,
        after: Option<String>,
        limit: usize,
    ) -> credit_jobs::Result<Vec<Self::Item>> {
        self.inner.next_chunk(after, limit).await
    }

    fn item_key(&self, item: &Self::Item) -> String {
        self.inner.item_key(item)
    }

    async fn process(&self, item: &Self::Item) -> credit_jobs::Result<ItemOutcome> {
        if !self.requested.swap(true, Ordering::SeqCst) {
            let run = self
                .store
                .find("t-1", JobKind::MonthlyCredit, "2025-03")
                .await?
                .ok_or_else(|| JobError::InvalidTrigger("run missing".into()))?;
            self.store.request_cancel(run.id).await?;
        }
        self.inner.process(item).await
    }
}

#[tokio::test]
async fn test_cancel_stops_at_chunk_boundary_and_manual_trigger_resumes() {
    let h = Harness::new(2).with_gold_members(gold_tenant("t-1", "UTC"), 6);
    let job = CancellingJob {
        inner: MonthlyCreditJob::new(
            gold_tenant("t-1", "UTC"),
            march(),
            h.store.clone(),
            h.posting.clone(),
        )
        .unwrap(),
        store: h.store.clone(),
        requested: AtomicBool::new(false),
    };

    let summary = h.runner.run(&job, false).await.unwrap();
    assert_eq!(summary.status, JobRunStatus::Cancelled);
    // 当前分块处理完才停止
    assert_eq!(summary.succeeded, 2);
    assert_eq!(h.store.all_entries().len(), 2);

    let scheduled = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();
    assert_eq!(scheduled.for_tenant("t-1").unwrap().summary().unwrap().claim, "cancelled");
    assert_eq!(h.store.all_entries().len(), 2);

    let manual = h
        .scheduler
        .trigger_monthly_credits(Some("t-1"), Some(march()), TriggerOrigin::Manual)
        .await
        .unwrap();
    let summary = manual.for_tenant("t-1").unwrap().summary().unwrap();
    assert_eq!(summary.claim, "resumed");
    assert_eq!(summary.status, JobRunStatus::Completed);
    assert_eq!(summary.succeeded, 6);
    assert_eq!(h.store.all_entries().len(), 6);
}

#[tokio::test]
async fn test_tenants_are_isolated() {
    let h = Harness::new(10).with_gold_members(gold_tenant("t-1", "UTC"), 2);
    let mut inactive = gold_tenant("t-2", "UTC");
    inactive.active = false;
    h.store.insert_tenant(inactive);
    h.store.insert_tenant(gold_tenant("t-3", "Mars/Olympus"));
    let mut endless = gold_tenant("t-4", "UTC");
    endless.program.credit_validity_days = i64::MAX;
    h.store.insert_tenant(endless);
    h.store.add_member("t-4", "m-400", Some("gold"));

    let report = h
        .scheduler
        .trigger_monthly_credits(None, Some(march()), TriggerOrigin::Scheduled)
        .await
        .unwrap();

    assert_eq!(report.for_tenant("t-1").unwrap().summary().unwrap().succeeded, 2);
    assert!(report.for_tenant("t-2").is_none());
    assert!(matches!(
        report.for_tenant("t-3").unwrap().outcome,
        TenantRunOutcome::Error { .. }
    ));
    assert!(matches!(
        &report.for_tenant("t-4").unwrap().outcome,
        TenantRunOutcome::Error { code, .. } if code == "INVALID_PROGRAM"
    ));
    assert!(h.store.entries_for("m-400").is_empty());

    let by_id = h
        .scheduler
        .trigger_monthly_credits(Some("t-4"), Some(march()), TriggerOrigin::Manual)
        .await;
    assert!(matches!(by_id, Err(e) if e.code() == "INVALID_PROGRAM"));

    let explicit = h
        .scheduler
        .trigger_monthly_credits(Some("t-2"), Some(march()), TriggerOrigin::Manual)
        .await
        .unwrap();
    assert!(matches!(
        &explicit.for_tenant("t-2").unwrap().outcome,
        TenantRunOutcome::Skipped { reason } if reason == "tenant_inactive"
    ));

    let unknown = h
        .scheduler
        .trigger_monthly_credits(Some("nope"), None, TriggerOrigin::Manual)
        .await;
    assert!(matches!(unknown, Err(JobError::TenantNotFound(_))));
}

#[tokio::test]
async fn test_schedule_worker_fires_in_tenant_timezone() {
    let h = Harness::new(10).with_gold_members(gold_tenant("tokyo", "Asia/Tokyo"), 2);
    h.store.insert_tenant(gold_tenant("utc", "UTC"));

    let worker = ScheduleWorker::new(h.scheduler.clone(), &SchedulerConfig::default()).unwrap();
    // 东京 2025-03-01 00:10 的月度触发点
    let fired = worker
        .tick(ts("2025-02-28T15:05:00Z"), ts("2025-02-28T15:15:00Z"))
        .await
        .unwrap();

    assert_eq!(fired.len(), 1);
    assert_eq!(fired[0].job_kind, JobKind::MonthlyCredit);
    assert_eq!(fired[0].report.tenant_id, "tokyo");
    let summary = fired[0].report.summary().unwrap();
    assert_eq!(summary.succeeded, 2);
    assert_eq!(
        summary.period_key,
        Period::containing(chrono_tz::Asia::Tokyo, Utc::now()).key()
    );
}
