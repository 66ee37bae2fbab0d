//! 批处理执行器
//!
//! 所有批处理任务共用同一套执行框架：
//!
//! 1. 认领 (租户, 任务类型, 账期) 的运行记录，已完成或他人持有租约时直接返回
//! 2. 从游标之后按会员 ID 分块拉取
//! 3. 逐条处理：可重试错误在条目内联重试，每次调用有独立超时；仍失败则记入失败列表并继续
//! 4. 分块结束后保存游标与计数并续约，随后发出该分块的通知
//! 5. 检查取消标记：已请求取消则在分块边界停止
//!
//! 拉取分块失败（列出会员或到期记录出错）会让整次运行进入 failed，游标保留，下一次触发从游标处恢复。
//!
//! 执行者只在持有认领时的 attempt 期间写入运行记录；租约过期后运行被他人恢复，
//! 旧执行者的下一次写入得到 `LeaseLost`，随即停止，不再改动计数与游标。

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use credit_ledger::{
    BeginOptions, ChunkProgress, JobKind, JobRun, JobRunFailure, JobRunRepositoryTrait,
    JobRunStatus, LedgerError, NotificationSender,
};
use credit_shared::config::JobsConfig;
use credit_shared::events::NotificationTemplate;
use credit_shared::observability::metrics;
use credit_shared::retry::{RetryPolicy, retry_with_policy};
use serde::Serialize;
use tracing::{debug, error, info, warn};

use crate::error::{JobError, Result};

/// 条目处理成功后要发出的通知
#[derive(Debug, Clone, PartialEq)]
pub struct Notice {
    pub member_id: String,
    pub template: NotificationTemplate,
    pub context: serde_json::Value,
}

/// 单个条目的处理结果
#[derive(Debug, Clone, PartialEq)]
pub enum ItemOutcome {
    /// 产生了新的效果（记账或预警标记），可附带通知
    Succeeded(Option<Notice>),
    /// 效果此前已发生，本次为空操作
    Duplicate,
    /// 按规则跳过
    Skipped(&'static str),
}

impl ItemOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Succeeded(_) => "succeeded",
            Self::Duplicate => "duplicate",
            Self::Skipped(_) => "skipped",
        }
    }
}

/// 可分块、可恢复的批处理任务
///
/// 条目按 `item_key` 严格升序返回，游标即上一块最后一个条目的 key。
#[async_trait]
pub trait BatchJob: Send + Sync {
    type Item: Send + Sync;

    fn job_kind(&self) -> JobKind;

    fn tenant_id(&self) -> &str;

    fn period_key(&self) -> &str;

    /// 拉取 `after` 之后的最多 `limit` 个条目
    async fn next_chunk(&self, after: Option<String>, limit: usize) -> Result<Vec<Self::Item>>;

    fn item_key(&self, item: &Self::Item) -> String;

    async fn process(&self, item: &Self::Item) -> Result<ItemOutcome>;
}

/// 执行器参数
#[derive(Debug, Clone)]
pub struct RunnerSettings {
    pub chunk_size: usize,
    pub item_retry: RetryPolicy,
    pub item_timeout: Duration,
    pub lease: chrono::Duration,
    pub max_recorded_failures: usize,
}

impl RunnerSettings {
    pub fn from_config(config: &JobsConfig) -> Self {
        Self {
            chunk_size: config.chunk_size.max(1),
            item_retry: config.member_retry_policy(),
            item_timeout: config.ledger_call_timeout(),
            lease: chrono::Duration::seconds(config.lease_seconds as i64),
            max_recorded_failures: config.max_recorded_failures,
        }
    }
}

impl Default for RunnerSettings {
    fn default() -> Self {
        Self::from_config(&JobsConfig::default())
    }
}

/// 一次触发的结果摘要（计数为该运行记录的累计值）
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: i64,
    pub tenant_id: String,
    pub job_kind: JobKind,
    pub period_key: String,
    pub status: JobRunStatus,
    /// 认领结果：started / resumed / already_completed / in_progress / cancelled / lease_lost
    pub claim: &'static str,
    pub succeeded: i64,
    pub duplicates: i64,
    pub skipped: i64,
    pub failed: i64,
    pub chunks: i64,
    pub attempt: i32,
}

impl RunSummary {
    pub fn from_run(run: &JobRun, claim: &'static str) -> Self {
        Self {
            run_id: run.id,
            tenant_id: run.tenant_id.clone(),
            job_kind: run.job_kind,
            period_key: run.period_key.clone(),
            status: run.status,
            claim,
            succeeded: run.succeeded_count,
            duplicates: run.duplicate_count,
            skipped: run.skipped_count,
            failed: run.failed_count,
            chunks: run.chunks_processed,
            attempt: run.attempt,
        }
    }
}

/// 批处理执行器
#[derive(Clone)]
pub struct BatchRunner {
    runs: Arc<dyn JobRunRepositoryTrait>,
    notifier: NotificationSender,
    settings: RunnerSettings,
}

impl BatchRunner {
    pub fn new(
        runs: Arc<dyn JobRunRepositoryTrait>,
        notifier: NotificationSender,
        settings: RunnerSettings,
    ) -> Self {
        Self {
            runs,
            notifier,
            settings,
        }
    }

    pub fn settings(&self) -> &RunnerSettings {
        &self.settings
    }

    pub fn notifier(&self) -> &NotificationSender {
        &self.notifier
    }

    /// 执行一次批处理
    ///
    /// `resume_cancelled` 为 true 时会恢复已被取消的运行，仅用于人工触发。
    pub async fn run<J: BatchJob>(&self, job: &J, resume_cancelled: bool) -> Result<RunSummary> {
        let options = BeginOptions {
            lease: self.settings.lease,
            resume_cancelled,
        };
        let claim = self
            .runs
            .begin(job.tenant_id(), job.job_kind(), job.period_key(), options)
            .await?;

        if !claim.is_runnable() {
            info!(
                run_id = claim.run().id,
                tenant_id = %job.tenant_id(),
                job_kind = %job.job_kind(),
                period_key = %job.period_key(),
                claim = claim.as_str(),
                "运行记录无需执行"
            );
            return Ok(RunSummary::from_run(claim.run(), claim.as_str()));
        }

        let label = claim.as_str();
        let run = claim.run().clone();
        info!(
            run_id = run.id,
            tenant_id = %run.tenant_id,
            job_kind = %run.job_kind,
            period_key = %run.period_key,
            attempt = run.attempt,
            cursor = ?run.cursor,
            claim = label,
            "批处理开始"
        );

        let started = Instant::now();
        let finished = match self.drive(job, &run).await {
            Ok(finished) => finished,
            Err(JobError::Ledger(LedgerError::LeaseLost { .. })) => {
                warn!(
                    run_id = run.id,
                    attempt = run.attempt,
                    "运行已被其他执行者接管，停止执行"
                );
                let current = self.runs.get(run.id).await?.unwrap_or(run);
                return Ok(RunSummary::from_run(&current, "lease_lost"));
            }
            Err(e) => return Err(e),
        };
        let elapsed = started.elapsed().as_secs_f64();
        metrics::record_job_run(finished.job_kind.as_str(), finished.status.as_str(), elapsed);

        info!(
            run_id = finished.id,
            tenant_id = %finished.tenant_id,
            job_kind = %finished.job_kind,
            period_key = %finished.period_key,
            status = %finished.status,
            succeeded = finished.succeeded_count,
            duplicates = finished.duplicate_count,
            skipped = finished.skipped_count,
            failed = finished.failed_count,
            elapsed_secs = elapsed,
            "批处理结束"
        );

        Ok(RunSummary::from_run(&finished, label))
    }

    async fn drive<J: BatchJob>(&self, job: &J, run: &JobRun) -> Result<JobRun> {
        let kind = job.job_kind().as_str();
        let chunk_size = self.settings.chunk_size;
        let mut cursor = run.cursor.clone();
        let mut recorded_failures = run.failures.len();

        loop {
            let chunk = match job.next_chunk(cursor.clone(), chunk_size).await {
                Ok(chunk) => chunk,
                Err(e) => {
                    error!(
                        run_id = run.id,
                        cursor = ?cursor,
                        error = %e,
                        "拉取分块失败，运行标记为失败"
                    );
                    return Ok(self.runs.fail(run.id, run.attempt, &e.to_string()).await?);
                }
            };

            if chunk.is_empty() {
                return Ok(self.runs.complete(run.id, run.attempt).await?);
            }

            let mut progress = ChunkProgress {
                lease: self.settings.lease,
                ..Default::default()
            };
            let mut notices = Vec::new();

            for item in &chunk {
                let item_key = job.item_key(item);
                match self.process_item(job, item).await {
                    Ok(outcome) => {
                        metrics::record_job_item(kind, outcome.as_str());
                        match outcome {
                            ItemOutcome::Succeeded(notice) => {
                                progress.succeeded += 1;
                                notices.extend(notice);
                            }
                            ItemOutcome::Duplicate => progress.duplicates += 1,
                            ItemOutcome::Skipped(reason) => {
                                debug!(run_id = run.id, item = %item_key, reason, "条目已跳过");
                                progress.skipped += 1;
                            }
                        }
                    }
                    Err((e, attempts)) => {
                        metrics::record_job_item(kind, "failed");
                        warn!(
                            run_id = run.id,
                            item = %item_key,
                            attempts,
                            error = %e,
                            "条目处理失败，记入失败列表后继续"
                        );
                        progress.failed += 1;
                        if recorded_failures < self.settings.max_recorded_failures {
                            progress.failures.push(JobRunFailure {
                                item_id: item_key,
                                error: e.to_string(),
                                attempts,
                                failed_at: Utc::now(),
                            });
                            recorded_failures += 1;
                        }
                    }
                }
            }

            progress.cursor = chunk.last().map(|item| job.item_key(item));
            cursor = progress.cursor.clone();

            let saved = self
                .runs
                .save_progress(run.id, run.attempt, &progress)
                .await;

            // 本块的记账已经落库，失去租约时通知照发
            if matches!(saved, Ok(_) | Err(LedgerError::LeaseLost { .. })) {
                for notice in notices {
                    self.notifier.notify(
                        job.tenant_id(),
                        &notice.member_id,
                        notice.template,
                        notice.context,
                    );
                }
            }

            let ack = saved?;
            debug!(
                run_id = run.id,
                cursor = ?cursor,
                succeeded = progress.succeeded,
                failed = progress.failed,
                "分块进度已保存"
            );

            if ack.cancel_requested {
                warn!(run_id = run.id, cursor = ?cursor, "收到取消请求，在分块边界停止");
                return Ok(self.runs.mark_cancelled(run.id, run.attempt).await?);
            }

            if chunk.len() < chunk_size {
                return Ok(self.runs.complete(run.id, run.attempt).await?);
            }
        }
    }

    /// 处理单个条目，失败时返回错误与实际尝试次数
    async fn process_item<J: BatchJob>(
        &self,
        job: &J,
        item: &J::Item,
    ) -> std::result::Result<ItemOutcome, (JobError, u32)> {
        let timeout = self.settings.item_timeout;
        let mut attempts = 0u32;

        let result = retry_with_policy(
            &self.settings.item_retry,
            job.job_kind().as_str(),
            JobError::is_retryable,
            || {
                attempts += 1;
                async move {
                    tokio::time::timeout(timeout, job.process(item))
                        .await
                        .map_err(|_| JobError::Timeout(format!("{} item", job.job_kind())))?
                }
            },
        )
        .await;

        result.map_err(|e| (e, attempts))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use credit_ledger::notification::RecordingDispatcher;
    use credit_ledger::{InMemoryStore, LedgerError};

    /// 条目为 "item-00".."item-NN"，可为指定条目注入失败
    struct FakeJob {
        items: Vec<String>,
        fail_always: Vec<String>,
        fail_once: Mutex<HashSet<String>>,
        fetch_fails_at: Option<usize>,
        process_calls: AtomicUsize,
        fetch_calls: AtomicUsize,
    }

    impl FakeJob {
        fn new(count: usize) -> Self {
            Self {
                items: (0..count).map(|i| format!("item-{i:02}")).collect(),
                fail_always: Vec::new(),
                fail_once: Mutex::new(HashSet::new()),
                fetch_fails_at: None,
                process_calls: AtomicUsize::new(0),
                fetch_calls: AtomicUsize::new(0),
            }
        }

        fn process_calls(&self) -> usize {
            self.process_calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl BatchJob for FakeJob {
        type Item = String;

        fn job_kind(&self) -> JobKind {
            JobKind::MonthlyCredit
        }

        fn tenant_id(&self) -> &str {
            "t-1"
        }

        fn period_key(&self) -> &str {
            "2025-03"
        }

        async fn next_chunk(&self, after: Option<String>, limit: usize) -> Result<Vec<String>> {
            let call = self.fetch_calls.fetch_add(1, Ordering::SeqCst) + 1;
            if self.fetch_fails_at == Some(call) {
                return Err(LedgerError::Timeout("list members".into()).into());
            }
            Ok(self
                .items
                .iter()
                .filter(|i| after.as_deref().is_none_or(|a| i.as_str() > a))
                .take(limit)
                .cloned()
                .collect())
        }

        fn item_key(&self, item: &String) -> String {
            item.clone()
        }

        async fn process(&self, item: &String) -> Result<ItemOutcome> {
            self.process_calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_always.contains(item) || self.fail_once.lock().unwrap().remove(item) {
                return Err(LedgerError::Timeout("ledger.post".into()).into());
            }
            Ok(ItemOutcome::Succeeded(None))
        }
    }

    fn runner(store: Arc<InMemoryStore>, chunk_size: usize) -> BatchRunner {
        let notifier = NotificationSender::new(
            Arc::new(RecordingDispatcher::new()),
            RetryPolicy::none(),
            Duration::from_secs(1),
        );
        BatchRunner::new(
            store,
            notifier,
            RunnerSettings {
                chunk_size,
                item_retry: RetryPolicy::from_millis(2, 1, 2),
                item_timeout: Duration::from_secs(1),
                lease: chrono::Duration::seconds(60),
                max_recorded_failures: 10,
            },
        )
    }

    async fn load_run(store: &InMemoryStore, run_id: i64) -> JobRun {
        JobRunRepositoryTrait::get(store, run_id)
            .await
            .unwrap()
            .unwrap()
    }

    #[tokio::test]
    async fn test_run_processes_all_chunks_and_completes() {
        let store = Arc::new(InMemoryStore::new());
        let job = FakeJob::new(7);

        let summary = runner(store, 3).run(&job, false).await.unwrap();

        assert_eq!(summary.status, JobRunStatus::Completed);
        assert_eq!(summary.claim, "started");
        assert_eq!(summary.succeeded, 7);
        assert_eq!(summary.chunks, 3);
    }

    #[tokio::test]
    async fn test_permanent_item_failure_is_recorded_and_run_completes() {
        let store = Arc::new(InMemoryStore::new());
        let mut job = FakeJob::new(4);
        job.fail_always = vec!["item-02".into()];

        let summary = runner(store.clone(), 10).run(&job, false).await.unwrap();

        assert_eq!(summary.status, JobRunStatus::Completed);
        assert_eq!(summary.succeeded, 3);
        assert_eq!(summary.failed, 1);

        let run = load_run(&store, summary.run_id).await;
        assert_eq!(run.failures.len(), 1);
        assert_eq!(run.failures[0].item_id, "item-02");
        // 首次 + 2 次重试
        assert_eq!(run.failures[0].attempts, 3);
    }

    #[tokio::test]
    async fn test_transient_item_failure_is_retried_inline() {
        let store = Arc::new(InMemoryStore::new());
        let job = FakeJob::new(1);
        job.fail_once.lock().unwrap().insert("item-00".into());

        let summary = runner(store, 10).run(&job, false).await.unwrap();

        assert_eq!(summary.succeeded, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(job.process_calls(), 2);
    }

    #[tokio::test]
    async fn test_fetch_failure_fails_run_and_next_trigger_resumes_from_cursor() {
        let store = Arc::new(InMemoryStore::new());
        let mut job = FakeJob::new(6);
        job.fetch_fails_at = Some(2);
        let runner = runner(store.clone(), 2);

        let first = runner.run(&job, false).await.unwrap();
        assert_eq!(first.status, JobRunStatus::Failed);
        assert_eq!(first.succeeded, 2);
        let run = load_run(&store, first.run_id).await;
        assert_eq!(run.cursor.as_deref(), Some("item-01"));
        assert!(run.last_error.is_some());

        let second = runner.run(&job, false).await.unwrap();
        assert_eq!(second.claim, "resumed");
        assert_eq!(second.status, JobRunStatus::Completed);
        assert_eq!(second.succeeded, 6);
        assert_eq!(job.process_calls(), 6);
    }

    #[tokio::test]
    async fn test_completed_run_is_noop() {
        let store = Arc::new(InMemoryStore::new());
        let job = FakeJob::new(2);
        let runner = runner(store, 10);

        runner.run(&job, false).await.unwrap();
        let again = runner.run(&job, false).await.unwrap();

        assert_eq!(again.claim, "already_completed");
        assert_eq!(job.process_calls(), 2);
    }

    #[tokio::test]
    async fn test_failure_list_is_capped() {
        let store = Arc::new(InMemoryStore::new());
        let mut job = FakeJob::new(15);
        job.fail_always = job.items.clone();

        let summary = runner(store.clone(), 5).run(&job, false).await.unwrap();

        assert_eq!(summary.failed, 15);
        let run = load_run(&store, summary.run_id).await;
        assert_eq!(run.failures.len(), 10);
    }
}
