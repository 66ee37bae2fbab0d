//! 任务运行记录
//!
//! 每个 (租户, 任务类型, 账期) 只有一条 JobRun，这是租户-账期粒度的幂等保证。
//! 游标记录最后处理完的会员 ID，崩溃后的下一次触发从游标之后继续。

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::enums::{JobKind, JobRunStatus};

/// 单个条目的失败记录
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunFailure {
    /// 会员 ID
    pub item_id: String,
    pub error: String,
    pub attempts: u32,
    pub failed_at: DateTime<Utc>,
}

/// 任务运行记录
#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
#[serde(rename_all = "camelCase")]
pub struct JobRun {
    pub id: i64,
    pub tenant_id: String,
    pub job_kind: JobKind,
    pub period_key: String,
    pub status: JobRunStatus,
    #[sqlx(default)]
    pub cursor: Option<String>,
    pub chunks_processed: i64,
    pub succeeded_count: i64,
    pub duplicate_count: i64,
    pub skipped_count: i64,
    pub failed_count: i64,
    #[sqlx(json)]
    pub failures: Vec<JobRunFailure>,
    #[sqlx(default)]
    pub last_error: Option<String>,
    pub cancel_requested: bool,
    /// 第几次执行（恢复时递增）
    pub attempt: i32,
    #[sqlx(default)]
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub started_at: DateTime<Utc>,
    #[sqlx(default)]
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl JobRun {
    /// 租约是否仍然有效（持有者仍在运行）
    pub fn lease_is_live(&self, now: DateTime<Utc>) -> bool {
        self.lease_expires_at.is_some_and(|t| t > now)
    }
}

/// 开始任务时的选项
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BeginOptions {
    pub lease: chrono::Duration,
    /// 是否恢复已被取消的运行（仅人工触发时使用）
    pub resume_cancelled: bool,
}

impl Default for BeginOptions {
    fn default() -> Self {
        Self {
            lease: chrono::Duration::seconds(300),
            resume_cancelled: false,
        }
    }
}

/// 认领任务的结果
#[derive(Debug, Clone)]
pub enum JobClaim {
    /// 新建运行
    Started(JobRun),
    /// 从游标处恢复（失败、租约过期或显式恢复取消）
    Resumed(JobRun),
    /// 该账期已完成，本次触发为空操作
    AlreadyCompleted(JobRun),
    /// 另一个执行者持有有效租约
    InProgress(JobRun),
    /// 已被取消且未要求恢复
    Cancelled(JobRun),
}

impl JobClaim {
    pub fn run(&self) -> &JobRun {
        match self {
            Self::Started(r)
            | Self::Resumed(r)
            | Self::AlreadyCompleted(r)
            | Self::InProgress(r)
            | Self::Cancelled(r) => r,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Started(_) => "started",
            Self::Resumed(_) => "resumed",
            Self::AlreadyCompleted(_) => "already_completed",
            Self::InProgress(_) => "in_progress",
            Self::Cancelled(_) => "cancelled",
        }
    }

    /// 调用方是否获得了执行权
    pub fn is_runnable(&self) -> bool {
        matches!(self, Self::Started(_) | Self::Resumed(_))
    }
}

/// 对已存在运行记录的认领裁决
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimDecision {
    Resume,
    AlreadyCompleted,
    InProgress,
    Cancelled,
}

impl ClaimDecision {
    /// 根据运行状态、租约与取消标记决定本次触发的行为
    ///
    /// 租约过期的 running 记录视为执行者已崩溃；若崩溃前已被请求取消，按已取消处理。
    pub fn decide(run: &JobRun, now: DateTime<Utc>, options: BeginOptions) -> Self {
        let cancelled = match run.status {
            JobRunStatus::Completed => return Self::AlreadyCompleted,
            JobRunStatus::Running if run.lease_is_live(now) => return Self::InProgress,
            JobRunStatus::Running => run.cancel_requested,
            JobRunStatus::Failed => false,
            JobRunStatus::Cancelled => true,
        };

        if cancelled && !options.resume_cancelled {
            Self::Cancelled
        } else {
            Self::Resume
        }
    }
}

/// 单个分块处理完成后的进度增量
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChunkProgress {
    /// 本块最后一个会员 ID
    pub cursor: Option<String>,
    pub succeeded: i64,
    pub duplicates: i64,
    pub skipped: i64,
    pub failed: i64,
    /// 追加到失败列表的记录
    pub failures: Vec<JobRunFailure>,
    /// 续约时长
    pub lease: chrono::Duration,
}

/// 保存进度后的应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressAck {
    pub cancel_requested: bool,
}

/// 运行记录查询条件
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunFilter {
    pub tenant_id: Option<String>,
    pub job_kind: Option<JobKind>,
    pub status: Option<JobRunStatus>,
    pub limit: Option<i64>,
}

impl JobRunFilter {
    pub const DEFAULT_LIMIT: i64 = 50;
    pub const MAX_LIMIT: i64 = 500;

    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }

    pub fn matches(&self, run: &JobRun) -> bool {
        self.tenant_id.as_ref().is_none_or(|t| *t == run.tenant_id)
            && self.job_kind.is_none_or(|k| k == run.job_kind)
            && self.status.is_none_or(|s| s == run.status)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn run(status: JobRunStatus) -> JobRun {
        let now = Utc::now();
        JobRun {
            id: 1,
            tenant_id: "t-1".into(),
            job_kind: JobKind::MonthlyCredit,
            period_key: "2025-03".into(),
            status,
            cursor: None,
            chunks_processed: 0,
            succeeded_count: 0,
            duplicate_count: 0,
            skipped_count: 0,
            failed_count: 0,
            failures: Vec::new(),
            last_error: None,
            cancel_requested: false,
            attempt: 1,
            lease_expires_at: Some(now + chrono::Duration::seconds(30)),
            started_at: now,
            completed_at: None,
            updated_at: now,
        }
    }

    #[test]
    fn test_lease_is_live() {
        let r = run(JobRunStatus::Running);
        assert!(r.lease_is_live(Utc::now()));
        assert!(!r.lease_is_live(Utc::now() + chrono::Duration::minutes(1)));
    }

    #[test]
    fn test_claim_runnable() {
        assert!(JobClaim::Started(run(JobRunStatus::Running)).is_runnable());
        assert!(JobClaim::Resumed(run(JobRunStatus::Running)).is_runnable());
        assert!(!JobClaim::AlreadyCompleted(run(JobRunStatus::Completed)).is_runnable());
        assert!(!JobClaim::InProgress(run(JobRunStatus::Running)).is_runnable());
    }

    #[test]
    fn test_claim_decision() {
        let now = Utc::now();
        let opts = BeginOptions::default();
        let resume = BeginOptions {
            resume_cancelled: true,
            ..opts
        };

        assert_eq!(
            ClaimDecision::decide(&run(JobRunStatus::Completed), now, opts),
            ClaimDecision::AlreadyCompleted
        );
        assert_eq!(
            ClaimDecision::decide(&run(JobRunStatus::Running), now, opts),
            ClaimDecision::InProgress
        );
        assert_eq!(
            ClaimDecision::decide(&run(JobRunStatus::Failed), now, opts),
            ClaimDecision::Resume
        );

        let mut stale = run(JobRunStatus::Running);
        stale.lease_expires_at = Some(now - chrono::Duration::seconds(1));
        assert_eq!(ClaimDecision::decide(&stale, now, opts), ClaimDecision::Resume);

        stale.cancel_requested = true;
        assert_eq!(
            ClaimDecision::decide(&stale, now, opts),
            ClaimDecision::Cancelled
        );
        assert_eq!(
            ClaimDecision::decide(&stale, now, resume),
            ClaimDecision::Resume
        );
        assert_eq!(
            ClaimDecision::decide(&run(JobRunStatus::Cancelled), now, resume),
            ClaimDecision::Resume
        );
    }

    #[test]
    fn test_filter_matches_and_limit() {
        let filter = JobRunFilter {
            tenant_id: Some("t-1".into()),
            status: Some(JobRunStatus::Failed),
            ..Default::default()
        };
        assert!(!filter.matches(&run(JobRunStatus::Running)));
        assert!(filter.matches(&run(JobRunStatus::Failed)));
        assert_eq!(filter.effective_limit(), 50);

        let big = JobRunFilter {
            limit: Some(10_000),
            ..Default::default()
        };
        assert_eq!(big.effective_limit(), 500);
    }
}
