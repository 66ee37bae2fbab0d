//! 任务运行记录仓储（Postgres）
//!
//! 认领流程：`INSERT ... ON CONFLICT DO NOTHING` 抢占新记录，
//! 冲突时 `SELECT ... FOR UPDATE` 锁定已有记录再裁决。

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use sqlx::types::Json;
use tracing::info;

use super::traits::JobRunRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{
    BeginOptions, ChunkProgress, ClaimDecision, JobClaim, JobKind, JobRun, JobRunFilter,
    JobRunStatus, ProgressAck,
};

const JOB_RUN_COLUMNS: &str = "id, tenant_id, job_kind, period_key, status, cursor, \
     chunks_processed, succeeded_count, duplicate_count, skipped_count, failed_count, failures, \
     last_error, cancel_requested, attempt, lease_expires_at, started_at, completed_at, updated_at";

pub struct JobRunRepository {
    pool: PgPool,
}

impl JobRunRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 结束持有中的运行并返回最新记录
    async fn transition(
        &self,
        run_id: i64,
        attempt: i32,
        status: JobRunStatus,
        error: Option<&str>,
    ) -> Result<JobRun> {
        let sql = format!(
            r#"
            UPDATE job_runs
            SET status = $2,
                last_error = COALESCE($3, last_error),
                completed_at = CASE WHEN $2 IN ('completed', 'cancelled') THEN NOW() ELSE completed_at END,
                lease_expires_at = NULL,
                updated_at = NOW()
            WHERE id = $1 AND status = 'running' AND attempt = $4
            RETURNING {JOB_RUN_COLUMNS}
            "#
        );
        sqlx::query_as::<_, JobRun>(&sql)
            .bind(run_id)
            .bind(status)
            .bind(error)
            .bind(attempt)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::LeaseLost { run_id, attempt })
    }
}

#[async_trait]
impl JobRunRepositoryTrait for JobRunRepository {
    async fn begin(
        &self,
        tenant_id: &str,
        job_kind: JobKind,
        period_key: &str,
        options: BeginOptions,
    ) -> Result<JobClaim> {
        let now = Utc::now();
        let lease_until = now + options.lease;
        let mut tx = self.pool.begin().await?;

        let sql = format!(
            r#"
            INSERT INTO job_runs
                (tenant_id, job_kind, period_key, status, attempt, lease_expires_at, started_at, updated_at)
            VALUES ($1, $2, $3, 'running', 1, $4, $5, $5)
            ON CONFLICT (tenant_id, job_kind, period_key) DO NOTHING
            RETURNING {JOB_RUN_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, JobRun>(&sql)
            .bind(tenant_id)
            .bind(job_kind)
            .bind(period_key)
            .bind(lease_until)
            .bind(now)
            .fetch_optional(&mut *tx)
            .await?;

        if let Some(run) = inserted {
            tx.commit().await?;
            return Ok(JobClaim::Started(run));
        }

        let sql = format!(
            r#"
            SELECT {JOB_RUN_COLUMNS} FROM job_runs
            WHERE tenant_id = $1 AND job_kind = $2 AND period_key = $3
            FOR UPDATE
            "#
        );
        let existing = sqlx::query_as::<_, JobRun>(&sql)
            .bind(tenant_id)
            .bind(job_kind)
            .bind(period_key)
            .fetch_one(&mut *tx)
            .await?;

        let claim = match ClaimDecision::decide(&existing, now, options) {
            ClaimDecision::AlreadyCompleted => JobClaim::AlreadyCompleted(existing),
            ClaimDecision::InProgress => JobClaim::InProgress(existing),
            ClaimDecision::Resume => {
                let sql = format!(
                    r#"
                    UPDATE job_runs
                    SET status = 'running',
                        attempt = attempt + 1,
                        cancel_requested = FALSE,
                        completed_at = NULL,
                        lease_expires_at = $2,
                        updated_at = $3
                    WHERE id = $1
                    RETURNING {JOB_RUN_COLUMNS}
                    "#
                );
                let resumed = sqlx::query_as::<_, JobRun>(&sql)
                    .bind(existing.id)
                    .bind(lease_until)
                    .bind(now)
                    .fetch_one(&mut *tx)
                    .await?;
                info!(
                    run_id = resumed.id,
                    tenant_id = %tenant_id,
                    job_kind = %job_kind,
                    period_key = %period_key,
                    attempt = resumed.attempt,
                    cursor = ?resumed.cursor,
                    "从游标恢复任务运行"
                );
                JobClaim::Resumed(resumed)
            }
            ClaimDecision::Cancelled if existing.status == JobRunStatus::Running => {
                // 执行者在取消生效前崩溃，补记为已取消
                let sql = format!(
                    r#"
                    UPDATE job_runs
                    SET status = 'cancelled', completed_at = NOW(), lease_expires_at = NULL, updated_at = NOW()
                    WHERE id = $1
                    RETURNING {JOB_RUN_COLUMNS}
                    "#
                );
                let cancelled = sqlx::query_as::<_, JobRun>(&sql)
                    .bind(existing.id)
                    .fetch_one(&mut *tx)
                    .await?;
                JobClaim::Cancelled(cancelled)
            }
            ClaimDecision::Cancelled => JobClaim::Cancelled(existing),
        };

        tx.commit().await?;
        Ok(claim)
    }

    async fn save_progress(
        &self,
        run_id: i64,
        attempt: i32,
        progress: &ChunkProgress,
    ) -> Result<ProgressAck> {
        let now = Utc::now();
        let cancel_requested = sqlx::query_scalar::<_, bool>(
            r#"
            UPDATE job_runs
            SET cursor = COALESCE($2, cursor),
                chunks_processed = chunks_processed + 1,
                succeeded_count = succeeded_count + $3,
                duplicate_count = duplicate_count + $4,
                skipped_count = skipped_count + $5,
                failed_count = failed_count + $6,
                failures = failures || $7::jsonb,
                lease_expires_at = $8,
                updated_at = $9
            WHERE id = $1 AND status = 'running' AND attempt = $10
            RETURNING cancel_requested
            "#,
        )
        .bind(run_id)
        .bind(&progress.cursor)
        .bind(progress.succeeded)
        .bind(progress.duplicates)
        .bind(progress.skipped)
        .bind(progress.failed)
        .bind(Json(&progress.failures))
        .bind(now + progress.lease)
        .bind(now)
        .bind(attempt)
        .fetch_optional(&self.pool)
        .await?
        .ok_or(LedgerError::LeaseLost { run_id, attempt })?;

        Ok(ProgressAck { cancel_requested })
    }

    async fn complete(&self, run_id: i64, attempt: i32) -> Result<JobRun> {
        self.transition(run_id, attempt, JobRunStatus::Completed, None)
            .await
    }

    async fn fail(&self, run_id: i64, attempt: i32, error: &str) -> Result<JobRun> {
        self.transition(run_id, attempt, JobRunStatus::Failed, Some(error))
            .await
    }

    async fn mark_cancelled(&self, run_id: i64, attempt: i32) -> Result<JobRun> {
        self.transition(run_id, attempt, JobRunStatus::Cancelled, None)
            .await
    }

    async fn request_cancel(&self, run_id: i64) -> Result<JobRun> {
        // 运行中只打标记，由执行者在分块边界停止；失败的运行没有执行者，直接取消
        let sql = format!(
            r#"
            UPDATE job_runs
            SET cancel_requested = CASE WHEN status = 'running' THEN TRUE ELSE cancel_requested END,
                status = CASE WHEN status = 'failed' THEN 'cancelled' ELSE status END,
                completed_at = CASE WHEN status = 'failed' THEN NOW() ELSE completed_at END,
                updated_at = NOW()
            WHERE id = $1
            RETURNING {JOB_RUN_COLUMNS}
            "#
        );
        sqlx::query_as::<_, JobRun>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or(LedgerError::JobRunNotFound(run_id))
    }

    async fn get(&self, run_id: i64) -> Result<Option<JobRun>> {
        let sql = format!("SELECT {JOB_RUN_COLUMNS} FROM job_runs WHERE id = $1");
        let run = sqlx::query_as::<_, JobRun>(&sql)
            .bind(run_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    async fn find(
        &self,
        tenant_id: &str,
        job_kind: JobKind,
        period_key: &str,
    ) -> Result<Option<JobRun>> {
        let sql = format!(
            "SELECT {JOB_RUN_COLUMNS} FROM job_runs WHERE tenant_id = $1 AND job_kind = $2 AND period_key = $3"
        );
        let run = sqlx::query_as::<_, JobRun>(&sql)
            .bind(tenant_id)
            .bind(job_kind)
            .bind(period_key)
            .fetch_optional(&self.pool)
            .await?;
        Ok(run)
    }

    async fn list(&self, filter: &JobRunFilter) -> Result<Vec<JobRun>> {
        let sql = format!(
            r#"
            SELECT {JOB_RUN_COLUMNS}
            FROM job_runs
            WHERE ($1::varchar IS NULL OR tenant_id = $1)
              AND ($2::varchar IS NULL OR job_kind = $2)
              AND ($3::varchar IS NULL OR status = $3)
            ORDER BY started_at DESC, id DESC
            LIMIT $4
            "#
        );
        let runs = sqlx::query_as::<_, JobRun>(&sql)
            .bind(&filter.tenant_id)
            .bind(filter.job_kind)
            .bind(filter.status)
            .bind(filter.effective_limit())
            .fetch_all(&self.pool)
            .await?;
        Ok(runs)
    }
}
