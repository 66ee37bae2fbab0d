//! 响应 DTO 定义

use chrono::{DateTime, Utc};
use credit_ledger::{JobKind, JobRun, JobRunFailure, JobRunStatus};
use serde::Serialize;

/// API 统一响应
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    pub success: bool,
    pub code: String,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<T>,
}

impl<T> ApiResponse<T> {
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: "操作成功".to_string(),
            data: Some(data),
        }
    }

    pub fn success_with_message(data: T, message: impl Into<String>) -> Self {
        Self {
            success: true,
            code: "SUCCESS".to_string(),
            message: message.into(),
            data: Some(data),
        }
    }
}

/// 运行记录摘要（列表用）
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunSummaryDto {
    pub id: i64,
    pub tenant_id: String,
    pub job_kind: JobKind,
    pub period_key: String,
    pub status: JobRunStatus,
    pub succeeded_count: i64,
    pub duplicate_count: i64,
    pub skipped_count: i64,
    pub failed_count: i64,
    pub chunks_processed: i64,
    pub cancel_requested: bool,
    pub attempt: i32,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl From<&JobRun> for JobRunSummaryDto {
    fn from(run: &JobRun) -> Self {
        Self {
            id: run.id,
            tenant_id: run.tenant_id.clone(),
            job_kind: run.job_kind,
            period_key: run.period_key.clone(),
            status: run.status,
            succeeded_count: run.succeeded_count,
            duplicate_count: run.duplicate_count,
            skipped_count: run.skipped_count,
            failed_count: run.failed_count,
            chunks_processed: run.chunks_processed,
            cancel_requested: run.cancel_requested,
            attempt: run.attempt,
            started_at: run.started_at,
            completed_at: run.completed_at,
            updated_at: run.updated_at,
        }
    }
}

/// 运行记录详情，含游标与失败列表
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct JobRunDetailDto {
    #[serde(flatten)]
    pub summary: JobRunSummaryDto,
    pub cursor: Option<String>,
    pub last_error: Option<String>,
    pub lease_expires_at: Option<DateTime<Utc>>,
    pub failures: Vec<JobRunFailure>,
}

impl From<JobRun> for JobRunDetailDto {
    fn from(run: JobRun) -> Self {
        Self {
            summary: JobRunSummaryDto::from(&run),
            cursor: run.cursor,
            last_error: run.last_error,
            lease_expires_at: run.lease_expires_at,
            failures: run.failures,
        }
    }
}
