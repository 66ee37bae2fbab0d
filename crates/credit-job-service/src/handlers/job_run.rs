//! 运行记录 API
//!
//! 运维面板读取运行状态与失败列表，并可请求取消正在运行的任务。

use axum::Json;
use axum::extract::{Path, Query, State};
use credit_ledger::JobRunFilter;
use tracing::{info, instrument};
use validator::Validate;

use crate::dto::{ApiResponse, JobRunDetailDto, JobRunQuery, JobRunSummaryDto};
use crate::error::ApiError;
use crate::state::AppState;

/// 查询运行记录列表
///
/// GET /api/job-runs?tenantId&jobKind&status&limit
#[instrument(skip(state))]
pub async fn list_job_runs(
    State(state): State<AppState>,
    Query(query): Query<JobRunQuery>,
) -> Result<Json<ApiResponse<Vec<JobRunSummaryDto>>>, ApiError> {
    query.validate()?;

    let filter = JobRunFilter::from(query);
    let runs = state.job_runs.list(&filter).await?;
    let items = runs.iter().map(JobRunSummaryDto::from).collect();

    Ok(Json(ApiResponse::success(items)))
}

/// 查询运行记录详情（含游标与失败列表）
///
/// GET /api/job-runs/{id}
#[instrument(skip(state))]
pub async fn get_job_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<JobRunDetailDto>>, ApiError> {
    let run = state
        .job_runs
        .get(id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("job run {id}")))?;

    Ok(Json(ApiResponse::success(JobRunDetailDto::from(run))))
}

/// 请求取消
///
/// POST /api/job-runs/{id}/cancel
///
/// 运行中的任务在当前分块结束并保存游标后停止；已失败的运行直接转为已取消。
#[instrument(skip(state))]
pub async fn cancel_job_run(
    State(state): State<AppState>,
    Path(id): Path<i64>,
) -> Result<Json<ApiResponse<JobRunSummaryDto>>, ApiError> {
    let run = state.job_runs.request_cancel(id).await?;

    info!(
        run_id = run.id,
        tenant_id = %run.tenant_id,
        job_kind = %run.job_kind,
        status = %run.status,
        "已请求取消运行"
    );

    Ok(Json(ApiResponse::success_with_message(
        JobRunSummaryDto::from(&run),
        "已请求取消",
    )))
}
