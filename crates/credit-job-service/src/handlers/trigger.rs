//! 人工触发 API
//!
//! 运维通过显式账期或日期补跑漏掉或部分失败的运行；同一账期已完成的运行不会重复执行。
//! 人工触发会恢复此前被取消的运行。

use axum::Json;
use axum::extract::State;
use tracing::instrument;
use validator::Validate;

use crate::dto::{ApiResponse, MonthlyTriggerRequest, ScanTriggerRequest};
use crate::error::ApiError;
use crate::scheduler::{TriggerOrigin, TriggerReport};
use crate::state::AppState;

/// POST /api/triggers/monthly-credits
#[instrument(skip(state))]
pub async fn trigger_monthly_credits(
    State(state): State<AppState>,
    Json(req): Json<MonthlyTriggerRequest>,
) -> Result<Json<ApiResponse<TriggerReport>>, ApiError> {
    req.validate()?;
    let period = req.parsed_period()?;

    let report = state
        .scheduler
        .trigger_monthly_credits(req.tenant_id.as_deref(), period, TriggerOrigin::Manual)
        .await?;

    Ok(Json(ApiResponse::success(report)))
}

/// POST /api/triggers/expiration-scan
#[instrument(skip(state))]
pub async fn trigger_expiration_scan(
    State(state): State<AppState>,
    Json(req): Json<ScanTriggerRequest>,
) -> Result<Json<ApiResponse<TriggerReport>>, ApiError> {
    req.validate()?;
    let date = req.parsed_date()?;

    let report = state
        .scheduler
        .trigger_expiration_scan(req.tenant_id.as_deref(), date, TriggerOrigin::Manual)
        .await?;

    Ok(Json(ApiResponse::success(report)))
}

/// POST /api/triggers/warning-scan
#[instrument(skip(state))]
pub async fn trigger_warning_scan(
    State(state): State<AppState>,
    Json(req): Json<ScanTriggerRequest>,
) -> Result<Json<ApiResponse<TriggerReport>>, ApiError> {
    req.validate()?;
    let date = req.parsed_date()?;

    let report = state
        .scheduler
        .trigger_warning_scan(req.tenant_id.as_deref(), date, TriggerOrigin::Manual)
        .await?;

    Ok(Json(ApiResponse::success(report)))
}
