//! 会员余额查询

use axum::Json;
use axum::extract::{Path, Query, State};
use credit_ledger::BalanceView;
use tracing::instrument;
use validator::Validate;

use crate::dto::{ApiResponse, BalanceQuery};
use crate::error::ApiError;
use crate::state::AppState;

/// GET /api/tenants/{tenant_id}/members/{member_id}/balance
#[instrument(skip(state))]
pub async fn get_member_balance(
    State(state): State<AppState>,
    Path((tenant_id, member_id)): Path<(String, String)>,
    Query(query): Query<BalanceQuery>,
) -> Result<Json<ApiResponse<BalanceView>>, ApiError> {
    query.validate()?;

    let view = state
        .posting
        .balance(&tenant_id, &member_id, query.effective_limit())
        .await?;

    Ok(Json(ApiResponse::success(view)))
}
