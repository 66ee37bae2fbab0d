//! 记账服务
//!
//! 批处理任务与 webhook 处理器共用的唯一写入口。负责：
//! - 请求结构校验（金额符号、幂等键、核销范围）
//! - 调用仓储完成事务性写入
//! - 记录指标与结构化日志
//!
//! 重复投递返回 `PostOutcome::Duplicate`，调用方据此区分新写入与空操作。

use std::sync::Arc;
use std::time::Instant;

use credit_shared::observability::metrics;
use serde::Serialize;
use tracing::{debug, info, instrument, warn};

use crate::error::Result;
use crate::models::{LedgerEntry, PostOutcome, PostRequest};
use crate::posting::validate_request;
use crate::repository::LedgerRepositoryTrait;

/// 余额查询结果
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceView {
    pub tenant_id: String,
    pub member_id: String,
    pub balance_cents: i64,
    pub recent_entries: Vec<LedgerEntry>,
}

/// 记账服务
#[derive(Clone)]
pub struct PostingService {
    ledger: Arc<dyn LedgerRepositoryTrait>,
}

impl PostingService {
    pub fn new(ledger: Arc<dyn LedgerRepositoryTrait>) -> Self {
        Self { ledger }
    }

    pub fn repository(&self) -> &Arc<dyn LedgerRepositoryTrait> {
        &self.ledger
    }

    /// 幂等记账
    #[instrument(
        skip(self, req),
        fields(
            tenant_id = %req.tenant_id,
            member_id = %req.member_id,
            kind = %req.kind,
            idempotency_key = %req.idempotency_key
        )
    )]
    pub async fn post(&self, req: &PostRequest) -> Result<PostOutcome> {
        let started = Instant::now();

        if let Err(e) = validate_request(req) {
            metrics::record_ledger_post(req.kind.as_str(), "rejected", 0.0);
            warn!(error = %e, amount_cents = req.amount_cents, "记账请求校验失败");
            return Err(e);
        }

        let result = self.ledger.post(req).await;
        let elapsed = started.elapsed().as_secs_f64();

        match &result {
            Ok(PostOutcome::Posted(entry)) => {
                metrics::record_ledger_post(req.kind.as_str(), "posted", elapsed);
                info!(
                    entry_id = entry.id,
                    amount_cents = entry.amount_cents,
                    balance_after_cents = entry.balance_after_cents,
                    "记账成功"
                );
            }
            Ok(PostOutcome::Duplicate(entry)) => {
                metrics::record_ledger_post(req.kind.as_str(), "duplicate", elapsed);
                debug!(entry_id = entry.id, "幂等键已存在，返回已有记录");
            }
            Err(e) if e.is_retryable() => {
                metrics::record_ledger_post(req.kind.as_str(), "error", elapsed);
                warn!(error = %e, "记账暂时失败，可重试");
            }
            Err(e) => {
                metrics::record_ledger_post(req.kind.as_str(), "rejected", elapsed);
                warn!(error = %e, code = e.code(), "记账被拒绝");
            }
        }

        result
    }

    /// 当前余额与最近流水
    pub async fn balance(
        &self,
        tenant_id: &str,
        member_id: &str,
        recent_limit: i64,
    ) -> Result<BalanceView> {
        let balance_cents = self.ledger.get_balance(tenant_id, member_id).await?;
        let recent_entries = self
            .ledger
            .list_entries(tenant_id, member_id, recent_limit)
            .await?;

        Ok(BalanceView {
            tenant_id: tenant_id.to_string(),
            member_id: member_id.to_string(),
            balance_cents,
            recent_entries,
        })
    }
}
