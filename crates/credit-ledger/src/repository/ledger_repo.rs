//! 账本仓储（Postgres）
//!
//! 记账在单个事务内完成：`SELECT ... FOR UPDATE` 锁定会员行实现按会员串行化，
//! 幂等键上的唯一约束兜底并发重复写入。

use async_trait::async_trait;
use chrono::Utc;
use credit_shared::error::is_unique_violation;
use sqlx::{PgConnection, PgPool};
use tracing::{debug, warn};

use super::traits::LedgerRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{
    ExpirationOffset, ExpiringEntry, ExpiringQuery, LedgerEntry, PostOutcome, PostRequest,
    attribute_fifo,
};
use crate::posting::plan_posting;

const ENTRY_COLUMNS: &str = "id, tenant_id, member_id, amount_cents, kind, created_at, expires_at, \
     balance_after_cents, idempotency_key, memo";

/// 账本仓储
pub struct LedgerRepository {
    pool: PgPool,
}

impl LedgerRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// 在事务中按幂等键查询
    async fn find_by_key_in(conn: &mut PgConnection, key: &str) -> Result<Option<LedgerEntry>> {
        let sql = format!("SELECT {ENTRY_COLUMNS} FROM ledger_entries WHERE idempotency_key = $1");
        let entry = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(key)
            .fetch_optional(conn)
            .await?;
        Ok(entry)
    }

    /// 在事务中查询仍未核销的来源入账，按 FIFO 排序
    async fn unsettled_sources_in(
        conn: &mut PgConnection,
        req: &PostRequest,
    ) -> Result<Vec<(i64, i64)>> {
        let rows = sqlx::query_as::<_, (i64, i64)>(
            r#"
            SELECT e.id, e.amount_cents
            FROM ledger_entries e
            WHERE e.id = ANY($1)
              AND e.member_id = $2
              AND e.tenant_id = $3
              AND e.amount_cents > 0
              AND e.expires_at IS NOT NULL
              AND NOT EXISTS (
                  SELECT 1 FROM ledger_expiration_offsets o WHERE o.source_entry_id = e.id
              )
            ORDER BY e.expires_at, e.created_at, e.id
            "#,
        )
        .bind(&req.settles)
        .bind(&req.member_id)
        .bind(&req.tenant_id)
        .fetch_all(conn)
        .await?;
        Ok(rows)
    }

    async fn post_in_tx(&self, req: &PostRequest) -> Result<PostOutcome> {
        let mut tx = self.pool.begin().await?;

        let locked = sqlx::query_as::<_, (String, i64)>(
            "SELECT tenant_id, balance_cents FROM members WHERE id = $1 FOR UPDATE",
        )
        .bind(&req.member_id)
        .fetch_optional(&mut *tx)
        .await?;

        let (tenant_id, balance) = locked.ok_or_else(|| LedgerError::UnknownMember {
            tenant_id: req.tenant_id.clone(),
            member_id: req.member_id.clone(),
        })?;
        if tenant_id != req.tenant_id {
            return Err(LedgerError::TenantMismatch {
                member_id: req.member_id.clone(),
                requested: req.tenant_id.clone(),
                actual: tenant_id,
            });
        }

        // 持锁后再次检查，覆盖同一会员上的并发重复投递
        if let Some(existing) = Self::find_by_key_in(&mut tx, &req.idempotency_key).await? {
            return Ok(PostOutcome::Duplicate(existing));
        }

        let (amount, sources) = if req.settles.is_empty() {
            (req.amount_cents, Vec::new())
        } else {
            let sources = Self::unsettled_sources_in(&mut tx, req).await?;
            if sources.is_empty() {
                return Err(LedgerError::AlreadySettled {
                    member_id: req.member_id.clone(),
                });
            }
            let total: i64 = sources.iter().map(|(_, amount)| amount).sum();
            (-total, sources)
        };

        let plan = plan_posting(balance, req, amount)?;
        let now = Utc::now();

        let sql = format!(
            r#"
            INSERT INTO ledger_entries
                (tenant_id, member_id, amount_cents, kind, created_at, expires_at,
                 balance_after_cents, idempotency_key, memo)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            RETURNING {ENTRY_COLUMNS}
            "#
        );
        let entry = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(&req.tenant_id)
            .bind(&req.member_id)
            .bind(plan.amount_cents)
            .bind(req.kind)
            .bind(now)
            .bind(plan.expires_at)
            .bind(plan.balance_after_cents)
            .bind(&req.idempotency_key)
            .bind(&req.memo)
            .fetch_one(&mut *tx)
            .await?;

        for (source_id, expired_cents) in attribute_fifo(&sources, -plan.amount_cents) {
            sqlx::query(
                r#"
                INSERT INTO ledger_expiration_offsets (expiration_entry_id, source_entry_id, expired_cents)
                VALUES ($1, $2, $3)
                "#,
            )
            .bind(entry.id)
            .bind(source_id)
            .bind(expired_cents)
            .execute(&mut *tx)
            .await?;
        }

        sqlx::query(
            r#"
            UPDATE members
            SET balance_cents = $2, version = version + 1, updated_at = $3
            WHERE id = $1
            "#,
        )
        .bind(&req.member_id)
        .bind(plan.balance_after_cents)
        .bind(now)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        debug!(
            entry_id = entry.id,
            member_id = %entry.member_id,
            amount_cents = entry.amount_cents,
            balance_after_cents = entry.balance_after_cents,
            "账本记录已写入"
        );

        Ok(PostOutcome::Posted(entry))
    }
}

#[async_trait]
impl LedgerRepositoryTrait for LedgerRepository {
    async fn post(&self, req: &PostRequest) -> Result<PostOutcome> {
        if let Some(existing) = self.find_by_idempotency_key(&req.idempotency_key).await? {
            return Ok(PostOutcome::Duplicate(existing));
        }

        match self.post_in_tx(req).await {
            Err(LedgerError::Database(e)) if is_unique_violation(&e) => {
                warn!(
                    idempotency_key = %req.idempotency_key,
                    "并发写入同一幂等键，读取已提交的记录"
                );
                match self.find_by_idempotency_key(&req.idempotency_key).await? {
                    Some(existing) => Ok(PostOutcome::Duplicate(existing)),
                    None => Err(LedgerError::Database(e)),
                }
            }
            other => other,
        }
    }

    async fn get_balance(&self, tenant_id: &str, member_id: &str) -> Result<i64> {
        let row = sqlx::query_as::<_, (String, i64)>(
            "SELECT tenant_id, balance_cents FROM members WHERE id = $1",
        )
        .bind(member_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some((owner, balance)) if owner == tenant_id => Ok(balance),
            Some((owner, _)) => Err(LedgerError::TenantMismatch {
                member_id: member_id.to_string(),
                requested: tenant_id.to_string(),
                actual: owner,
            }),
            None => Err(LedgerError::UnknownMember {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            }),
        }
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>> {
        let mut conn = self.pool.acquire().await?;
        Self::find_by_key_in(&mut conn, key).await
    }

    async fn list_entries(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let sql = format!(
            r#"
            SELECT {ENTRY_COLUMNS} FROM (
                SELECT {ENTRY_COLUMNS}
                FROM ledger_entries
                WHERE tenant_id = $1 AND member_id = $2
                ORDER BY created_at DESC, id DESC
                LIMIT $3
            ) recent
            ORDER BY created_at, id
            "#
        );
        let entries = sqlx::query_as::<_, LedgerEntry>(&sql)
            .bind(tenant_id)
            .bind(member_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(entries)
    }

    async fn list_expiring_entries(&self, query: &ExpiringQuery) -> Result<Vec<ExpiringEntry>> {
        let entries = sqlx::query_as::<_, ExpiringEntry>(
            r#"
            WITH candidates AS (
                SELECT e.id AS entry_id, e.tenant_id, e.member_id, e.amount_cents,
                       e.created_at, e.expires_at
                FROM ledger_entries e
                WHERE e.tenant_id = $1
                  AND e.amount_cents > 0
                  AND e.expires_at IS NOT NULL
                  AND e.expires_at < $2
                  AND ($3::timestamptz IS NULL OR e.expires_at >= $3)
                  AND ($4::varchar IS NULL OR e.member_id > $4)
                  AND NOT EXISTS (
                      SELECT 1 FROM ledger_expiration_offsets o WHERE o.source_entry_id = e.id
                  )
                  AND (NOT $6 OR NOT EXISTS (
                      SELECT 1 FROM ledger_expiry_warnings w WHERE w.entry_id = e.id
                  ))
            ),
            page AS (
                SELECT DISTINCT member_id FROM candidates ORDER BY member_id LIMIT $5
            )
            SELECT c.entry_id, c.tenant_id, c.member_id, c.amount_cents, c.created_at, c.expires_at
            FROM candidates c
            JOIN page p ON p.member_id = c.member_id
            ORDER BY c.member_id, c.expires_at, c.created_at, c.entry_id
            "#,
        )
        .bind(&query.tenant_id)
        .bind(query.expires_before)
        .bind(query.expires_from)
        .bind(&query.after_member)
        .bind(query.member_limit)
        .bind(query.exclude_warned)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn claim_expiry_warnings(&self, tenant_id: &str, entry_ids: &[i64]) -> Result<Vec<i64>> {
        if entry_ids.is_empty() {
            return Ok(Vec::new());
        }

        let claimed = sqlx::query_scalar::<_, i64>(
            r#"
            INSERT INTO ledger_expiry_warnings (entry_id, tenant_id, warned_at)
            SELECT e.id, e.tenant_id, NOW()
            FROM ledger_entries e
            WHERE e.id = ANY($1) AND e.tenant_id = $2
            ON CONFLICT (entry_id) DO NOTHING
            RETURNING entry_id
            "#,
        )
        .bind(entry_ids)
        .bind(tenant_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(claimed)
    }

    async fn list_offsets(&self, expiration_entry_id: i64) -> Result<Vec<ExpirationOffset>> {
        let offsets = sqlx::query_as::<_, ExpirationOffset>(
            r#"
            SELECT o.expiration_entry_id, o.source_entry_id, o.expired_cents
            FROM ledger_expiration_offsets o
            JOIN ledger_entries e ON e.id = o.source_entry_id
            WHERE o.expiration_entry_id = $1
            ORDER BY e.expires_at, e.created_at, e.id
            "#,
        )
        .bind(expiration_entry_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(offsets)
    }
}
