//! 会员仓储（Postgres）

use async_trait::async_trait;
use chrono::Utc;
use sqlx::PgPool;
use uuid::Uuid;

use super::traits::MemberRepositoryTrait;
use crate::error::{LedgerError, Result};
use crate::models::{Member, MemberProfileUpdate, MemberStatus, NewMember};

const MEMBER_COLUMNS: &str = "id, tenant_id, customer_ref, email, tier_id, status, balance_cents, \
     version, last_activity_at, created_at, updated_at";

pub struct MemberRepository {
    pool: PgPool,
}

impl MemberRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MemberRepositoryTrait for MemberRepository {
    async fn get(&self, tenant_id: &str, member_id: &str) -> Result<Option<Member>> {
        let sql = format!("SELECT {MEMBER_COLUMNS} FROM members WHERE id = $1 AND tenant_id = $2");
        let member = sqlx::query_as::<_, Member>(&sql)
            .bind(member_id)
            .bind(tenant_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(member)
    }

    async fn find_by_customer_ref(
        &self,
        tenant_id: &str,
        customer_ref: &str,
    ) -> Result<Option<Member>> {
        let sql = format!(
            "SELECT {MEMBER_COLUMNS} FROM members WHERE tenant_id = $1 AND customer_ref = $2"
        );
        let member = sqlx::query_as::<_, Member>(&sql)
            .bind(tenant_id)
            .bind(customer_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(member)
    }

    async fn upsert_by_customer_ref(&self, new_member: &NewMember) -> Result<(Member, bool)> {
        let now = Utc::now();
        let sql = format!(
            r#"
            INSERT INTO members
                (id, tenant_id, customer_ref, email, tier_id, status, balance_cents, version,
                 created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, 0, 0, $7, $7)
            ON CONFLICT (tenant_id, customer_ref) DO NOTHING
            RETURNING {MEMBER_COLUMNS}
            "#
        );
        let inserted = sqlx::query_as::<_, Member>(&sql)
            .bind(Uuid::now_v7().to_string())
            .bind(&new_member.tenant_id)
            .bind(&new_member.customer_ref)
            .bind(&new_member.email)
            .bind(&new_member.tier_id)
            .bind(MemberStatus::Active)
            .bind(now)
            .fetch_optional(&self.pool)
            .await?;

        if let Some(member) = inserted {
            return Ok((member, true));
        }

        let existing = self
            .find_by_customer_ref(&new_member.tenant_id, &new_member.customer_ref)
            .await?
            .ok_or_else(|| {
                LedgerError::Internal(format!(
                    "会员插入冲突但未找到现有记录: customer_ref={}",
                    new_member.customer_ref
                ))
            })?;
        Ok((existing, false))
    }

    async fn update_profile(
        &self,
        tenant_id: &str,
        member_id: &str,
        update: &MemberProfileUpdate,
    ) -> Result<Member> {
        let sql = format!(
            r#"
            UPDATE members
            SET email = COALESCE($3, email),
                tier_id = COALESCE($4, tier_id),
                updated_at = NOW()
            WHERE id = $1 AND tenant_id = $2
            RETURNING {MEMBER_COLUMNS}
            "#
        );
        sqlx::query_as::<_, Member>(&sql)
            .bind(member_id)
            .bind(tenant_id)
            .bind(&update.email)
            .bind(&update.tier_id)
            .fetch_optional(&self.pool)
            .await?
            .ok_or_else(|| LedgerError::UnknownMember {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            })
    }

    async fn touch_activity(&self, tenant_id: &str, member_id: &str) -> Result<()> {
        sqlx::query("UPDATE members SET last_activity_at = NOW() WHERE id = $1 AND tenant_id = $2")
            .bind(member_id)
            .bind(tenant_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_active_page(
        &self,
        tenant_id: &str,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<Member>> {
        let sql = format!(
            r#"
            SELECT {MEMBER_COLUMNS}
            FROM members
            WHERE tenant_id = $1
              AND status = 'active'
              AND ($2::varchar IS NULL OR id > $2)
            ORDER BY id
            LIMIT $3
            "#
        );
        let members = sqlx::query_as::<_, Member>(&sql)
            .bind(tenant_id)
            .bind(after)
            .bind(limit)
            .fetch_all(&self.pool)
            .await?;
        Ok(members)
    }
}
