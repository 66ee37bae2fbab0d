//! 租户仓储（Postgres）
//!
//! 每次调用都直接读库，计划规则不在进程内缓存。按 ID 读取时校验计划配置；
//! 分页列表不校验，由调度器按租户校验，单个租户配置错误不影响其他租户。

use async_trait::async_trait;
use sqlx::PgPool;

use super::traits::TenantRepositoryTrait;
use crate::error::Result;
use crate::models::Tenant;

pub struct TenantRepository {
    pool: PgPool,
}

impl TenantRepository {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TenantRepositoryTrait for TenantRepository {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tenant = sqlx::query_as::<_, Tenant>(
            "SELECT id, name, active, timezone, program, created_at FROM tenants WHERE id = $1",
        )
        .bind(tenant_id)
        .fetch_optional(&self.pool)
        .await?;
        if let Some(tenant) = &tenant {
            tenant.validate_program()?;
        }
        Ok(tenant)
    }

    async fn list_active_page(&self, after: Option<String>, limit: i64) -> Result<Vec<Tenant>> {
        let tenants = sqlx::query_as::<_, Tenant>(
            r#"
            SELECT id, name, active, timezone, program, created_at
            FROM tenants
            WHERE active AND ($1::varchar IS NULL OR id > $1)
            ORDER BY id
            LIMIT $2
            "#,
        )
        .bind(after)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(tenants)
    }
}
