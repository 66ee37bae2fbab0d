//! 仓储 Trait 定义
//!
//! 服务层与批处理任务只依赖这些抽象；Postgres 与内存实现各自满足同一契约。

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{
    BeginOptions, ChunkProgress, ExpirationOffset, ExpiringEntry, ExpiringQuery, JobClaim,
    JobKind, JobRun, JobRunFilter, LedgerEntry, Member, MemberProfileUpdate, NewMember,
    PostOutcome, PostRequest, ProgressAck, Tenant,
};

/// 账本仓储接口
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait LedgerRepositoryTrait: Send + Sync {
    /// 幂等记账
    ///
    /// 同一幂等键重复调用返回已存在的记录；否则在单个事务内锁定会员、
    /// 计算余额快照、写入流水（及核销关系）并更新会员余额。
    async fn post(&self, req: &PostRequest) -> Result<PostOutcome>;

    async fn get_balance(&self, tenant_id: &str, member_id: &str) -> Result<i64>;

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>>;

    /// 会员流水，按 created_at 升序，返回最近 limit 条
    async fn list_entries(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>>;

    /// 尚未被核销的到期入账记录
    async fn list_expiring_entries(&self, query: &ExpiringQuery) -> Result<Vec<ExpiringEntry>>;

    /// 标记已发送预警，返回本次新标记的记录 ID
    async fn claim_expiry_warnings(&self, tenant_id: &str, entry_ids: &[i64]) -> Result<Vec<i64>>;

    async fn list_offsets(&self, expiration_entry_id: i64) -> Result<Vec<ExpirationOffset>>;
}

/// 会员仓储接口
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait MemberRepositoryTrait: Send + Sync {
    async fn get(&self, tenant_id: &str, member_id: &str) -> Result<Option<Member>>;

    async fn find_by_customer_ref(
        &self,
        tenant_id: &str,
        customer_ref: &str,
    ) -> Result<Option<Member>>;

    /// 按顾客引用注册会员，已存在时返回现有记录；第二个值表示是否新建
    async fn upsert_by_customer_ref(&self, new_member: &NewMember) -> Result<(Member, bool)>;

    async fn update_profile(
        &self,
        tenant_id: &str,
        member_id: &str,
        update: &MemberProfileUpdate,
    ) -> Result<Member>;

    async fn touch_activity(&self, tenant_id: &str, member_id: &str) -> Result<()>;

    /// 按 ID 升序分页列出 active 会员
    async fn list_active_page(
        &self,
        tenant_id: &str,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<Member>>;
}

/// 租户仓储接口
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait TenantRepositoryTrait: Send + Sync {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>>;

    /// 按 ID 升序分页列出 active 租户
    async fn list_active_page(&self, after: Option<String>, limit: i64) -> Result<Vec<Tenant>>;
}

/// 任务运行记录仓储接口
#[cfg_attr(any(test, feature = "mocks"), mockall::automock)]
#[async_trait]
pub trait JobRunRepositoryTrait: Send + Sync {
    /// 认领 (租户, 任务类型, 账期) 的执行权
    async fn begin(
        &self,
        tenant_id: &str,
        job_kind: JobKind,
        period_key: &str,
        options: BeginOptions,
    ) -> Result<JobClaim>;

    /// 保存分块进度并续约，返回是否已被请求取消
    ///
    /// 以下写入都以认领时的 `attempt` 为栅栏：运行已被其他执行者恢复或已结束时
    /// 返回 `LeaseLost`，不做任何修改。
    async fn save_progress(
        &self,
        run_id: i64,
        attempt: i32,
        progress: &ChunkProgress,
    ) -> Result<ProgressAck>;

    async fn complete(&self, run_id: i64, attempt: i32) -> Result<JobRun>;

    async fn fail(&self, run_id: i64, attempt: i32, error: &str) -> Result<JobRun>;

    async fn mark_cancelled(&self, run_id: i64, attempt: i32) -> Result<JobRun>;

    /// 运维请求取消；运行中的任务在当前分块结束后停止
    async fn request_cancel(&self, run_id: i64) -> Result<JobRun>;

    async fn get(&self, run_id: i64) -> Result<Option<JobRun>>;

    async fn find(
        &self,
        tenant_id: &str,
        job_kind: JobKind,
        period_key: &str,
    ) -> Result<Option<JobRun>>;

    async fn list(&self, filter: &JobRunFilter) -> Result<Vec<JobRun>>;
}
