//! 内存仓储实现
//!
//! 与 Postgres 实现遵循同一契约，用于测试与本地运行。
//! 账本状态由单把互斥锁保护，锁内不跨越 await，按会员串行化自然成立。

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use super::traits::{
    JobRunRepositoryTrait, LedgerRepositoryTrait, MemberRepositoryTrait, TenantRepositoryTrait,
};
use crate::error::{LedgerError, Result};
use crate::models::{
    BeginOptions, ChunkProgress, ClaimDecision, ExpirationOffset, ExpiringEntry, ExpiringQuery,
    JobClaim, JobKind, JobRun, JobRunFilter, JobRunStatus, LedgerEntry, Member,
    MemberProfileUpdate, MemberStatus, NewMember, PostOutcome, PostRequest, ProgressAck, Tenant,
    attribute_fifo,
};
use crate::posting::plan_posting;

#[derive(Default)]
struct LedgerState {
    members: BTreeMap<String, Member>,
    entries: Vec<LedgerEntry>,
    by_key: HashMap<String, usize>,
    offsets: Vec<ExpirationOffset>,
    settled: HashSet<i64>,
    warned: HashMap<i64, DateTime<Utc>>,
}

impl LedgerState {
    fn entry_by_key(&self, key: &str) -> Option<&LedgerEntry> {
        self.by_key.get(key).and_then(|&i| self.entries.get(i))
    }

    fn post(&mut self, req: &PostRequest) -> Result<PostOutcome> {
        if let Some(existing) = self.entry_by_key(&req.idempotency_key) {
            return Ok(PostOutcome::Duplicate(existing.clone()));
        }

        let member = self
            .members
            .get(&req.member_id)
            .ok_or_else(|| LedgerError::UnknownMember {
                tenant_id: req.tenant_id.clone(),
                member_id: req.member_id.clone(),
            })?;
        if member.tenant_id != req.tenant_id {
            return Err(LedgerError::TenantMismatch {
                member_id: req.member_id.clone(),
                requested: req.tenant_id.clone(),
                actual: member.tenant_id.clone(),
            });
        }
        let balance = member.balance_cents;

        let (amount, sources) = if req.settles.is_empty() {
            (req.amount_cents, Vec::new())
        } else {
            let mut candidates: Vec<&LedgerEntry> = self
                .entries
                .iter()
                .filter(|e| {
                    req.settles.contains(&e.id)
                        && e.member_id == req.member_id
                        && e.tenant_id == req.tenant_id
                        && e.amount_cents > 0
                        && e.expires_at.is_some()
                        && !self.settled.contains(&e.id)
                })
                .collect();
            candidates.sort_by_key(|e| (e.expires_at, e.created_at, e.id));
            let sources: Vec<(i64, i64)> =
                candidates.iter().map(|e| (e.id, e.amount_cents)).collect();
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
        let entry = LedgerEntry {
            id: self.entries.len() as i64 + 1,
            tenant_id: req.tenant_id.clone(),
            member_id: req.member_id.clone(),
            amount_cents: plan.amount_cents,
            kind: req.kind,
            created_at: now,
            expires_at: plan.expires_at,
            balance_after_cents: plan.balance_after_cents,
            idempotency_key: req.idempotency_key.clone(),
            memo: req.memo.clone(),
        };

        for (source_id, expired_cents) in attribute_fifo(&sources, -plan.amount_cents) {
            self.settled.insert(source_id);
            self.offsets.push(ExpirationOffset {
                expiration_entry_id: entry.id,
                source_entry_id: source_id,
                expired_cents,
            });
        }

        if let Some(member) = self.members.get_mut(&req.member_id) {
            member.balance_cents = plan.balance_after_cents;
            member.version += 1;
            member.updated_at = now;
        }

        self.by_key
            .insert(entry.idempotency_key.clone(), self.entries.len());
        self.entries.push(entry.clone());
        Ok(PostOutcome::Posted(entry))
    }
}

/// 注入的记账故障：对指定会员的前 N 次记账返回超时
#[derive(Default)]
struct FaultPlan {
    post_failures: HashMap<String, u32>,
}

/// 内存仓储，同时实现账本、会员、租户与任务运行记录四个仓储接口
#[derive(Default)]
pub struct InMemoryStore {
    tenants: DashMap<String, Tenant>,
    ledger: Mutex<LedgerState>,
    job_runs: Mutex<Vec<JobRun>>,
    faults: Mutex<FaultPlan>,
    post_calls: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert_tenant(&self, tenant: Tenant) {
        self.tenants.insert(tenant.id.clone(), tenant);
    }

    pub fn insert_member(&self, member: Member) {
        self.ledger.lock().members.insert(member.id.clone(), member);
    }

    /// 以给定 ID 创建余额为 0 的 active 会员
    pub fn add_member(&self, tenant_id: &str, member_id: &str, tier_id: Option<&str>) -> Member {
        let now = Utc::now();
        let member = Member {
            id: member_id.to_string(),
            tenant_id: tenant_id.to_string(),
            customer_ref: format!("cust-{member_id}"),
            email: None,
            tier_id: tier_id.map(str::to_string),
            status: MemberStatus::Active,
            balance_cents: 0,
            version: 0,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        };
        self.insert_member(member.clone());
        member
    }

    pub fn set_member_status(&self, member_id: &str, status: MemberStatus) {
        if let Some(m) = self.ledger.lock().members.get_mut(member_id) {
            m.status = status;
        }
    }

    /// 让指定会员接下来的 `count` 次记账以可重试的超时失败
    pub fn fail_next_posts(&self, member_id: &str, count: u32) {
        self.faults
            .lock()
            .post_failures
            .insert(member_id.to_string(), count);
    }

    /// 累计记账调用次数（含重复与失败）
    pub fn post_calls(&self) -> u64 {
        self.post_calls.load(Ordering::SeqCst)
    }

    pub fn member(&self, member_id: &str) -> Option<Member> {
        self.ledger.lock().members.get(member_id).cloned()
    }

    /// 会员全部流水，按写入顺序
    pub fn entries_for(&self, member_id: &str) -> Vec<LedgerEntry> {
        self.ledger
            .lock()
            .entries
            .iter()
            .filter(|e| e.member_id == member_id)
            .cloned()
            .collect()
    }

    pub fn all_entries(&self) -> Vec<LedgerEntry> {
        self.ledger.lock().entries.clone()
    }

    /// 人为让运行记录的租约过期，模拟执行者崩溃
    pub fn expire_lease(&self, run_id: i64) {
        if let Some(run) = self.job_runs.lock().iter_mut().find(|r| r.id == run_id) {
            run.lease_expires_at = Some(Utc::now() - chrono::Duration::seconds(1));
        }
    }

    fn take_injected_failure(&self, member_id: &str) -> bool {
        let mut faults = self.faults.lock();
        match faults.post_failures.get_mut(member_id) {
            Some(n) if *n > 0 => {
                *n -= 1;
                true
            }
            _ => false,
        }
    }

    fn update_run<F>(&self, run_id: i64, f: F) -> Result<JobRun>
    where
        F: FnOnce(&mut JobRun),
    {
        let mut runs = self.job_runs.lock();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(LedgerError::JobRunNotFound(run_id))?;
        f(run);
        run.updated_at = Utc::now();
        Ok(run.clone())
    }

    /// 仅当运行仍由 `attempt` 持有时修改
    fn update_held_run<F, T>(&self, run_id: i64, attempt: i32, f: F) -> Result<T>
    where
        F: FnOnce(&mut JobRun) -> T,
    {
        let mut runs = self.job_runs.lock();
        let run = runs
            .iter_mut()
            .find(|r| r.id == run_id)
            .ok_or(LedgerError::JobRunNotFound(run_id))?;
        if run.status != JobRunStatus::Running || run.attempt != attempt {
            return Err(LedgerError::LeaseLost { run_id, attempt });
        }
        run.updated_at = Utc::now();
        Ok(f(run))
    }
}

#[async_trait]
impl LedgerRepositoryTrait for InMemoryStore {
    async fn post(&self, req: &PostRequest) -> Result<PostOutcome> {
        self.post_calls.fetch_add(1, Ordering::SeqCst);
        if self.take_injected_failure(&req.member_id) {
            return Err(LedgerError::Timeout("ledger.post".to_string()));
        }
        self.ledger.lock().post(req)
    }

    async fn get_balance(&self, tenant_id: &str, member_id: &str) -> Result<i64> {
        let state = self.ledger.lock();
        match state.members.get(member_id) {
            Some(m) if m.tenant_id == tenant_id => Ok(m.balance_cents),
            Some(m) => Err(LedgerError::TenantMismatch {
                member_id: member_id.to_string(),
                requested: tenant_id.to_string(),
                actual: m.tenant_id.clone(),
            }),
            None => Err(LedgerError::UnknownMember {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            }),
        }
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<LedgerEntry>> {
        Ok(self.ledger.lock().entry_by_key(key).cloned())
    }

    async fn list_entries(
        &self,
        tenant_id: &str,
        member_id: &str,
        limit: i64,
    ) -> Result<Vec<LedgerEntry>> {
        let state = self.ledger.lock();
        let mine: Vec<LedgerEntry> = state
            .entries
            .iter()
            .filter(|e| e.tenant_id == tenant_id && e.member_id == member_id)
            .cloned()
            .collect();
        let skip = mine.len().saturating_sub(limit.max(0) as usize);
        Ok(mine.into_iter().skip(skip).collect())
    }

    async fn list_expiring_entries(&self, query: &ExpiringQuery) -> Result<Vec<ExpiringEntry>> {
        let state = self.ledger.lock();
        let mut by_member: BTreeMap<&str, Vec<ExpiringEntry>> = BTreeMap::new();

        for e in &state.entries {
            let Some(expires_at) = e.expires_at else {
                continue;
            };
            let in_range = expires_at < query.expires_before
                && query.expires_from.is_none_or(|from| expires_at >= from);
            let after_cursor = query
                .after_member
                .as_deref()
                .is_none_or(|after| e.member_id.as_str() > after);
            if e.tenant_id != query.tenant_id
                || e.amount_cents <= 0
                || !in_range
                || !after_cursor
                || state.settled.contains(&e.id)
                || (query.exclude_warned && state.warned.contains_key(&e.id))
            {
                continue;
            }
            by_member
                .entry(e.member_id.as_str())
                .or_default()
                .push(ExpiringEntry {
                    entry_id: e.id,
                    tenant_id: e.tenant_id.clone(),
                    member_id: e.member_id.clone(),
                    amount_cents: e.amount_cents,
                    created_at: e.created_at,
                    expires_at,
                });
        }

        Ok(by_member
            .into_values()
            .take(query.member_limit.max(0) as usize)
            .flat_map(|mut entries| {
                entries.sort_by_key(|e| (e.expires_at, e.created_at, e.entry_id));
                entries
            })
            .collect())
    }

    async fn claim_expiry_warnings(&self, tenant_id: &str, entry_ids: &[i64]) -> Result<Vec<i64>> {
        let mut state = self.ledger.lock();
        let now = Utc::now();
        let mut claimed = Vec::new();
        for &id in entry_ids {
            let belongs = state
                .entries
                .iter()
                .any(|e| e.id == id && e.tenant_id == tenant_id);
            if belongs && !state.warned.contains_key(&id) {
                state.warned.insert(id, now);
                claimed.push(id);
            }
        }
        Ok(claimed)
    }

    async fn list_offsets(&self, expiration_entry_id: i64) -> Result<Vec<ExpirationOffset>> {
        Ok(self
            .ledger
            .lock()
            .offsets
            .iter()
            .filter(|o| o.expiration_entry_id == expiration_entry_id)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl MemberRepositoryTrait for InMemoryStore {
    async fn get(&self, tenant_id: &str, member_id: &str) -> Result<Option<Member>> {
        Ok(self
            .ledger
            .lock()
            .members
            .get(member_id)
            .filter(|m| m.tenant_id == tenant_id)
            .cloned())
    }

    async fn find_by_customer_ref(
        &self,
        tenant_id: &str,
        customer_ref: &str,
    ) -> Result<Option<Member>> {
        Ok(self
            .ledger
            .lock()
            .members
            .values()
            .find(|m| m.tenant_id == tenant_id && m.customer_ref == customer_ref)
            .cloned())
    }

    async fn upsert_by_customer_ref(&self, new_member: &NewMember) -> Result<(Member, bool)> {
        let mut state = self.ledger.lock();
        if let Some(existing) = state.members.values().find(|m| {
            m.tenant_id == new_member.tenant_id && m.customer_ref == new_member.customer_ref
        }) {
            return Ok((existing.clone(), false));
        }

        let now = Utc::now();
        let member = Member {
            id: Uuid::now_v7().to_string(),
            tenant_id: new_member.tenant_id.clone(),
            customer_ref: new_member.customer_ref.clone(),
            email: new_member.email.clone(),
            tier_id: new_member.tier_id.clone(),
            status: MemberStatus::Active,
            balance_cents: 0,
            version: 0,
            last_activity_at: None,
            created_at: now,
            updated_at: now,
        };
        state.members.insert(member.id.clone(), member.clone());
        Ok((member, true))
    }

    async fn update_profile(
        &self,
        tenant_id: &str,
        member_id: &str,
        update: &MemberProfileUpdate,
    ) -> Result<Member> {
        let mut state = self.ledger.lock();
        let member = state
            .members
            .get_mut(member_id)
            .filter(|m| m.tenant_id == tenant_id)
            .ok_or_else(|| LedgerError::UnknownMember {
                tenant_id: tenant_id.to_string(),
                member_id: member_id.to_string(),
            })?;
        if let Some(email) = &update.email {
            member.email = Some(email.clone());
        }
        if let Some(tier_id) = &update.tier_id {
            member.tier_id = Some(tier_id.clone());
        }
        member.updated_at = Utc::now();
        Ok(member.clone())
    }

    async fn touch_activity(&self, tenant_id: &str, member_id: &str) -> Result<()> {
        if let Some(m) = self
            .ledger
            .lock()
            .members
            .get_mut(member_id)
            .filter(|m| m.tenant_id == tenant_id)
        {
            m.last_activity_at = Some(Utc::now());
        }
        Ok(())
    }

    async fn list_active_page(
        &self,
        tenant_id: &str,
        after: Option<String>,
        limit: i64,
    ) -> Result<Vec<Member>> {
        Ok(self
            .ledger
            .lock()
            .members
            .values()
            .filter(|m| {
                m.tenant_id == tenant_id
                    && m.is_active()
                    && after.as_deref().is_none_or(|a| m.id.as_str() > a)
            })
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }
}

#[async_trait]
impl TenantRepositoryTrait for InMemoryStore {
    async fn get(&self, tenant_id: &str) -> Result<Option<Tenant>> {
        let tenant = self.tenants.get(tenant_id).map(|t| t.value().clone());
        if let Some(tenant) = &tenant {
            tenant.validate_program()?;
        }
        Ok(tenant)
    }

    async fn list_active_page(&self, after: Option<String>, limit: i64) -> Result<Vec<Tenant>> {
        let mut tenants: Vec<Tenant> = self
            .tenants
            .iter()
            .filter(|t| t.active && after.as_deref().is_none_or(|a| t.id.as_str() > a))
            .map(|t| t.value().clone())
            .collect();
        tenants.sort_by(|a, b| a.id.cmp(&b.id));
        tenants.truncate(limit.max(0) as usize);
        Ok(tenants)
    }
}

static JOB_RUN_SEQ: AtomicU64 = AtomicU64::new(1);

#[async_trait]
impl JobRunRepositoryTrait for InMemoryStore {
    async fn begin(
        &self,
        tenant_id: &str,
        job_kind: JobKind,
        period_key: &str,
        options: BeginOptions,
    ) -> Result<JobClaim> {
        let now = Utc::now();
        let mut runs = self.job_runs.lock();

        let Some(idx) = runs.iter().position(|r| {
            r.tenant_id == tenant_id && r.job_kind == job_kind && r.period_key == period_key
        }) else {
            let run = JobRun {
                id: JOB_RUN_SEQ.fetch_add(1, Ordering::SeqCst) as i64,
                tenant_id: tenant_id.to_string(),
                job_kind,
                period_key: period_key.to_string(),
                status: JobRunStatus::Running,
                cursor: None,
                chunks_processed: 0,
                succeeded_count: 0,
                duplicate_count: 0,
                skipped_count: 0,
                failed_count: 0,
                failures: Vec::new(),
                last_error: None,
                cancel_requested: false,
                attempt: 1,
                lease_expires_at: Some(now + options.lease),
                started_at: now,
                completed_at: None,
                updated_at: now,
            };
            runs.push(run.clone());
            return Ok(JobClaim::Started(run));
        };

        let run = &mut runs[idx];
        let claim = match ClaimDecision::decide(run, now, options) {
            ClaimDecision::AlreadyCompleted => JobClaim::AlreadyCompleted(run.clone()),
            ClaimDecision::InProgress => JobClaim::InProgress(run.clone()),
            ClaimDecision::Resume => {
                run.status = JobRunStatus::Running;
                run.attempt += 1;
                run.cancel_requested = false;
                run.completed_at = None;
                run.lease_expires_at = Some(now + options.lease);
                run.updated_at = now;
                JobClaim::Resumed(run.clone())
            }
            ClaimDecision::Cancelled => {
                if run.status == JobRunStatus::Running {
                    run.status = JobRunStatus::Cancelled;
                    run.completed_at = Some(now);
                    run.lease_expires_at = None;
                    run.updated_at = now;
                }
                JobClaim::Cancelled(run.clone())
            }
        };
        Ok(claim)
    }

    async fn save_progress(
        &self,
        run_id: i64,
        attempt: i32,
        progress: &ChunkProgress,
    ) -> Result<ProgressAck> {
        self.update_held_run(run_id, attempt, |run| {
            if progress.cursor.is_some() {
                run.cursor = progress.cursor.clone();
            }
            run.chunks_processed += 1;
            run.succeeded_count += progress.succeeded;
            run.duplicate_count += progress.duplicates;
            run.skipped_count += progress.skipped;
            run.failed_count += progress.failed;
            run.failures.extend(progress.failures.iter().cloned());
            run.lease_expires_at = Some(Utc::now() + progress.lease);
            ProgressAck {
                cancel_requested: run.cancel_requested,
            }
        })
    }

    async fn complete(&self, run_id: i64, attempt: i32) -> Result<JobRun> {
        self.update_held_run(run_id, attempt, |r| {
            r.status = JobRunStatus::Completed;
            r.completed_at = Some(Utc::now());
            r.lease_expires_at = None;
            r.clone()
        })
    }

    async fn fail(&self, run_id: i64, attempt: i32, error: &str) -> Result<JobRun> {
        self.update_held_run(run_id, attempt, |r| {
            r.status = JobRunStatus::Failed;
            r.last_error = Some(error.to_string());
            r.lease_expires_at = None;
            r.clone()
        })
    }

    async fn mark_cancelled(&self, run_id: i64, attempt: i32) -> Result<JobRun> {
        self.update_held_run(run_id, attempt, |r| {
            r.status = JobRunStatus::Cancelled;
            r.completed_at = Some(Utc::now());
            r.lease_expires_at = None;
            r.clone()
        })
    }

    async fn request_cancel(&self, run_id: i64) -> Result<JobRun> {
        self.update_run(run_id, |r| match r.status {
            JobRunStatus::Running => r.cancel_requested = true,
            JobRunStatus::Failed => {
                r.status = JobRunStatus::Cancelled;
                r.completed_at = Some(Utc::now());
            }
            JobRunStatus::Completed | JobRunStatus::Cancelled => {}
        })
    }

    async fn get(&self, run_id: i64) -> Result<Option<JobRun>> {
        Ok(self
            .job_runs
            .lock()
            .iter()
            .find(|r| r.id == run_id)
            .cloned())
    }

    async fn find(
        &self,
        tenant_id: &str,
        job_kind: JobKind,
        period_key: &str,
    ) -> Result<Option<JobRun>> {
        Ok(self
            .job_runs
            .lock()
            .iter()
            .find(|r| {
                r.tenant_id == tenant_id && r.job_kind == job_kind && r.period_key == period_key
            })
            .cloned())
    }

    async fn list(&self, filter: &JobRunFilter) -> Result<Vec<JobRun>> {
        let mut runs: Vec<JobRun> = self
            .job_runs
            .lock()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at).then(b.id.cmp(&a.id)));
        runs.truncate(filter.effective_limit() as usize);
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{EntryKind, ProgramConfig};

    fn store_with_member() -> InMemoryStore {
        let store = InMemoryStore::new();
        store.insert_tenant(Tenant {
            id: "t-1".into(),
            name: "Shop".into(),
            active: true,
            timezone: "UTC".into(),
            program: ProgramConfig::default(),
            created_at: Utc::now(),
        });
        store.add_member("t-1", "m-1", None);
        store
    }

    #[tokio::test]
    async fn test_post_updates_balance_and_snapshot() {
        let store = store_with_member();
        let req = PostRequest::credit("t-1", "m-1", 500, EntryKind::PromotionBonus, "k-1", None);

        let outcome = store.post(&req).await.unwrap();
        assert!(!outcome.is_duplicate());
        assert_eq!(outcome.entry().balance_after_cents, 500);
        assert_eq!(store.get_balance("t-1", "m-1").await.unwrap(), 500);
        assert_eq!(store.member("m-1").unwrap().version, 1);
    }

    #[tokio::test]
    async fn test_injected_failures_are_transient() {
        let store = store_with_member();
        store.fail_next_posts("m-1", 1);
        let req = PostRequest::credit("t-1", "m-1", 500, EntryKind::PromotionBonus, "k-1", None);

        let err = store.post(&req).await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.post(&req).await.is_ok());
        assert_eq!(store.post_calls(), 2);
    }

    #[tokio::test]
    async fn test_list_entries_returns_latest_in_order() {
        let store = store_with_member();
        for i in 0..5 {
            let req = PostRequest::credit(
                "t-1",
                "m-1",
                100,
                EntryKind::PromotionBonus,
                format!("k-{i}"),
                None,
            );
            store.post(&req).await.unwrap();
        }

        let entries = store.list_entries("t-1", "m-1", 2).await.unwrap();
        let keys: Vec<_> = entries.iter().map(|e| e.idempotency_key.as_str()).collect();
        assert_eq!(keys, vec!["k-3", "k-4"]);
    }

    #[tokio::test]
    async fn test_claim_expiry_warnings_only_once() {
        let store = store_with_member();
        let req = PostRequest::credit(
            "t-1",
            "m-1",
            100,
            EntryKind::PromotionBonus,
            "k-1",
            Some(Utc::now()),
        );
        let id = store.post(&req).await.unwrap().entry().id;

        assert_eq!(store.claim_expiry_warnings("t-1", &[id]).await.unwrap(), vec![id]);
        assert!(store.claim_expiry_warnings("t-1", &[id]).await.unwrap().is_empty());
        assert!(store.claim_expiry_warnings("t-2", &[id]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_upsert_by_customer_ref_is_idempotent() {
        let store = store_with_member();
        let new_member = NewMember {
            tenant_id: "t-1".into(),
            customer_ref: "cust-new".into(),
            email: Some("a@example.com".into()),
            tier_id: None,
        };

        let (first, created) = store.upsert_by_customer_ref(&new_member).await.unwrap();
        assert!(created);
        let (second, created) = store.upsert_by_customer_ref(&new_member).await.unwrap();
        assert!(!created);
        assert_eq!(first.id, second.id);
    }
}
