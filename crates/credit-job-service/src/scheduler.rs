//! 任务触发
//!
//! 三类批处理的统一入口，供定时调度与运维 API 共用。每次触发按租户展开，
//! 每个租户作为独立任务并发执行，租户之间互不影响；同一 (租户, 任务类型, 账期)
//! 的重复触发由运行记录的唯一性吸收。
//!
//! 账期与日期按租户时区解析：
//! - 月度发放默认当前本地月份
//! - 过期扫描默认昨天（最后一个完整结束的本地日）
//! - 过期预警默认今天

use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use credit_ledger::period::local_today;
use credit_ledger::{
    JobKind, MemberRepositoryTrait, Period, PostingService, Tenant, TenantRepositoryTrait,
};
use futures::future::join_all;
use serde::Serialize;
use tracing::{error, info, instrument};

use crate::error::{JobError, Result};
use crate::jobs::{ExpirationJob, MonthlyCreditJob, WarningJob};
use crate::runner::{BatchRunner, RunSummary};

const TENANT_PAGE_SIZE: i64 = 100;

/// 触发来源
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerOrigin {
    Scheduled,
    /// 人工触发会恢复已取消的运行
    Manual,
}

/// 显式指定的账期或日期
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobTarget {
    Period(Period),
    Date(NaiveDate),
}

/// 单个租户的触发结果
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TenantRunOutcome {
    Ran { summary: RunSummary },
    Skipped { reason: String },
    Error { code: String, message: String },
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TenantRunReport {
    pub tenant_id: String,
    #[serde(flatten)]
    pub outcome: TenantRunOutcome,
}

impl TenantRunReport {
    pub fn summary(&self) -> Option<&RunSummary> {
        match &self.outcome {
            TenantRunOutcome::Ran { summary } => Some(summary),
            _ => None,
        }
    }
}

/// 一次触发的汇总
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TriggerReport {
    pub job_kind: JobKind,
    pub origin: TriggerOrigin,
    pub runs: Vec<TenantRunReport>,
}

impl TriggerReport {
    pub fn for_tenant(&self, tenant_id: &str) -> Option<&TenantRunReport> {
        self.runs.iter().find(|r| r.tenant_id == tenant_id)
    }
}

/// 批处理触发器
#[derive(Clone)]
pub struct Scheduler {
    tenants: Arc<dyn TenantRepositoryTrait>,
    members: Arc<dyn MemberRepositoryTrait>,
    posting: PostingService,
    runner: BatchRunner,
}

impl Scheduler {
    pub fn new(
        tenants: Arc<dyn TenantRepositoryTrait>,
        members: Arc<dyn MemberRepositoryTrait>,
        posting: PostingService,
        runner: BatchRunner,
    ) -> Self {
        Self {
            tenants,
            members,
            posting,
            runner,
        }
    }

    /// 月度额度发放；`period` 为空时各租户取本地当前月份
    pub async fn trigger_monthly_credits(
        &self,
        tenant_id: Option<&str>,
        period: Option<Period>,
        origin: TriggerOrigin,
    ) -> Result<TriggerReport> {
        self.trigger(
            JobKind::MonthlyCredit,
            tenant_id,
            period.map(JobTarget::Period),
            origin,
        )
        .await
    }

    /// 过期扫描；`date` 为空时各租户取本地昨天
    pub async fn trigger_expiration_scan(
        &self,
        tenant_id: Option<&str>,
        date: Option<NaiveDate>,
        origin: TriggerOrigin,
    ) -> Result<TriggerReport> {
        self.trigger(
            JobKind::Expiration,
            tenant_id,
            date.map(JobTarget::Date),
            origin,
        )
        .await
    }

    /// 过期预警扫描；`date` 为空时各租户取本地今天
    pub async fn trigger_warning_scan(
        &self,
        tenant_id: Option<&str>,
        date: Option<NaiveDate>,
        origin: TriggerOrigin,
    ) -> Result<TriggerReport> {
        self.trigger(
            JobKind::ExpirationWarning,
            tenant_id,
            date.map(JobTarget::Date),
            origin,
        )
        .await
    }

    /// 对指定租户（为空时为全部 active 租户）触发一类任务
    #[instrument(skip(self, target))]
    pub async fn trigger(
        &self,
        job_kind: JobKind,
        tenant_id: Option<&str>,
        target: Option<JobTarget>,
        origin: TriggerOrigin,
    ) -> Result<TriggerReport> {
        let tenants = match tenant_id {
            Some(id) => {
                let tenant = self
                    .tenants
                    .get(id)
                    .await?
                    .ok_or_else(|| JobError::TenantNotFound(id.to_string()))?;
                vec![tenant]
            }
            None => self.active_tenants().await?,
        };

        info!(
            job_kind = %job_kind,
            origin = ?origin,
            tenants = tenants.len(),
            "触发批处理"
        );

        let runs = join_all(
            tenants
                .iter()
                .map(|tenant| self.run_tenant(tenant, job_kind, target, origin)),
        )
        .await;

        Ok(TriggerReport {
            job_kind,
            origin,
            runs,
        })
    }

    /// 全部 active 租户，按 ID 分页读取
    pub async fn active_tenants(&self) -> Result<Vec<Tenant>> {
        let mut all = Vec::new();
        let mut after: Option<String> = None;
        loop {
            let page = self
                .tenants
                .list_active_page(after.clone(), TENANT_PAGE_SIZE)
                .await?;
            let done = (page.len() as i64) < TENANT_PAGE_SIZE;
            after = page.last().map(|t| t.id.clone());
            all.extend(page);
            if done {
                return Ok(all);
            }
        }
    }

    /// 为单个租户执行一类任务，错误收敛为报告而不是向上传播
    pub async fn run_tenant(
        &self,
        tenant: &Tenant,
        job_kind: JobKind,
        target: Option<JobTarget>,
        origin: TriggerOrigin,
    ) -> TenantRunReport {
        let outcome = if !tenant.active {
            TenantRunOutcome::Skipped {
                reason: "tenant_inactive".to_string(),
            }
        } else {
            match self.execute(tenant, job_kind, target, origin).await {
                Ok(summary) => TenantRunOutcome::Ran { summary },
                Err(e) => {
                    error!(
                        tenant_id = %tenant.id,
                        job_kind = %job_kind,
                        error = %e,
                        "租户批处理失败"
                    );
                    TenantRunOutcome::Error {
                        code: e.code().to_string(),
                        message: e.to_string(),
                    }
                }
            }
        };

        TenantRunReport {
            tenant_id: tenant.id.clone(),
            outcome,
        }
    }

    async fn execute(
        &self,
        tenant: &Tenant,
        job_kind: JobKind,
        target: Option<JobTarget>,
        origin: TriggerOrigin,
    ) -> Result<RunSummary> {
        tenant.validate_program()?;
        let tz = tenant.tz()?;
        let today = local_today(tz, Utc::now());
        let resume_cancelled = origin == TriggerOrigin::Manual;

        match (job_kind, target) {
            (JobKind::MonthlyCredit, None | Some(JobTarget::Period(_))) => {
                let period = match target {
                    Some(JobTarget::Period(p)) => p,
                    _ => Period::containing(tz, Utc::now()),
                };
                let job = MonthlyCreditJob::new(
                    tenant.clone(),
                    period,
                    self.members.clone(),
                    self.posting.clone(),
                )?;
                self.runner.run(&job, resume_cancelled).await
            }
            (JobKind::Expiration, None | Some(JobTarget::Date(_))) => {
                let date = match target {
                    Some(JobTarget::Date(d)) => d,
                    _ => today.pred_opt().unwrap_or(today),
                };
                let job = ExpirationJob::new(tenant, date, self.posting.clone())?;
                self.runner.run(&job, resume_cancelled).await
            }
            (JobKind::ExpirationWarning, None | Some(JobTarget::Date(_))) => {
                let date = match target {
                    Some(JobTarget::Date(d)) => d,
                    _ => today,
                };
                let job = WarningJob::new(
                    tenant,
                    date,
                    self.posting.repository().clone(),
                    self.runner.notifier().clone(),
                )?;
                self.runner.run(&job, resume_cancelled).await
            }
            (kind, Some(target)) => Err(JobError::InvalidTrigger(format!(
                "{kind} 不接受 {target:?}"
            ))),
        }
    }
}
