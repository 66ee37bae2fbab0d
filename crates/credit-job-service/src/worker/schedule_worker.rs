//! 定时调度 Worker
//!
//! 按配置的 cron 表达式周期性触发三类批处理。cron 在每个租户自己的时区下求值：
//! 某次轮询时，若某租户在 `(上次轮询, 本次轮询]` 之间有一个 cron 触发点，则为该租户触发对应任务。
//! 错过的触发点（进程停机期间）不会补发，由运维通过显式账期的人工触发补跑。

use std::str::FromStr;
use std::time::Duration;

use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use credit_ledger::JobKind;
use credit_shared::config::SchedulerConfig;
use credit_shared::observability::metrics;
use cron::Schedule;
use futures::future::join_all;
use tokio::sync::watch;
use tracing::{error, info, warn};

use crate::error::{JobError, Result};
use crate::scheduler::{Scheduler, TenantRunReport, TriggerOrigin};

/// 解析 6 段（或带年份的 7 段）cron 表达式
pub fn parse_cron(expression: &str) -> Result<Schedule> {
    Schedule::from_str(expression).map_err(|e| JobError::InvalidCron {
        expression: expression.to_string(),
        message: e.to_string(),
    })
}

/// 在租户时区下，`(since, now]` 之间是否存在触发点
pub fn is_due(schedule: &Schedule, tz: Tz, since: DateTime<Utc>, now: DateTime<Utc>) -> bool {
    let local_since = since.with_timezone(&tz);
    let local_now = now.with_timezone(&tz);
    schedule
        .after(&local_since)
        .next()
        .is_some_and(|next| next <= local_now)
}

/// 一次轮询中触发的任务
#[derive(Debug, Clone)]
pub struct FiredRun {
    pub job_kind: JobKind,
    pub report: TenantRunReport,
}

pub struct ScheduleWorker {
    scheduler: Scheduler,
    schedules: Vec<(JobKind, Schedule)>,
    poll_interval: Duration,
}

impl ScheduleWorker {
    pub fn new(scheduler: Scheduler, config: &SchedulerConfig) -> Result<Self> {
        let schedules = vec![
            (JobKind::MonthlyCredit, parse_cron(&config.monthly_credit_cron)?),
            (JobKind::Expiration, parse_cron(&config.expiration_cron)?),
            (JobKind::ExpirationWarning, parse_cron(&config.warning_cron)?),
        ];
        Ok(Self {
            scheduler,
            schedules,
            poll_interval: Duration::from_secs(config.poll_interval_seconds.max(1)),
        })
    }

    /// 主循环：持续轮询直到收到关闭信号
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        info!(
            poll_interval = ?self.poll_interval,
            schedules = self.schedules.len(),
            "ScheduleWorker 已启动"
        );

        let mut last_tick = Utc::now();
        loop {
            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.changed() => {
                    info!("ScheduleWorker 收到关闭信号，停止轮询");
                    return;
                }
            }

            let now = Utc::now();
            match self.tick(last_tick, now).await {
                Ok(fired) if !fired.is_empty() => {
                    info!(fired = fired.len(), "本轮定时触发完成");
                }
                Ok(_) => {}
                Err(e) => error!(error = %e, "定时调度轮询出错"),
            }
            last_tick = now;

            // 供 Prometheus 告警判断 Worker 是否存活
            metrics::set_worker_last_run("schedule_worker");
        }
    }

    /// 处理 `(since, now]` 内到期的触发点
    pub async fn tick(&self, since: DateTime<Utc>, now: DateTime<Utc>) -> Result<Vec<FiredRun>> {
        let tenants = self.scheduler.active_tenants().await?;

        let mut due = Vec::new();
        for tenant in &tenants {
            let tz = match tenant.tz() {
                Ok(tz) => tz,
                Err(e) => {
                    warn!(tenant_id = %tenant.id, error = %e, "租户时区无效，跳过调度");
                    continue;
                }
            };
            for (kind, schedule) in &self.schedules {
                if is_due(schedule, tz, since, now) {
                    due.push((tenant, *kind));
                }
            }
        }

        let fired = join_all(due.into_iter().map(|(tenant, job_kind)| async move {
            let report = self
                .scheduler
                .run_tenant(tenant, job_kind, None, TriggerOrigin::Scheduled)
                .await;
            FiredRun { job_kind, report }
        }))
        .await;

        Ok(fired)
    }
}
