//! 积分批处理服务
//!
//! 负责按租户时区定时执行三类批处理，并为运维面板提供运行状态查询与人工触发接口。
//!
//! ## 核心功能
//!
//! - **月度发放**：按等级为 active 会员发放月度额度
//! - **过期扣减**：FIFO 核销到期入账，扣减截断到余额
//! - **过期预警**：只读扫描即将到期的额度并通知会员
//! - **可恢复执行**：分块保存游标，崩溃或失败后从游标继续；运维可在分块边界取消
//!
//! ## 模块结构
//!
//! - `runner`: 通用批处理执行器
//! - `jobs`: 三类批处理任务
//! - `scheduler`: 按租户展开的任务触发
//! - `worker`: cron 定时调度
//! - `handlers` / `routes` / `dto`: 运维 HTTP API

pub mod dto;
pub mod error;
pub mod handlers;
pub mod jobs;
pub mod routes;
pub mod runner;
pub mod scheduler;
pub mod state;
pub mod worker;

pub use error::{ApiError, JobError, Result};
pub use runner::{BatchJob, BatchRunner, ItemOutcome, Notice, RunSummary, RunnerSettings};
pub use scheduler::{
    JobTarget, Scheduler, TenantRunOutcome, TenantRunReport, TriggerOrigin, TriggerReport,
};
pub use state::AppState;
