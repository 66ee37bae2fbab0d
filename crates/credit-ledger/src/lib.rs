//! 积分账本核心
//!
//! 多租户商户储值积分的账本层，批处理任务与 webhook 事件处理共用。
//!
//! ## 核心功能
//!
//! - **幂等记账**：同一幂等键只产生一条流水与一次余额变动
//! - **按会员串行化**：同一会员的并发写入在事务内排队，不丢失更新
//! - **过期核销**：过期扣减通过核销表回指来源入账，FIFO 分摊并截断到余额
//! - **任务运行记录**：(租户, 任务类型, 账期) 唯一，支持游标恢复与取消
//! - **通知投递**：记账提交后的尽力而为通知
//!
//! ## 模块结构
//!
//! - `models`: 领域模型定义
//! - `error`: 错误类型定义
//! - `period`: 租户时区下的账期与日期计算
//! - `posting`: 记账规则（纯函数）
//! - `repository`: 仓储接口及 Postgres / 内存实现
//! - `service`: 记账服务
//! - `notification`: 通知投递

pub mod error;
pub mod models;
pub mod notification;
pub mod period;
pub mod posting;
pub mod repository;
pub mod service;

pub use error::{LedgerError, Result};
pub use models::*;
pub use notification::{NotificationDispatcher, NotificationSender};
pub use period::Period;
pub use repository::{
    InMemoryStore, JobRunRepository, JobRunRepositoryTrait, LedgerRepository,
    LedgerRepositoryTrait, MemberRepository, MemberRepositoryTrait, TenantRepository,
    TenantRepositoryTrait,
};
pub use service::{BalanceView, PostingService};
#[cfg(any(test, feature = "mocks"))]
pub use repository::MockJobRunRepositoryTrait;
