//! 数据库仓储层
//!
//! 提供所有实体的数据访问接口，封装 SQL 操作细节。
//!
//! ## 设计原则
//!
//! - 记账是唯一会修改余额的路径，必须在单个事务内完成
//! - 使用 SQLx 进行数据库操作
//! - 定义 trait 接口以支持 mock 测试与内存实现

mod job_run_repo;
mod ledger_repo;
mod member_repo;
mod memory;
mod tenant_repo;
mod traits;

pub use job_run_repo::JobRunRepository;
pub use ledger_repo::LedgerRepository;
pub use member_repo::MemberRepository;
pub use memory::InMemoryStore;
pub use tenant_repo::TenantRepository;
pub use traits::*;
