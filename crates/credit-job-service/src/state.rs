//! 应用状态定义

use std::sync::Arc;

use credit_ledger::{JobRunRepositoryTrait, PostingService};
use credit_shared::database::Database;

use crate::scheduler::Scheduler;

/// Axum 应用共享状态
#[derive(Clone)]
pub struct AppState {
    pub scheduler: Scheduler,
    pub job_runs: Arc<dyn JobRunRepositoryTrait>,
    pub posting: PostingService,
    /// 就绪探针检查的数据库；内存模式下为空
    pub database: Option<Database>,
}

impl AppState {
    pub fn new(
        scheduler: Scheduler,
        job_runs: Arc<dyn JobRunRepositoryTrait>,
        posting: PostingService,
    ) -> Self {
        Self {
            scheduler,
            job_runs,
            posting,
            database: None,
        }
    }

    pub fn with_database(mut self, database: Database) -> Self {
        self.database = Some(database);
        self
    }
}
