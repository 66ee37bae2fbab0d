//! 业务服务层

mod posting_service;

pub use posting_service::{BalanceView, PostingService};
