//! HTTP 处理器

pub mod balance;
pub mod health;
pub mod job_run;
pub mod trigger;
