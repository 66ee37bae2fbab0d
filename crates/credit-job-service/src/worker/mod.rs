//! 后台 Worker

pub mod schedule_worker;

pub use schedule_worker::{FiredRun, ScheduleWorker};
