//! 集成测试共用的内存环境

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, NaiveDate, Utc};
use credit_jobs::{BatchRunner, RunnerSettings, Scheduler};
use credit_ledger::notification::RecordingDispatcher;
use credit_ledger::{InMemoryStore, NotificationSender, PostingService, ProgramConfig, Tenant, TierBenefit};
use credit_shared::retry::RetryPolicy;
use fake::Fake;
use fake::faker::company::en::CompanyName;

pub struct Harness {
    pub store: Arc<InMemoryStore>,
    pub dispatcher: Arc<RecordingDispatcher>,
    pub posting: PostingService,
    pub runner: BatchRunner,
    pub scheduler: Scheduler,
}

impl Harness {
    pub fn new(chunk_size: usize) -> Self {
        let store = Arc::new(InMemoryStore::new());
        let dispatcher = Arc::new(RecordingDispatcher::new());
        let notifier = NotificationSender::new(
            dispatcher.clone(),
            RetryPolicy::none(),
            Duration::from_secs(1),
        );
        let posting = PostingService::new(store.clone());
        let runner = BatchRunner::new(
            store.clone(),
            notifier,
            RunnerSettings {
                chunk_size,
                item_retry: RetryPolicy::from_millis(2, 1, 5),
                item_timeout: Duration::from_secs(2),
                lease: chrono::Duration::minutes(5),
                max_recorded_failures: 100,
            },
        );
        let scheduler = Scheduler::new(store.clone(), store.clone(), posting.clone(), runner.clone());

        Self {
            store,
            dispatcher,
            posting,
            runner,
            scheduler,
        }
    }

    /// 插入租户并创建 `count` 个 gold 会员：m-000, m-001, ...
    pub fn with_gold_members(self, tenant: Tenant, count: usize) -> Self {
        let tenant_id = tenant.id.clone();
        self.store.insert_tenant(tenant);
        for i in 0..count {
            self.store
                .add_member(&tenant_id, &format!("m-{i:03}"), Some("gold"));
        }
        self
    }
}

/// Gold 等级：基数 $50 × 10% = $5
pub fn gold_tenant(id: &str, timezone: &str) -> Tenant {
    Tenant {
        id: id.into(),
        name: CompanyName().fake(),
        active: true,
        timezone: timezone.into(),
        program: ProgramConfig {
            tiers: vec![TierBenefit {
                tier_id: "gold".into(),
                name: "Gold".into(),
                monthly_stipend_base_cents: 5_000,
                monthly_stipend_rate_bps: 1_000,
                cashback_rate_bps: 500,
                trade_in_bonus_rate_bps: 1_000,
                membership_bonus_cents: 0,
            }],
            ..ProgramConfig::default()
        },
        created_at: Utc::now(),
    }
}

pub fn date(s: &str) -> NaiveDate {
    NaiveDate::parse_from_str(s, "%Y-%m-%d").unwrap()
}

pub fn ts(s: &str) -> DateTime<Utc> {
    s.parse().unwrap()
}
