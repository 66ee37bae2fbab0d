//! Postgres 仓储集成测试
//!
//! 需要可用的数据库，默认忽略：
//! `DATABASE_URL=postgres://... cargo test -p credit-ledger -- --ignored`

use std::sync::Arc;

use chrono::{Duration, Utc};
use credit_ledger::{
    BeginOptions, ChunkProgress, EntryKind, JobClaim, JobKind, JobRunRepository,
    JobRunRepositoryTrait, JobRunStatus, LedgerError, LedgerRepository, LedgerRepositoryTrait,
    MemberRepository, MemberRepositoryTrait, NewMember, PostRequest, TenantRepository,
    TenantRepositoryTrait,
};
use credit_shared::database::Database;
use credit_shared::test_utils::{test_customer_ref, test_database_config, test_tenant_id};
use serde_json::json;
use sqlx::PgPool;

async fn pool() -> PgPool {
    let db = Database::connect(&test_database_config())
        .await
        .expect("连接测试数据库失败");
    db.run_migrations().await.expect("执行迁移失败");
    db.pool().clone()
}

async fn seed_tenant(pool: &PgPool) -> String {
    let tenant_id = test_tenant_id();
    sqlx::query("INSERT INTO tenants (id, name, active, timezone, program) VALUES ($1, $2, TRUE, 'UTC', $3)")
        .bind(&tenant_id)
        .bind("Test Shop")
        .bind(json!({
            "tiers": [{
                "tierId": "gold", "name": "Gold",
                "monthlyStipendBaseCents": 5000, "monthlyStipendRateBps": 1000
            }],
            "signupBonusCents": 1000
        }))
        .execute(pool)
        .await
        .unwrap();
    tenant_id
}

async fn seed_member(pool: &PgPool, tenant_id: &str) -> String {
    let members = MemberRepository::new(pool.clone());
    let (member, created) = members
        .upsert_by_customer_ref(&NewMember {
            tenant_id: tenant_id.to_string(),
            customer_ref: test_customer_ref(),
            email: None,
            tier_id: Some("gold".into()),
        })
        .await
        .unwrap();
    assert!(created);
    member.id
}

#[tokio::test]
#[ignore]
async fn test_pg_tenant_program_is_loaded_from_json() {
    let pool = pool().await;
    let tenant_id = seed_tenant(&pool).await;

    let tenant = TenantRepository::new(pool).get(&tenant_id).await.unwrap().unwrap();
    assert_eq!(tenant.program.tier("gold").unwrap().monthly_stipend_cents(), 500);
    assert_eq!(tenant.program.signup_bonus_cents, 1_000);
    assert_eq!(tenant.program.credit_validity_days, 90);
}

#[tokio::test]
#[ignore]
async fn test_pg_post_is_idempotent_under_concurrency() {
    let pool = pool().await;
    let tenant_id = seed_tenant(&pool).await;
    let member_id = seed_member(&pool, &tenant_id).await;
    let repo = Arc::new(LedgerRepository::new(pool));

    let key = format!("{tenant_id}:order_created:evt-1");
    let handles: Vec<_> = (0..8)
        .map(|_| {
            let repo = repo.clone();
            let req = PostRequest::credit(&tenant_id, &member_id, 250, EntryKind::PurchaseCashback, &key, None);
            tokio::spawn(async move { repo.post(&req).await })
        })
        .collect();

    let mut posted = 0;
    for h in handles {
        if !h.await.unwrap().unwrap().is_duplicate() {
            posted += 1;
        }
    }
    assert_eq!(posted, 1);
    assert_eq!(repo.get_balance(&tenant_id, &member_id).await.unwrap(), 250);
    assert_eq!(repo.list_entries(&tenant_id, &member_id, 10).await.unwrap().len(), 1);
}

#[tokio::test]
#[ignore]
async fn test_pg_expiration_writes_offsets_atomically() {
    let pool = pool().await;
    let tenant_id = seed_tenant(&pool).await;
    let member_id = seed_member(&pool, &tenant_id).await;
    let repo = LedgerRepository::new(pool);
    let now = Utc::now();

    let a = repo
        .post(&PostRequest::credit(&tenant_id, &member_id, 1_000, EntryKind::TradeIn, format!("{tenant_id}:a"), Some(now - Duration::days(3))))
        .await
        .unwrap()
        .into_entry();
    let b = repo
        .post(&PostRequest::credit(&tenant_id, &member_id, 1_500, EntryKind::TradeIn, format!("{tenant_id}:b"), Some(now + Duration::days(3))))
        .await
        .unwrap()
        .into_entry();

    let expiring = repo
        .list_expiring_entries(&credit_ledger::ExpiringQuery {
            tenant_id: tenant_id.clone(),
            expires_from: None,
            expires_before: now,
            after_member: None,
            member_limit: 10,
            exclude_warned: false,
        })
        .await
        .unwrap();
    assert_eq!(expiring.len(), 1);
    assert_eq!(expiring[0].entry_id, a.id);

    let exp = PostRequest::expiration(&tenant_id, &member_id, 1_000, format!("{tenant_id}:exp"), vec![a.id]);
    let entry = repo.post(&exp).await.unwrap().into_entry();
    assert_eq!(entry.amount_cents, -1_000);
    assert_eq!(entry.balance_after_cents, 1_500);

    let offsets = repo.list_offsets(entry.id).await.unwrap();
    assert_eq!(offsets.len(), 1);
    assert_eq!(offsets[0].source_entry_id, a.id);

    let again = PostRequest::expiration(&tenant_id, &member_id, 1_000, format!("{tenant_id}:exp-2"), vec![a.id]);
    assert!(matches!(repo.post(&again).await, Err(LedgerError::AlreadySettled { .. })));

    let claimed = repo.claim_expiry_warnings(&tenant_id, &[b.id]).await.unwrap();
    assert_eq!(claimed, vec![b.id]);
    assert!(repo.claim_expiry_warnings(&tenant_id, &[b.id]).await.unwrap().is_empty());
}

#[tokio::test]
#[ignore]
async fn test_pg_job_run_claim_lifecycle() {
    let pool = pool().await;
    let tenant_id = seed_tenant(&pool).await;
    let runs = JobRunRepository::new(pool);
    let opts = BeginOptions::default();

    let claim = runs.begin(&tenant_id, JobKind::MonthlyCredit, "2025-03", opts).await.unwrap();
    let run_id = match claim {
        JobClaim::Started(run) => run.id,
        other => panic!("期望 Started，实际 {}", other.as_str()),
    };

    let again = runs.begin(&tenant_id, JobKind::MonthlyCredit, "2025-03", opts).await.unwrap();
    assert!(matches!(again, JobClaim::InProgress(_)));

    let ack = runs
        .save_progress(
            run_id,
            1,
            &ChunkProgress {
                cursor: Some("m-100".into()),
                succeeded: 3,
                lease: Duration::seconds(60),
                ..Default::default()
            },
        )
        .await
        .unwrap();
    assert!(!ack.cancel_requested);

    let failed = runs.fail(run_id, 1, "数据库连接中断").await.unwrap();
    assert_eq!(failed.status, JobRunStatus::Failed);

    let resumed = runs.begin(&tenant_id, JobKind::MonthlyCredit, "2025-03", opts).await.unwrap();
    match resumed {
        JobClaim::Resumed(run) => {
            assert_eq!(run.cursor.as_deref(), Some("m-100"));
            assert_eq!(run.succeeded_count, 3);
            assert_eq!(run.attempt, 2);
        }
        other => panic!("期望 Resumed，实际 {}", other.as_str()),
    }

    // 第一次执行者的写入已失效
    assert!(matches!(
        runs.complete(run_id, 1).await,
        Err(LedgerError::LeaseLost { .. })
    ));
    runs.complete(run_id, 2).await.unwrap();
    let done = runs.begin(&tenant_id, JobKind::MonthlyCredit, "2025-03", opts).await.unwrap();
    assert!(matches!(done, JobClaim::AlreadyCompleted(_)));
}
