//! test_utils 模块的集成测试
//!
//! 验证测试数据生成器产出的信封与平台推送格式一致

use credit_shared::events::WebhookEnvelope;
use credit_shared::test_utils::*;

// ==================== 测试数据生成器测试 ====================

#[test]
fn test_membership_purchase_generation() {
    let envelope = TestDataGenerator::membership_purchased("tenant-a", "cust-1", "gold", 9_900);

    assert_eq!(envelope.topic, "memberships/purchase");
    assert_eq!(envelope.payload["tierId"], "gold");
    assert_eq!(envelope.payload["priceCents"], 9_900);
    assert_eq!(envelope.partition_key(), "tenant-a:cust-1");
}

#[test]
fn test_trade_in_generation() {
    let envelope = TestDataGenerator::trade_in_submitted("tenant-a", "cust-2", 12_000);

    assert_eq!(envelope.topic, "trade_ins/create");
    assert_eq!(envelope.payload["valueCents"], 12_000);
    TestAssertions::assert_json_has_field(&envelope.payload, "tradeInId");
}

#[test]
fn test_customer_created_generation() {
    let customer = test_customer_ref();
    let envelope = TestDataGenerator::customer_created("tenant-b", &customer, "new@example.com");

    assert_eq!(envelope.topic, "customers/create");
    assert_eq!(envelope.payload["customerRef"], customer.as_str());
    assert_eq!(envelope.payload["email"], "new@example.com");
}

#[test]
fn test_envelopes_survive_json_transport() {
    let envelope = TestDataGenerator::order_created("tenant-c", "cust-3", 2_500);
    let json = serde_json::to_vec(&envelope).unwrap();
    let back: WebhookEnvelope = serde_json::from_slice(&json).unwrap();

    assert_eq!(back.event_id, envelope.event_id);
    assert_eq!(back.payload, envelope.payload);
}

// ==================== 配置辅助测试 ====================

#[test]
fn test_database_config_runs_migrations() {
    let config = test_database_config();
    assert!(config.run_migrations);
    assert_eq!(config.max_connections, 5);
}

#[test]
fn test_unique_identifiers() {
    assert_ne!(test_tenant_id(), test_tenant_id());
    assert_ne!(test_customer_ref(), test_customer_ref());
}
