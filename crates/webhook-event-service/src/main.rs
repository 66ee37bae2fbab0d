//! webhook 事件服务
//!
//! 消费 webhook 事件并记账，同时运行死信队列的重投消费者。

use std::sync::Arc;

use credit_ledger::notification::KafkaNotificationDispatcher;
use credit_ledger::{LedgerRepository, MemberRepository, NotificationSender, PostingService, TenantRepository};
use credit_shared::{
    config::AppConfig,
    database::Database,
    dlq::{DlqConsumer, DlqProducer},
    kafka::KafkaProducer,
    observability,
};
use tokio::sync::watch;
use tracing::{error, info, warn};
use webhook_events::{EventProcessor, WebhookConsumer};

const SERVICE_NAME: &str = "webhook-event-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting {}...", SERVICE_NAME);

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let pool = db.pool().clone();
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let members = Arc::new(MemberRepository::new(pool.clone()));
    let tenants = Arc::new(TenantRepository::new(pool));

    let producer = KafkaProducer::new(&config.kafka)?;
    let notifier = NotificationSender::from_config(
        Arc::new(KafkaNotificationDispatcher::new(Arc::new(producer.clone()))),
        &config.jobs.notification,
    );
    let processor = EventProcessor::new(tenants, members, PostingService::new(ledger), notifier);

    let dead_letters = DlqProducer::new(
        producer.clone(),
        SERVICE_NAME,
        config.webhooks.dlq_retry_policy(),
    );
    let consumer = WebhookConsumer::new(&config, processor, dead_letters)?;
    let dlq_consumer = DlqConsumer::new(&config, producer)?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let consumer_handle = tokio::spawn({
        let shutdown = shutdown_rx.clone();
        async move {
            if let Err(e) = consumer.run(shutdown).await {
                error!(error = %e, "webhook 事件消费者异常退出");
            }
        }
    });
    let dlq_handle = tokio::spawn(dlq_consumer.run(shutdown_rx));

    shutdown_signal().await;
    shutdown_tx.send(true).ok();

    // 等待正在处理的消息完成
    let (consumer_result, dlq_result) = tokio::join!(consumer_handle, dlq_handle);
    if let Err(e) = consumer_result {
        warn!(error = %e, "webhook 消费任务结束异常");
    }
    if let Err(e) = dlq_result {
        warn!(error = %e, "DLQ 消费任务结束异常");
    }
    db.close().await;

    info!("Service shutdown complete");
    Ok(())
}

/// 监听关闭信号（Ctrl+C 或 SIGTERM）
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(error = %e, "注册 Ctrl+C 处理器失败");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                warn!(error = %e, "注册 SIGTERM 处理器失败");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, initiating graceful shutdown..."),
        _ = terminate => info!("Received SIGTERM, initiating graceful shutdown..."),
    }
}
