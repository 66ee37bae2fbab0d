//! 积分批处理服务
//!
//! 定时执行月度发放、过期扣减与过期预警，并提供运维 REST API。

use std::sync::Arc;

use credit_jobs::{
    AppState, BatchRunner, RunnerSettings, Scheduler, routes, worker::ScheduleWorker,
};
use credit_ledger::notification::{
    HttpNotificationDispatcher, KafkaNotificationDispatcher, NotificationDispatcher,
};
use credit_ledger::{
    JobRunRepository, LedgerRepository, MemberRepository, NotificationSender, PostingService,
    TenantRepository,
};
use credit_shared::{
    config::{AppConfig, NotificationConfig},
    database::Database,
    kafka::KafkaProducer,
    observability,
};
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{info, warn};

const SERVICE_NAME: &str = "credit-job-service";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let config = AppConfig::load(SERVICE_NAME)?;
    let _guard = observability::init(&config.service_name, &config.observability).await?;

    info!("Starting {} on {}", SERVICE_NAME, config.server_addr());

    let db = Database::connect(&config.database).await?;
    if config.database.run_migrations {
        db.run_migrations().await?;
    }

    let pool = db.pool().clone();
    let ledger = Arc::new(LedgerRepository::new(pool.clone()));
    let members = Arc::new(MemberRepository::new(pool.clone()));
    let tenants = Arc::new(TenantRepository::new(pool.clone()));
    let job_runs = Arc::new(JobRunRepository::new(pool));

    let dispatcher = build_dispatcher(&config)?;
    let notifier = NotificationSender::from_config(dispatcher, &config.jobs.notification);

    let posting = PostingService::new(ledger);
    let runner = BatchRunner::new(
        job_runs.clone(),
        notifier,
        RunnerSettings::from_config(&config.jobs),
    );
    let scheduler = Scheduler::new(tenants, members, posting.clone(), runner);

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // 启动定时调度 Worker
    let worker_handle = if config.jobs.scheduler.enabled {
        let worker = ScheduleWorker::new(scheduler.clone(), &config.jobs.scheduler)?;
        Some(tokio::spawn(async move { worker.run(shutdown_rx).await }))
    } else {
        warn!("定时调度已关闭，仅接受人工触发");
        None
    };

    let state = AppState::new(scheduler, job_runs, posting).with_database(db.clone());
    let app = routes::app(state);

    let listener = TcpListener::bind(config.server_addr()).await?;
    info!("Listening on {}", config.server_addr());

    // 优雅关闭：停止接收新连接并等待已有请求处理完毕，
    // 调度 Worker 在当前分块结束后退出
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    shutdown_tx.send(true).ok();
    if let Some(handle) = worker_handle {
        handle.await.ok();
    }
    db.close().await;

    info!("Server shutdown complete");

    Ok(())
}

/// 按配置选择通知投递通道
fn build_dispatcher(config: &AppConfig) -> anyhow::Result<Arc<dyn NotificationDispatcher>> {
    let notification: &NotificationConfig = &config.jobs.notification;
    match (notification.transport.as_str(), notification.endpoint.as_deref()) {
        ("http", Some(endpoint)) => {
            info!(endpoint, "通知通过 HTTP 投递");
            Ok(Arc::new(HttpNotificationDispatcher::new(
                endpoint,
                notification.timeout(),
            )?))
        }
        ("http", None) => anyhow::bail!("notification.transport=http 需要配置 endpoint"),
        _ => {
            info!(brokers = %config.kafka.brokers, "通知通过 Kafka 投递");
            let producer = KafkaProducer::new(&config.kafka)?;
            Ok(Arc::new(KafkaNotificationDispatcher::new(Arc::new(producer))))
        }
    }
}

/// 监听关闭信号
///
/// K8s 通过 SIGTERM 通知 Pod 停止；本地开发通过 Ctrl+C。
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
