//! Prometheus 指标模块
//!
//! 基于 metrics crate 和 metrics-exporter-prometheus 实现指标收集与导出。
//! 指标通过独立的 HTTP 端口暴露，供 Prometheus 抓取。

use anyhow::Result;
use axum::{Router, routing::get};
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
use std::net::SocketAddr;
use tokio::net::TcpListener;
use tracing::{error, info};

/// Metrics 资源守卫
pub struct MetricsHandle {
    _server_handle: tokio::task::JoinHandle<()>,
}

/// 初始化 Prometheus 指标导出
///
/// 启动一个独立的 HTTP 服务器在指定端口暴露 `/metrics` 端点。
pub async fn init(service_name: &str, metrics_port: u16) -> Result<MetricsHandle> {
    let handle = PrometheusBuilder::new().install_recorder()?;

    register_common_metrics(service_name);

    let addr = SocketAddr::from(([0, 0, 0, 0], metrics_port));
    let server_handle = start_metrics_server(addr, handle).await?;

    Ok(MetricsHandle {
        _server_handle: server_handle,
    })
}

/// 注册指标描述，出现在 /metrics 的 HELP 注释中
fn register_common_metrics(service_name: &str) {
    metrics::describe_counter!("http_requests_total", "Total number of HTTP requests");
    metrics::describe_histogram!(
        "http_request_duration_seconds",
        "HTTP request duration in seconds"
    );

    metrics::describe_counter!(
        "credit_ledger_postings_total",
        "Ledger postings by entry kind and outcome"
    );
    metrics::describe_histogram!(
        "credit_ledger_post_duration_seconds",
        "Ledger posting duration in seconds"
    );

    metrics::describe_counter!(
        "credit_job_items_total",
        "Batch job items by job kind and outcome"
    );
    metrics::describe_counter!("credit_job_runs_total", "Finished job runs by status");
    metrics::describe_histogram!(
        "credit_job_run_duration_seconds",
        "Job run duration in seconds"
    );

    metrics::describe_counter!(
        "credit_webhook_events_total",
        "Webhook events by kind and outcome"
    );
    metrics::describe_counter!(
        "credit_notifications_total",
        "Notification dispatches by template and outcome"
    );
    metrics::describe_gauge!(
        "credit_worker_last_run_timestamp",
        "Unix timestamp of the last worker tick"
    );

    metrics::counter!("service_starts_total", "service" => service_name.to_string()).increment(1);
}

/// 启动指标 HTTP 服务器
async fn start_metrics_server(
    addr: SocketAddr,
    handle: PrometheusHandle,
) -> Result<tokio::task::JoinHandle<()>> {
    let app = Router::new()
        .route("/metrics", get(move || std::future::ready(handle.render())))
        .route("/health", get(|| async { "OK" }));

    let listener = TcpListener::bind(addr).await?;
    info!("Metrics server listening on {}", addr);

    let server_handle = tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            error!("Metrics server error: {}", e);
        }
    });

    Ok(server_handle)
}

// ============================================================================
// 便捷的指标记录函数
// ============================================================================

/// 记录 HTTP 请求
#[inline]
pub fn record_http_request(method: &str, path: &str, status: u16, duration_secs: f64) {
    let status_str = status.to_string();
    metrics::counter!(
        "http_requests_total",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str.clone()
    )
    .increment(1);

    metrics::histogram!(
        "http_request_duration_seconds",
        "method" => method.to_string(),
        "path" => path.to_string(),
        "status" => status_str
    )
    .record(duration_secs);
}

/// 记录账本写入
///
/// outcome: posted / duplicate / rejected / error
#[inline]
pub fn record_ledger_post(kind: &str, outcome: &str, duration_secs: f64) {
    metrics::counter!(
        "credit_ledger_postings_total",
        "kind" => kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "credit_ledger_post_duration_seconds",
        "kind" => kind.to_string()
    )
    .record(duration_secs);
}

/// 记录批处理单个条目的结果
#[inline]
pub fn record_job_item(job_kind: &str, outcome: &str) {
    metrics::counter!(
        "credit_job_items_total",
        "job_kind" => job_kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录任务运行结束
#[inline]
pub fn record_job_run(job_kind: &str, status: &str, duration_secs: f64) {
    metrics::counter!(
        "credit_job_runs_total",
        "job_kind" => job_kind.to_string(),
        "status" => status.to_string()
    )
    .increment(1);

    metrics::histogram!(
        "credit_job_run_duration_seconds",
        "job_kind" => job_kind.to_string()
    )
    .record(duration_secs);
}

/// 记录 webhook 事件处理结果
#[inline]
pub fn record_webhook_event(event_kind: &str, outcome: &str) {
    metrics::counter!(
        "credit_webhook_events_total",
        "event_kind" => event_kind.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录通知投递结果
#[inline]
pub fn record_notification(template: &str, outcome: &str) {
    metrics::counter!(
        "credit_notifications_total",
        "template" => template.to_string(),
        "outcome" => outcome.to_string()
    )
    .increment(1);
}

/// 记录后台 worker 最近一次运行时间
#[inline]
pub fn set_worker_last_run(worker: &str) {
    metrics::gauge!(
        "credit_worker_last_run_timestamp",
        "worker" => worker.to_string()
    )
    .set(chrono::Utc::now().timestamp() as f64);
}
