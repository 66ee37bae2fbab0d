//! 路由配置模块

use axum::{
    Router, middleware,
    routing::{get, post},
};
use credit_shared::observability::middleware as obs_middleware;
use tower_http::cors::{Any, CorsLayer};

use crate::{handlers, state::AppState};

/// 运维 API 路由（挂载在 /api 下）
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/job-runs", get(handlers::job_run::list_job_runs))
        .route("/job-runs/{id}", get(handlers::job_run::get_job_run))
        .route(
            "/job-runs/{id}/cancel",
            post(handlers::job_run::cancel_job_run),
        )
        .route(
            "/triggers/monthly-credits",
            post(handlers::trigger::trigger_monthly_credits),
        )
        .route(
            "/triggers/expiration-scan",
            post(handlers::trigger::trigger_expiration_scan),
        )
        .route(
            "/triggers/warning-scan",
            post(handlers::trigger::trigger_warning_scan),
        )
        .route(
            "/tenants/{tenant_id}/members/{member_id}/balance",
            get(handlers::balance::get_member_balance),
        )
}

/// 完整应用：API、健康检查与可观测性中间件
pub fn app(state: AppState) -> Router {
    // 运维面板与本服务不同源
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .nest("/api", api_routes())
        .route("/health", get(handlers::health::health_check))
        .route("/ready", get(handlers::health::readiness_check))
        .layer(cors)
        .layer(middleware::from_fn(obs_middleware::http_tracing))
        .layer(middleware::from_fn(obs_middleware::request_id))
        .with_state(state)
}
