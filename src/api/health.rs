//! 健康检查 API
//!
//! GET /health 不访问 Docker 或 GitHub

use axum::{extract::State, response::IntoResponse, routing::get, Json, Router};
use serde::Serialize;
use std::sync::Arc;

use crate::config::env::constants::VERSION;
use crate::state::AppState;

/// 健康检查响应
#[derive(Debug, Serialize)]
struct HealthResponse {
    status: &'static str,
    service: &'static str,
    version: &'static str,
    timestamp: String,
    uptime_secs: i64,
    hostname: String,
    containerized: bool,
    active_deploys: usize,
    active_repositories: Vec<String>,
    running_tasks: usize,
    log_channels: usize,
    open_log_channels: usize,
    finished_tasks: usize,
}

/// 创建健康检查路由
pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/health", get(health_check))
}

/// 健康检查 - 返回状态、版本、运行时间等信息
///
/// GET /health
async fn health_check(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let active_repositories = state.running_repositories().await;
    let now = chrono::Utc::now();

    Json(HealthResponse {
        status: "healthy",
        service: "flex-deploy",
        version: VERSION,
        timestamp: now.to_rfc3339(),
        uptime_secs: (now - state.started_at).num_seconds(),
        hostname: hostname::get()
            .map(|h| h.to_string_lossy().to_string())
            .unwrap_or_else(|_| "unknown".to_string()),
        containerized: state.config.containerized,
        active_deploys: active_repositories.len(),
        active_repositories,
        running_tasks: state.task_store.active_count().await,
        log_channels: state.log_hub.count().await,
        open_log_channels: state.log_hub.active_count().await,
        finished_tasks: state.task_store.history_count().await,
    })
}
